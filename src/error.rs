//! Error handling for the DataPipe-RS application
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration loading, the state store and the binary. Engine runtime errors
//! live in [`crate::pipeline::PipelineError`] and convert into this type.

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for DataPipe-RS operations
#[derive(Error, Debug)]
pub enum DataPipeError {
    /// Errors raised by the pipeline engine
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to Rhai script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the checkpoint store
    #[error("State store error: {0}")]
    State(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DataPipeError>,
    },
}

impl DataPipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DataPipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        DataPipeError::Script(err.to_string())
    }
}

impl From<serde_json::Error> for DataPipeError {
    fn from(err: serde_json::Error) -> Self {
        DataPipeError::Serialization(err.to_string())
    }
}

/// Result type alias for DataPipe-RS operations
pub type Result<T> = std::result::Result<T, DataPipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| DataPipeError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DataPipeError::from(e).with_context(f()))
    }
}
