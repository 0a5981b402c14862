//! Pipeline-specific error types.

use thiserror::Error;

/// Errors that can occur within the pipeline engine.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad adaptor config or URI at init time; aborts the whole tree's init.
    #[error("Construction error in node '{node}': {message}")]
    Construction { node: String, message: String },

    /// I/O or protocol failure inside an adaptor's drive/consume loop.
    #[error("Adaptor error: {0}")]
    Adaptor(String),

    /// Transformer script evaluation failure.
    #[error("Script error: {0}")]
    Script(String),

    /// Non-2xx response or transport failure posting a telemetry event.
    #[error("Telemetry delivery error: {0}")]
    Telemetry(String),

    /// A runtime error tagged with the path of the node that raised it.
    #[error("Node {path} error: {source}")]
    Node {
        path: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("No adaptor registered for type '{0}'")]
    UnknownAdaptor(String),

    #[error("Adaptor '{kind}' cannot run as a {role}")]
    UnsupportedRole { kind: String, role: &'static str },

    /// The pipe was stopped or a peer went away. Signals shutdown, not failure.
    #[error("Pipe closed")]
    PipeClosed,

    #[error("Pipe has no inbound path")]
    NoInbound,

    #[error("Node '{0}' has not been initialized")]
    NotInitialized(String),

    #[error("init must be called on the root node, '{0}' has a parent")]
    NotRoot(String),

    #[error("Pipeline has already run")]
    AlreadyRun,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Tag this error with the node path it came from.
    pub fn at_node(self, path: impl Into<String>) -> Self {
        PipelineError::Node {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error only reports that the pipeline is shutting down.
    pub fn is_shutdown(&self) -> bool {
        match self {
            PipelineError::PipeClosed => true,
            PipelineError::Node { source, .. } => source.is_shutdown(),
            _ => false,
        }
    }

    /// The innermost error, skipping node tags.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::Node { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_tagging() {
        let err = PipelineError::Adaptor("disk full".into()).at_node("source/sink");
        assert_eq!(err.to_string(), "Node source/sink error: Adaptor error: disk full");
        assert!(matches!(err.root_cause(), PipelineError::Adaptor(_)));
        assert!(!err.is_shutdown());
    }

    #[test]
    fn test_pipe_closed_is_shutdown() {
        assert!(PipelineError::PipeClosed.is_shutdown());
        assert!(PipelineError::PipeClosed.at_node("a").is_shutdown());
    }
}
