//! Pluggable sources, sinks and transforms.
//!
//! Every adaptor sits behind the [`Adaptor`] trait. The node that owns an
//! adaptor first calls [`Adaptor::open`] with the [`Role`] it will play, then
//! hands it the node's [`Pipe`]: the root node calls [`Adaptor::drive`], every
//! other node calls [`Adaptor::consume`]. Once the loop has ended the node
//! calls [`Adaptor::stop`] exactly once.
//!
//! Adaptors are created by name through an [`AdaptorRegistry`]:
//!
//! ```ignore
//! let mut registry = AdaptorRegistry::with_builtins();
//! registry.register("memory", |ctx| Ok(Box::new(MemorySink::new(ctx.name))));
//! ```

pub mod file;
pub mod transformer;

pub use file::FileAdaptor;
pub use transformer::{Evaluator, Transformer, Verdict};

use crate::pipeline::{Pipe, PipelineError, PipelineResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Which loop a node will run its adaptor in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Root of the tree: [`Adaptor::drive`].
    Source,
    /// Anywhere below the root: [`Adaptor::consume`].
    Sink,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Sink => "sink",
        }
    }
}

/// The source/sink/transform contract.
pub trait Adaptor: Send {
    /// Acquire resources before the node reports ready. A failure here keeps
    /// the root from driving.
    fn open(&mut self, _role: Role) -> PipelineResult<()> {
        Ok(())
    }

    /// Read-and-push loop, run when the adaptor is the root of the tree.
    /// Returns when the source is exhausted, on error, or when the pipe stops.
    fn drive(&mut self, _pipe: &mut Pipe) -> PipelineResult<()> {
        Err(PipelineError::UnsupportedRole {
            kind: self.describe().kind,
            role: Role::Source.as_str(),
        })
    }

    /// Pipe-driven loop, run for every non-root node. Returns when the inbound
    /// path closes, on error, or when the pipe stops.
    fn consume(&mut self, _pipe: &mut Pipe) -> PipelineResult<()> {
        Err(PipelineError::UnsupportedRole {
            kind: self.describe().kind,
            role: Role::Sink.as_str(),
        })
    }

    /// Release any resources. Must tolerate being called more than once.
    fn stop(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    fn describe(&self) -> Description;
}

/// Display/telemetry summary of an adaptor instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub name: String,
    pub kind: String,
    pub namespace: String,
    pub uri: String,
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} {:<15} {:<30} {}",
            self.name, self.kind, self.namespace, self.uri
        )
    }
}

/// Opaque key/value configuration handed to an adaptor factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdaptorConfig(serde_json::Map<String, Value>);

impl AdaptorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &serde_json::Map<String, Value> {
        &self.0
    }

    /// Deserialize into an adaptor's typed config.
    pub fn construct<T: DeserializeOwned>(&self, node: &str) -> PipelineResult<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            PipelineError::Construction {
                node: node.to_string(),
                message: e.to_string(),
            }
        })
    }
}

impl From<serde_json::Map<String, Value>> for AdaptorConfig {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Everything a factory gets to build an adaptor for one node.
pub struct AdaptorContext<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    /// Slash-separated path from the root, e.g. `source/transform/sink`.
    pub path: &'a str,
    pub config: &'a AdaptorConfig,
}

impl AdaptorContext<'_> {
    pub fn construction_error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Construction {
            node: self.name.to_string(),
            message: message.into(),
        }
    }
}

type Factory = dyn Fn(&AdaptorContext<'_>) -> PipelineResult<Box<dyn Adaptor>> + Send + Sync;

/// Maps node `type` strings to adaptor factories.
#[derive(Clone, Default)]
pub struct AdaptorRegistry {
    factories: BTreeMap<String, Arc<Factory>>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `file` and `transformer` adaptors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("file", |ctx| Ok(Box::new(FileAdaptor::from_context(ctx)?)));
        registry.register("transformer", |ctx| {
            Ok(Box::new(Transformer::from_context(ctx)?))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&AdaptorContext<'_>) -> PipelineResult<Box<dyn Adaptor>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, ctx: &AdaptorContext<'_>) -> PipelineResult<Box<dyn Adaptor>> {
        let factory = self
            .factories
            .get(ctx.kind)
            .ok_or_else(|| PipelineError::UnknownAdaptor(ctx.kind.to_string()))?;
        factory(ctx)
    }
}

impl fmt::Debug for AdaptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptorRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
