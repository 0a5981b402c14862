//! # DataPipe-RS: tree-structured data movement engine
//!
//! Reads records from one source, passes them through optional transform
//! stages and writes them to one or more sinks, while reporting boot, exit
//! and throughput telemetry to a monitoring endpoint.
//!
//! ## Architecture
//!
//! - **Message**: the unit of data, an op type plus a JSON document
//! - **Pipeline**: a tree of nodes, one thread each, connected by broadcasting pipes
//! - **Adaptors**: pluggable sources, sinks and transformers behind one trait
//! - **Scripting**: Rhai scripts rewrite or filter messages in transformer nodes
//! - **Communication**: Crossbeam channels for data, errors and telemetry
//!
//! ## Example
//!
//! ```ignore
//! use datapipe_rs::{
//!     adaptor::{AdaptorConfig, AdaptorRegistry},
//!     config::EngineConfig,
//!     pipeline::{Node, Pipeline},
//! };
//!
//! let root = Node::new(
//!     "source",
//!     "file",
//!     AdaptorConfig::new().with("uri", "file:///data/in.json"),
//! )
//! .with_child(Node::new(
//!     "sink",
//!     "file",
//!     AdaptorConfig::new().with("uri", "stdout://"),
//! ));
//!
//! let registry = AdaptorRegistry::with_builtins();
//! let mut pipeline = Pipeline::build(root, &registry, EngineConfig::default())?;
//! pipeline.run()?;
//! ```

pub mod adaptor;
pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod scripting;
pub mod state;

// Re-export commonly used types
pub use adaptor::{Adaptor, AdaptorConfig, AdaptorRegistry};
pub use config::{ApiConfig, EngineConfig, NodeConfig, PipelineFile};
pub use error::{DataPipeError, Result};
pub use message::{Message, OpType};
pub use pipeline::{Node, Pipeline, PipelineError};
