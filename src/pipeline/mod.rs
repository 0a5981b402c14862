//! Tree-structured message routing engine.
//!
//! One source node feeds a tree of transformers and sinks. Each node runs on
//! its own thread and talks to its children through a [`Pipe`] that
//! broadcasts every message to every child. Errors and telemetry from
//! anywhere in the tree travel over two channels shared by all pipes and are
//! consumed by the [`Pipeline`].
//!
//! # Architecture
//!
//! ```text
//! [source] ──► [transformer] ──► [sink]
//!          │                └──► [sink]
//!          └──► [sink]
//!
//! every pipe ──► errors ──► error listener ──► stop the tree
//!            └─► events ──► event listener ──► taps / HTTP POST
//! ```

pub mod error;
pub mod event;
pub mod executor;
pub mod listener;
pub mod metrics;
pub mod node;
pub mod pipe;
pub mod telemetry;

pub use error::{PipelineError, PipelineResult};
pub use event::{Endpoints, Event, EventKind};
pub use executor::{Pipeline, VERSION};
pub use metrics::NodeMetrics;
pub use node::{Node, TreeHandle};
pub use pipe::{HandlerResult, Pipe, PipeContext, PipeHandle, DEFAULT_CHANNEL_CAPACITY};
pub use telemetry::{EventTransport, HttpTransport};
