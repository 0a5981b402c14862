//! Pipeline orchestrator.
//!
//! [`Pipeline::build`] initializes a node tree and starts two listeners on
//! the tree's shared channels:
//! - the error listener keeps the first error and stops the whole tree;
//! - the event listener copies each event to the taps and posts it to the
//!   monitoring endpoint.
//!
//! [`Pipeline::run`] then:
//! 1. Emits a Boot event.
//! 2. Runs the tree until the source is exhausted, fails or is stopped.
//! 3. Stops the tree and waits for in-flight deliveries.
//! 4. Emits an Exit event and shuts both listeners down.
//! 5. Returns the first error the tree reported.

use crate::adaptor::AdaptorRegistry;
use crate::config::{ApiConfig, EngineConfig};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::{Endpoints, Event};
use crate::pipeline::listener::{ErrorListener, EventListener};
use crate::pipeline::node::{Node, TreeHandle};
use crate::pipeline::pipe::PipeContext;
use crate::pipeline::telemetry::{EventTransport, HttpTransport};
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Engine version reported in Boot and Exit events.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Pipeline {
    root: Node,
    api: ApiConfig,
    context: Arc<PipeContext>,
    tree: TreeHandle,
    errors: Option<ErrorListener>,
    events: Option<EventListener>,
    errors_received: usize,
    has_run: bool,
}

impl Pipeline {
    /// Initialize `root` and start the listeners. Events are posted over
    /// HTTP when `engine.api.uri` is set.
    pub fn build(root: Node, registry: &AdaptorRegistry, engine: EngineConfig) -> PipelineResult<Self> {
        let transport: Option<Arc<dyn EventTransport>> = if engine.api.delivery_enabled() {
            Some(Arc::new(HttpTransport::new(&engine.api)?))
        } else {
            None
        };
        Self::build_with_transport(root, registry, engine, transport)
    }

    /// Like [`Pipeline::build`] with an explicit transport; `None` keeps
    /// events local to the taps.
    pub fn build_with_transport(
        mut root: Node,
        registry: &AdaptorRegistry,
        engine: EngineConfig,
        transport: Option<Arc<dyn EventTransport>>,
    ) -> PipelineResult<Self> {
        root.init(registry, &engine)?;
        let context = root
            .context()
            .ok_or_else(|| PipelineError::NotInitialized(root.name().to_string()))?;
        let tree = root.handles();

        let errors = ErrorListener::spawn(context.errors().clone(), tree.clone())?;
        let events = EventListener::spawn(
            context.events().clone(),
            transport,
            context.error_sender(),
            engine.api.fatal_delivery_errors,
        )?;

        tracing::info!("Pipeline built with {} node(s)\n{}", tree.len(), root);
        Ok(Self {
            root,
            api: engine.api,
            context,
            tree,
            errors: Some(errors),
            events: Some(events),
            errors_received: 0,
            has_run: false,
        })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    pub fn endpoints(&self) -> Endpoints {
        self.root.endpoints()
    }

    /// Stop switch usable from other threads while `run` is in progress.
    pub fn handle(&self) -> TreeHandle {
        self.tree.clone()
    }

    /// Stop every node. Safe to call repeatedly.
    pub fn stop(&self) {
        self.tree.stop();
    }

    /// Observe every event emitted from now on, in channel order.
    pub fn event_tap(&self) -> Option<Receiver<Event>> {
        self.events.as_ref().map(EventListener::tap)
    }

    /// How many errors reached the error channel during `run`.
    pub fn errors_received(&self) -> usize {
        self.errors_received
    }

    pub fn run(&mut self) -> PipelineResult<()> {
        if self.has_run {
            return Err(PipelineError::AlreadyRun);
        }
        self.has_run = true;

        let endpoints = self.endpoints();
        tracing::info!("Pipeline {} booting", VERSION);
        self.context
            .emit(Event::boot(now(), VERSION, endpoints.clone()));

        let started = self.root.start();

        self.tree.stop();
        if let Some(events) = &self.events {
            events.flush();
        }
        self.context.emit(Event::exit(now(), VERSION, endpoints));
        self.shutdown_listeners();

        let first = self.take_first_error();
        started?;
        match first {
            Some(err) => Err(err),
            None => {
                tracing::info!("Pipeline finished");
                Ok(())
            }
        }
    }

    fn shutdown_listeners(&mut self) {
        if let Some(events) = self.events.take() {
            events.finish();
        }
    }

    fn take_first_error(&mut self) -> Option<PipelineError> {
        let summary = self.errors.take()?.finish();
        self.errors_received = summary.received;
        summary.first
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.tree.stop();
        self.shutdown_listeners();
        if let Some(errors) = self.errors.take() {
            errors.finish();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.root)
            .field("api", &self.api.uri)
            .field("has_run", &self.has_run)
            .finish()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
