//! The conduit between a node and its children.
//!
//! A [`Pipe`] has one inbound data path (absent for the root), one outbound
//! listener per child, a [`NodeMetrics`] collector and a reference to the
//! tree-wide [`PipeContext`]. The context holds the shared error and event
//! channels; it is created once by the root pipe and every child pipe joined
//! below it shares the same instance.
//!
//! ```text
//!              ┌──────────── PipeContext (errors, events) ────────────┐
//!              │                                                       │
//! [root pipe] ─┼─► listener ──► [child pipe] ─► listener ──► [grandchild]
//!              └─► listener ──► [child pipe]
//! ```
//!
//! `send` broadcasts: every registered listener receives every message in
//! order. Data paths are bounded, so a slow listener blocks the sender.

use crate::message::Message;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::Event;
use crate::pipeline::metrics::NodeMetrics;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default capacity of each parent → child data path.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Tree-wide channels and settings, created once at the root.
pub struct PipeContext {
    err_tx: Sender<PipelineError>,
    err_rx: Receiver<PipelineError>,
    event_tx: Sender<Event>,
    event_rx: Receiver<Event>,
    metrics_interval: Duration,
    channel_capacity: usize,
}

impl PipeContext {
    pub fn new(metrics_interval: Duration, channel_capacity: usize) -> Arc<Self> {
        let (err_tx, err_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        Arc::new(Self {
            err_tx,
            err_rx,
            event_tx,
            event_rx,
            metrics_interval,
            channel_capacity: channel_capacity.max(1),
        })
    }

    /// Push a fatal error for the pipeline's error listener.
    pub fn report(&self, err: PipelineError) {
        // The context owns a receiver, so this only fails if it was dropped.
        let _ = self.err_tx.send(err);
    }

    /// Push a telemetry event for the pipeline's event listener.
    pub fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub fn errors(&self) -> &Receiver<PipelineError> {
        &self.err_rx
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.event_rx
    }

    pub fn error_sender(&self) -> Sender<PipelineError> {
        self.err_tx.clone()
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }
}

struct PipeControl {
    path: String,
    stopped: AtomicBool,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

/// Cloneable cross-thread stop switch for one pipe.
///
/// Stopping disconnects the pipe's close signal, which unblocks a `listen`
/// waiting for input and any `send` waiting on a full listener.
#[derive(Clone)]
pub struct PipeHandle {
    control: Arc<PipeControl>,
}

impl PipeHandle {
    fn new(path: String) -> Self {
        let (close_tx, close_rx) = bounded(0);
        Self {
            control: Arc::new(PipeControl {
                path,
                stopped: AtomicBool::new(false),
                close_tx: Mutex::new(Some(close_tx)),
                close_rx,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.control.path
    }

    /// Signal the pipe to stop. Returns `true` the first time only.
    pub fn stop(&self) -> bool {
        if self.control.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.control.close_tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.control.stopped.load(Ordering::Acquire)
    }

    fn closed(&self) -> &Receiver<()> {
        &self.control.close_rx
    }
}

impl std::fmt::Debug for PipeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeHandle")
            .field("path", &self.control.path)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// What a `listen` handler wants done with a message.
pub type HandlerResult = PipelineResult<Option<Message>>;

pub struct Pipe {
    name: String,
    inbound: Option<Receiver<Message>>,
    listeners: Vec<Sender<Message>>,
    context: Arc<PipeContext>,
    handle: PipeHandle,
    metrics: NodeMetrics,
}

impl Pipe {
    /// Create a root pipe with fresh shared channels.
    pub fn new_root(name: impl Into<String>, metrics_interval: Duration, channel_capacity: usize) -> Self {
        let context = PipeContext::new(metrics_interval, channel_capacity);
        let name = name.into();
        let path = name.clone();
        Self::assemble(name, path, None, context)
    }

    /// Create a child pipe joined to `parent`. The child shares the parent's
    /// context and gets its own inbound path, registered as one of the
    /// parent's listeners.
    pub fn join(parent: &mut Pipe, name: impl Into<String>) -> Self {
        let context = parent.context.clone();
        let (tx, rx) = bounded(context.channel_capacity());
        parent.listeners.push(tx);

        let name = name.into();
        let path = format!("{}/{}", parent.path(), name);
        Self::assemble(name, path, Some(rx), context)
    }

    fn assemble(
        name: String,
        path: String,
        inbound: Option<Receiver<Message>>,
        context: Arc<PipeContext>,
    ) -> Self {
        let handle = PipeHandle::new(path.clone());
        let metrics = NodeMetrics::new(path, context.event_tx.clone());
        Self {
            name,
            inbound,
            listeners: Vec::new(),
            context,
            handle,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        self.handle.path()
    }

    pub fn context(&self) -> &Arc<PipeContext> {
        &self.context
    }

    pub fn handle(&self) -> PipeHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Start the periodic metrics ticker, if the context has an interval.
    pub fn start_metrics(&mut self) {
        self.metrics
            .tick_every(self.context.metrics_interval(), self.handle.closed().clone());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }

    /// Deliver `msg` to every listener, blocking while a listener is full.
    ///
    /// A listener whose receiving end has gone away is dropped and the rest
    /// still get the message. Fails with [`PipelineError::PipeClosed`] once
    /// this pipe is stopped or its last listener is gone.
    pub fn send(&mut self, msg: Message) -> PipelineResult<()> {
        if self.handle.is_stopped() {
            return Err(PipelineError::PipeClosed);
        }

        let count = self.listeners.len();
        let mut msg = Some(msg);
        let mut gone = Vec::new();
        for (i, listener) in self.listeners.iter().enumerate() {
            let out = if i + 1 == count { msg.take() } else { msg.clone() };
            let Some(out) = out else { break };
            if !self.deliver(listener, out)? {
                gone.push(i);
            }
        }

        if !gone.is_empty() {
            for i in gone.into_iter().rev() {
                self.listeners.remove(i);
            }
            tracing::warn!(
                "Pipe '{}' lost {} listener(s), {} left",
                self.path(),
                count - self.listeners.len(),
                self.listeners.len()
            );
            if self.listeners.is_empty() {
                return Err(PipelineError::PipeClosed);
            }
        }
        self.metrics.record_out();
        Ok(())
    }

    /// `Ok(false)` when the listener's receiving end is gone.
    fn deliver(&self, listener: &Sender<Message>, msg: Message) -> PipelineResult<bool> {
        select! {
            send(listener, msg) -> res => match res {
                Ok(()) => Ok(true),
                Err(_) if self.handle.is_stopped() => Err(PipelineError::PipeClosed),
                Err(_) => Ok(false),
            },
            recv(self.handle.closed()) -> _ => Err(PipelineError::PipeClosed),
        }
    }

    /// Run `handler` over each inbound message until the inbound path closes
    /// or this pipe is stopped.
    ///
    /// `Ok(Some(msg))` forwards `msg` to this pipe's listeners, `Ok(None)`
    /// drops it, and an error ends the loop and is returned to the caller.
    pub fn listen<F>(&mut self, mut handler: F) -> PipelineResult<()>
    where
        F: FnMut(Message) -> HandlerResult,
    {
        let inbound = self.inbound.clone().ok_or(PipelineError::NoInbound)?;
        loop {
            if self.handle.is_stopped() {
                return Ok(());
            }
            let msg = select! {
                recv(inbound) -> msg => match msg {
                    Ok(msg) => msg,
                    Err(_) => return Ok(()),
                },
                recv(self.handle.closed()) -> _ => return Ok(()),
            };

            self.metrics.record_in();
            if let Some(out) = handler(msg)? {
                match self.send(out) {
                    Ok(()) => {}
                    Err(e) if e.is_shutdown() => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Drop the outbound listeners so children drain what is queued and then
    /// see their inbound path close.
    pub fn close_outbound(&mut self) {
        self.listeners.clear();
    }

    /// Release the inbound path and halt the metrics collector. Safe to call
    /// on an already stopped or drained pipe.
    pub fn stop(&mut self) {
        self.handle.stop();
        self.inbound = None;
        self.listeners.clear();
        self.metrics.stop();
    }

    /// Push a fatal error, tagged with this pipe's path, onto the shared
    /// error channel.
    pub fn report(&self, err: PipelineError) {
        self.context.report(err.at_node(self.path()));
    }

    /// Push a telemetry event onto the shared event channel.
    pub fn emit(&self, event: Event) {
        self.context.emit(event);
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("path", &self.path())
            .field("listeners", &self.listeners.len())
            .field("has_inbound", &self.inbound.is_some())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
