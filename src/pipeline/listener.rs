//! Background consumers of the shared error and event channels.

use crate::pipeline::error::PipelineError;
use crate::pipeline::event::Event;
use crate::pipeline::node::TreeHandle;
use crate::pipeline::telemetry::EventTransport;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// What the error listener saw over its lifetime.
#[derive(Debug, Default)]
pub struct ErrorSummary {
    pub first: Option<PipelineError>,
    pub received: usize,
}

/// Drains the error channel. The first error stops the whole tree.
pub struct ErrorListener {
    shutdown: Sender<()>,
    thread: JoinHandle<ErrorSummary>,
}

impl ErrorListener {
    pub fn spawn(errors: Receiver<PipelineError>, tree: TreeHandle) -> std::io::Result<Self> {
        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("pipeline:errors".into())
            .spawn(move || {
                let mut summary = ErrorSummary::default();
                loop {
                    select! {
                        recv(errors) -> err => match err {
                            Ok(err) => Self::record(&mut summary, err, &tree),
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => {
                            while let Ok(err) = errors.try_recv() {
                                Self::record(&mut summary, err, &tree);
                            }
                            break;
                        }
                    }
                }
                summary
            })?;
        Ok(Self { shutdown, thread })
    }

    fn record(summary: &mut ErrorSummary, err: PipelineError, tree: &TreeHandle) {
        summary.received += 1;
        if summary.first.is_some() {
            tracing::debug!("Pipeline error after shutdown: {}", err);
            return;
        }
        tracing::error!("Pipeline error: {}. Shutting down pipeline", err);
        tree.stop();
        summary.first = Some(err);
    }

    /// Drain whatever is queued, stop the thread and return the summary.
    pub fn finish(self) -> ErrorSummary {
        let Self { shutdown, thread } = self;
        drop(shutdown);
        thread.join().unwrap_or_else(|_| {
            tracing::error!("Error listener panicked");
            ErrorSummary::default()
        })
    }
}

enum Control {
    /// Relay everything queued, wait for in-flight deliveries, then ack.
    Flush(Sender<()>),
    Shutdown,
}

type Taps = Arc<Mutex<Vec<Sender<Event>>>>;

fn lock(taps: &Taps) -> MutexGuard<'_, Vec<Sender<Event>>> {
    taps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drains the event channel, copies each event to the taps and posts it
/// through the transport.
pub struct EventListener {
    control: Sender<Control>,
    taps: Taps,
    thread: JoinHandle<()>,
}

impl EventListener {
    pub fn spawn(
        events: Receiver<Event>,
        transport: Option<Arc<dyn EventTransport>>,
        errors: Sender<PipelineError>,
        fatal_delivery_errors: bool,
    ) -> std::io::Result<Self> {
        let (control, control_rx) = unbounded();
        let taps: Taps = Arc::default();
        let mut relay = Relay {
            transport,
            errors,
            fatal_delivery_errors,
            taps: taps.clone(),
            in_flight: Vec::new(),
        };

        let thread = thread::Builder::new()
            .name("pipeline:events".into())
            .spawn(move || loop {
                select! {
                    recv(events) -> event => match event {
                        Ok(event) => relay.handle(event),
                        Err(_) => {
                            relay.wait();
                            break;
                        }
                    },
                    recv(control_rx) -> cmd => {
                        relay.drain(&events);
                        relay.wait();
                        match cmd {
                            Ok(Control::Flush(ack)) => {
                                let _ = ack.send(());
                            }
                            Ok(Control::Shutdown) | Err(_) => break,
                        }
                    }
                }
            })?;

        Ok(Self {
            control,
            taps,
            thread,
        })
    }

    /// A receiver observing every event from now on, in channel order.
    pub fn tap(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        lock(&self.taps).push(tx);
        rx
    }

    /// Block until every queued event has been relayed and every delivery
    /// has finished.
    pub fn flush(&self) {
        let (ack, ack_rx) = bounded(1);
        if self.control.send(Control::Flush(ack)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Flush, then stop the listener thread.
    pub fn finish(self) {
        let _ = self.control.send(Control::Shutdown);
        if self.thread.join().is_err() {
            tracing::error!("Event listener panicked");
        }
    }
}

struct Relay {
    transport: Option<Arc<dyn EventTransport>>,
    errors: Sender<PipelineError>,
    fatal_delivery_errors: bool,
    taps: Taps,
    in_flight: Vec<JoinHandle<()>>,
}

impl Relay {
    fn handle(&mut self, event: Event) {
        tracing::trace!("Pipeline event: {}", event);
        lock(&self.taps).retain(|tap| tap.send(event.clone()).is_ok());

        let Some(transport) = self.transport.clone() else {
            return;
        };
        let body = match event.to_json() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Cannot serialize {} event: {}", event.name(), e);
                return;
            }
        };

        self.in_flight.retain(|h| !h.is_finished());
        let errors = self.errors.clone();
        let fatal = self.fatal_delivery_errors;
        let name = event.name();
        let deliver = move || {
            match transport.deliver(&body) {
                Ok(()) => tracing::debug!("Delivered {} event", name),
                Err(e) if fatal => {
                    let _ = errors.send(e);
                }
                Err(e) => tracing::warn!("Dropped {} event: {}", name, e),
            }
        };

        match thread::Builder::new().name("pipeline:deliver".into()).spawn(deliver.clone()) {
            Ok(handle) => self.in_flight.push(handle),
            Err(e) => {
                tracing::warn!("Cannot spawn delivery thread, delivering inline: {}", e);
                deliver();
            }
        }
    }

    fn drain(&mut self, events: &Receiver<Event>) {
        while let Ok(event) = events.try_recv() {
            self.handle(event);
        }
    }

    fn wait(&mut self) {
        for handle in self.in_flight.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Telemetry delivery thread panicked");
            }
        }
    }
}
