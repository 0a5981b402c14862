//! Per-pipe throughput counters.
//!
//! Each pipe owns a [`NodeMetrics`]. Once its node starts running, and when
//! the interval is non-zero, a ticker thread periodically emits a cumulative `Metrics` event for the pipe's path
//! onto the shared event channel. Ticking stops when the pipe stops.

use crate::pipeline::event::Event;
use crossbeam_channel::{select, tick, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    records_in: AtomicU64,
    records_out: AtomicU64,
}

/// Cumulative record counters plus the optional ticker that reports them.
pub struct NodeMetrics {
    path: String,
    counters: Arc<Counters>,
    events: Sender<Event>,
    stop_tx: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl NodeMetrics {
    /// Counters for `path` with no ticker yet.
    pub fn new(path: impl Into<String>, events: Sender<Event>) -> Self {
        Self {
            path: path.into(),
            counters: Arc::new(Counters::default()),
            events,
            stop_tx: None,
            ticker: None,
        }
    }

    /// Spawn the ticker. An `interval` of zero disables periodic emission,
    /// and a running ticker is left alone. The ticker halts as soon as
    /// `closed` disconnects.
    pub fn tick_every(&mut self, interval: Duration, closed: Receiver<()>) {
        if interval.is_zero() || self.ticker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let path = self.path.clone();
        let counters = self.counters.clone();
        let events = self.events.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("metrics:{}", path))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let event = snapshot_event(&path, &counters);
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        recv(stop_rx) -> _ => break,
                        recv(closed) -> _ => break,
                    }
                }
                tracing::trace!("Metrics ticker for '{}' stopped", path);
            });
        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.ticker = Some(handle);
            }
            Err(e) => {
                tracing::warn!("Failed to spawn metrics ticker for '{}': {}", self.path, e);
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn record_in(&self) {
        self.counters.records_in.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_out(&self) {
        self.counters.records_out.fetch_add(1, Ordering::Relaxed);
    }

    /// (records_in, records_out) since creation.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.counters.records_in.load(Ordering::Relaxed),
            self.counters.records_out.load(Ordering::Relaxed),
        )
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Halt the ticker and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NodeMetrics {
    fn drop(&mut self) {
        self.stop();
    }
}

fn snapshot_event(path: &str, counters: &Counters) -> Event {
    Event::metrics(
        chrono::Utc::now().timestamp(),
        path,
        counters.records_in.load(Ordering::Relaxed),
        counters.records_out.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event::EventKind;
    use crossbeam_channel::{never, unbounded};

    #[test]
    fn test_zero_interval_disables_ticker() {
        let (tx, rx) = unbounded();
        let mut metrics = NodeMetrics::new("a", tx);
        metrics.tick_every(Duration::ZERO, never());
        assert!(!metrics.is_ticking());
        metrics.record_in();
        metrics.stop();
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot(), (1, 0));
    }

    #[test]
    fn test_ticker_reports_non_decreasing_totals() {
        let (tx, rx) = unbounded();
        let mut metrics = NodeMetrics::new("a/b", tx);
        metrics.tick_every(Duration::from_millis(5), never());

        for _ in 0..5 {
            metrics.record_in();
            metrics.record_out();
            std::thread::sleep(Duration::from_millis(8));
        }
        metrics.stop();

        let mut last = (0, 0);
        let mut seen = 0;
        for event in rx.try_iter() {
            match event.kind {
                EventKind::Metrics {
                    path,
                    records_in,
                    records_out,
                } => {
                    assert_eq!(path, "a/b");
                    assert!(records_in >= last.0);
                    assert!(records_out >= last.1);
                    last = (records_in, records_out);
                    seen += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(seen > 0);
    }

    #[test]
    fn test_stop_halts_emission() {
        let (tx, rx) = unbounded();
        let mut metrics = NodeMetrics::new("a", tx);
        metrics.tick_every(Duration::from_millis(1), never());
        std::thread::sleep(Duration::from_millis(5));
        metrics.stop();
        let _ = rx.try_iter().count();

        std::thread::sleep(Duration::from_millis(5));
        assert!(rx.try_recv().is_err());
        // second stop is a no-op
        metrics.stop();
    }

    #[test]
    fn test_new_does_not_tick_until_asked() {
        let (tx, rx) = unbounded();
        let mut metrics = NodeMetrics::new("a", tx);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!metrics.is_ticking());
        assert!(rx.try_recv().is_err());

        metrics.tick_every(Duration::from_millis(1), never());
        assert!(metrics.is_ticking());
        metrics.stop();
    }

    #[test]
    fn test_closed_signal_halts_ticker() {
        let (tx, _rx) = unbounded();
        let (closed_tx, closed_rx) = crossbeam_channel::bounded::<()>(0);
        let mut metrics = NodeMetrics::new("a", tx);
        metrics.tick_every(Duration::from_secs(60), closed_rx);
        drop(closed_tx);
        // joins promptly because the ticker saw the close signal
        metrics.stop();
        assert!(!metrics.is_ticking());
    }
}
