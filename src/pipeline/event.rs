//! Telemetry events emitted by the engine.
//!
//! Wire shape (one JSON object per event):
//!
//! ```text
//! {"ts": 1700000000, "event": "boot",    "version": "0.1.0", "endpoints": {"source": "file"}}
//! {"ts": 1700000001, "event": "metrics", "path": "source/sink", "records_in": 3, "records_out": 3}
//! {"ts": 1700000002, "event": "exit",    "version": "0.1.0", "endpoints": {"source": "file"}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Map of node name to node type.
pub type Endpoints = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum EventKind {
    Boot {
        version: String,
        endpoints: Endpoints,
    },
    Metrics {
        path: String,
        records_in: u64,
        records_out: u64,
    },
    Exit {
        version: String,
        endpoints: Endpoints,
    },
}

impl Event {
    pub fn boot(ts: i64, version: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            ts,
            kind: EventKind::Boot {
                version: version.into(),
                endpoints,
            },
        }
    }

    pub fn metrics(ts: i64, path: impl Into<String>, records_in: u64, records_out: u64) -> Self {
        Self {
            ts,
            kind: EventKind::Metrics {
                path: path.into(),
                records_in,
                records_out,
            },
        }
    }

    pub fn exit(ts: i64, version: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            ts,
            kind: EventKind::Exit {
                version: version.into(),
                endpoints,
            },
        }
    }

    /// The `event` tag as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::Boot { .. } => "boot",
            EventKind::Metrics { .. } => "metrics",
            EventKind::Exit { .. } => "exit",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{} event at {}", self.name(), self.ts),
        }
    }
}
