//! Checkpoint store.
//!
//! Remembers, per source and node path, the id and timestamp of the last
//! message that got through, so a restarted source can resume from there.
//! States are keyed by `key + "-" + path`.

use crate::config::{ensure_app_data_dir, STATE_FILE};
use crate::error::{DataPipeError, Result, ResultExt};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Position of the last processed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgState {
    pub id: String,
    pub timestamp: i64,
}

impl From<&Message> for MsgState {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id().to_string(),
            timestamp: msg.timestamp(),
        }
    }
}

pub trait StateStore: Send {
    fn save(&mut self, key: &str, path: &str, msg: &Message) -> Result<()>;
    fn select(&self, key: &str, path: &str) -> Option<MsgState>;
}

fn state_key(key: &str, path: &str) -> String {
    format!("{}-{}", key, path)
}

/// Keeps states in memory and rewrites a JSON file on every save.
#[derive(Debug)]
pub struct FileStateStore {
    filename: PathBuf,
    states: BTreeMap<String, MsgState>,
}

impl FileStateStore {
    /// Open `filename`, loading any states already in it.
    pub fn open(filename: impl Into<PathBuf>) -> Result<Self> {
        let filename = filename.into();
        let states = if filename.exists() {
            let content = std::fs::read_to_string(&filename).map_err(|e| {
                DataPipeError::State(format!("Failed to read {:?}: {}", filename, e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                DataPipeError::State(format!("Failed to parse {:?}: {}", filename, e))
            })?
        } else {
            BTreeMap::new()
        };

        tracing::debug!("Opened state store {:?} with {} entries", filename, states.len());
        Ok(Self { filename, states })
    }

    /// Open the store in the app data directory.
    pub fn open_default() -> Result<Self> {
        let dir = ensure_app_data_dir().context("Opening default state store")?;
        Self::open(dir.join(STATE_FILE))
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn flush_to_disk(&self) -> Result<()> {
        let content = serde_json::to_vec_pretty(&self.states)?;
        let tmp = self.filename.with_extension("tmp");
        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, &self.filename))
            .map_err(|e| DataPipeError::State(format!("Failed to write {:?}: {}", self.filename, e)))
    }
}

impl StateStore for FileStateStore {
    fn save(&mut self, key: &str, path: &str, msg: &Message) -> Result<()> {
        self.states.insert(state_key(key, path), MsgState::from(msg));
        self.flush_to_disk()
    }

    fn select(&self, key: &str, path: &str) -> Option<MsgState> {
        self.states.get(&state_key(key, path)).cloned()
    }
}
