//! Configuration module for DataPipe-RS
//!
//! This module handles everything a pipeline is configured from:
//! - [`ApiConfig`] - the monitoring endpoint telemetry is posted to
//! - [`EngineConfig`] - engine-wide settings handed to `Node::init`
//! - [`NodeConfig`] - a serializable node tree, turned into `Node`s by
//!   [`NodeConfig::into_node`]
//! - [`PipelineFile`] - all of the above in one `.json` or `.toml` file
//!
//! # App Data Location
//!
//! The default checkpoint file lives in the platform data directory:
//! - **Linux**: `~/.local/share/datapipe-rs/`
//! - **macOS**: `~/Library/Application Support/datapipe-rs/`
//! - **Windows**: `%APPDATA%\datapipe-rs\`
//!
//! # Example
//!
//! ```toml
//! channel_capacity = 128
//!
//! [api]
//! uri = "https://monitor.example.com/events"
//! interval = 5000
//! pid = "etl-01"
//! key = "secret"
//!
//! [pipeline]
//! name = "source"
//! type = "file"
//! config = { uri = "file:///data/in.json", namespace = "db.coll" }
//!
//! [[pipeline.children]]
//! name = "sink"
//! type = "file"
//! config = { uri = "stdout://" }
//! ```

use crate::adaptor::AdaptorConfig;
use crate::error::{DataPipeError, Result};
use crate::pipeline::{Node, DEFAULT_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "datapipe-rs";

/// Default checkpoint filename
pub const STATE_FILE: &str = "state.json";

// ==================== App Data Directory ====================

pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        DataPipeError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            DataPipeError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== Monitoring Endpoint ====================

/// Where and how telemetry events are delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Endpoint events are POSTed to. Empty disables delivery.
    pub uri: String,

    /// Metrics tick interval in milliseconds; 0 disables periodic metrics
    pub interval: u64,

    /// Basic auth password
    pub key: String,

    /// Basic auth username (process id)
    pub pid: String,

    /// Treat a failed delivery as a fatal pipeline error
    pub fatal_delivery_errors: bool,
}

impl ApiConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn delivery_enabled(&self) -> bool {
        !self.uri.is_empty()
    }
}

// ==================== Engine Settings ====================

/// Settings shared by every node of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub api: ApiConfig,

    /// Capacity of each parent to child data path
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_api(api: ApiConfig) -> Self {
        Self {
            api,
            ..Default::default()
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

// ==================== Topology ====================

/// One node of a serialized pipeline tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    /// Adaptor type, looked up in the adaptor registry
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub config: AdaptorConfig,

    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: AdaptorConfig::new(),
            children: Vec::new(),
        }
    }

    /// Build the `Node` tree this config describes.
    pub fn into_node(self) -> Node {
        let mut node = Node::new(self.name, self.kind, self.config);
        for child in self.children {
            node.attach(child.into_node());
        }
        node
    }

    /// Every node name in the tree, depth first.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for child in &self.children {
            names.extend(child.names());
        }
        names
    }

    /// Reject trees with repeated node names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for name in self.names() {
            if name.is_empty() {
                return Err(DataPipeError::Config("node name must not be empty".into()));
            }
            if !seen.insert(name) {
                return Err(DataPipeError::Config(format!(
                    "duplicate node name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

// ==================== Pipeline File ====================

/// A complete pipeline definition as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    pub pipeline: NodeConfig,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl PipelineFile {
    /// Load from `.toml`, or JSON for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataPipeError::Config(format!("Failed to read pipeline file {:?}: {}", path, e))
        })?;

        let file: Self = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                DataPipeError::Config(format!("Failed to parse pipeline file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                DataPipeError::Config(format!("Failed to parse pipeline file {:?}: {}", path, e))
            })?
        };

        file.pipeline.validate()?;
        Ok(file)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| DataPipeError::Serialization(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self)?
        };

        std::fs::write(path, content).map_err(|e| {
            DataPipeError::Config(format!("Failed to write pipeline file {:?}: {}", path, e))
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            api: self.api.clone(),
            channel_capacity: self.channel_capacity,
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}
