//! Node configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shoal_core::{ShoalError, ShoalResult};
use shoal_stream::StreamConfig;
use shoal_views::Classifiers;

use crate::LogFormat;

/// Node configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name this process claims in the assignment index
    pub server_name: String,
    /// Key of the authority assignment index
    pub assignment_key: String,
    /// Backing store address, `host:port`
    pub store_addr: String,
    /// Logical database selected on every connection
    pub database: u32,
    /// Tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Grid cell size used by the default classifiers
    pub cell_size: f64,
    pub log_format: LogFormat,
    pub stream: StreamConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            server_name: "server-1".into(),
            assignment_key: "main".into(),
            store_addr: "127.0.0.1:6379".into(),
            database: 0,
            tick_interval_ms: 100,
            cell_size: 10.0,
            log_format: LogFormat::Compact,
            stream: StreamConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Fast ticks and short snapshot timeouts for in-process tests
    pub fn local(server_name: &str) -> Self {
        NodeConfig {
            server_name: server_name.into(),
            tick_interval_ms: 5,
            stream: StreamConfig::local(),
            ..Default::default()
        }
    }

    /// Grid classifiers at the configured cell size
    pub fn classifiers(&self) -> Classifiers {
        Classifiers::grid(self.cell_size)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Parse and validate; missing keys take their defaults
    pub fn from_json(json: &str) -> ShoalResult<Self> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|e| ShoalError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ShoalResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ShoalError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> ShoalResult<()> {
        if self.server_name.is_empty() {
            return Err(ShoalError::InvalidConfig("server_name is empty".into()));
        }
        if self.assignment_key.is_empty() {
            return Err(ShoalError::InvalidConfig("assignment_key is empty".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ShoalError::InvalidConfig(
                "tick_interval_ms must be positive".into(),
            ));
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(ShoalError::InvalidConfig(format!(
                "cell_size must be a positive number, got {}",
                self.cell_size
            )));
        }
        self.stream.validate()
    }
}
