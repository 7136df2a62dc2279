//! Stream configuration

use serde::{Deserialize, Serialize};
use shoal_core::{ShoalError, ShoalResult};

/// Reader bootstrap policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Ticks to wait for a snapshot reply before issuing the read again
    pub snapshot_timeout_ticks: u64,
    /// Retries after which a stuck bootstrap is reported as an error.
    /// Retrying continues past this point.
    pub max_snapshot_retries: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            snapshot_timeout_ticks: 300,
            max_snapshot_retries: 5,
        }
    }
}

impl StreamConfig {
    /// Short timeouts for local or in-process backends
    pub fn local() -> Self {
        StreamConfig {
            snapshot_timeout_ticks: 10,
            max_snapshot_retries: 3,
        }
    }

    /// Long timeouts for congested or remote backends
    pub fn tolerant() -> Self {
        StreamConfig {
            snapshot_timeout_ticks: 1200,
            max_snapshot_retries: 10,
        }
    }

    pub fn validate(&self) -> ShoalResult<()> {
        if self.snapshot_timeout_ticks == 0 {
            return Err(ShoalError::InvalidConfig(
                "snapshot_timeout_ticks must be positive".into(),
            ));
        }
        Ok(())
    }
}
