//! Pipeline configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::transform::{IdentityStrategy, DEFAULT_RETENTION_DAYS};

/// Orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Days until a stored record expires.
    pub retention_days: i64,
    /// How entity ids are synthesized when an event carries none.
    pub identity: IdentityStrategy,
    /// Maximum concurrent notify/archive tasks.
    pub background_concurrency: usize,
    /// Time allowed for background tasks to finish at shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            identity: IdentityStrategy::default(),
            background_concurrency: 16,
            drain_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}
