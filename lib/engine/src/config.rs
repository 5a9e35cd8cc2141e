use fieldguard_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for an [`ExistenceEngine`](crate::ExistenceEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Coalesce concurrent misses into batched queries
    pub batching: bool,
    /// Extra wait before a batch flushes; 0 flushes on the next scheduler tick
    pub batch_window_ms: u64,
    /// Upper bound on one flush; `None` waits forever
    pub flush_timeout_ms: Option<u64>,
    pub cache: CachePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batching: true,
            batch_window_ms: 0,
            flush_timeout_ms: Some(30_000),
            cache: CachePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("invalid config {}: {e}", path.display())))
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn flush_timeout(&self) -> Option<Duration> {
        self.flush_timeout_ms.map(Duration::from_millis)
    }
}

/// Result cache settings. The default never expires anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_ms: Option<u64>,
    pub max_entries: Option<usize>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: None,
            max_entries: None,
        }
    }
}

impl CachePolicy {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}
