//! Host configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shellcache_common::RetryConfig;
use shellcache_net::FetcherConfig;
use shellcache_sw::{SwError, WorkerConfig};

/// Everything needed to host one worker, loadable from a single JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Worker configuration (origin, cache region names).
    pub worker: WorkerConfig,

    /// HTTP client settings.
    pub fetcher: FetcherConfig,

    /// Retry policy for failed installs.
    pub install_retry: RetryConfig,

    /// Deadline for a single install attempt, in milliseconds.
    pub install_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            fetcher: FetcherConfig::default(),
            install_retry: RetryConfig::default(),
            install_timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl HostConfig {
    pub fn from_json(json: &str) -> Result<Self, SwError> {
        let config: Self = serde_json::from_str(json).map_err(|e| SwError::config(e.to_string()))?;
        // Re-run the worker's own origin normalization and checks.
        let worker_json =
            serde_json::to_string(&config.worker).map_err(|e| SwError::config(e.to_string()))?;
        Ok(Self {
            worker: WorkerConfig::from_json(&worker_json)?,
            ..config
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SwError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }
}
