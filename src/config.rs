//! Engine configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file (or no
//! file at all) yields a working single-process setup.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `server.api_secret`
pub const API_SECRET_ENV: &str = "SOLIDAFY_API_SECRET";

// ============================================================================
// Top-Level Engine Config
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// DuckDB analytics database file (`:memory:` for an ephemeral store)
    pub target_path: String,

    /// Catalog file holding connections, datasets, jobs and schedules
    pub catalog_path: Option<PathBuf>,

    /// Per-dataset sync state file (partition watermarks)
    pub state_path: Option<PathBuf>,

    /// Directory for cross-process lock files; in-memory locks when unset
    pub lock_dir: Option<PathBuf>,

    /// Rows pulled from the source cursor per read batch
    pub read_batch_size: usize,

    /// Rows per bulk load statement
    pub insert_batch_size: usize,

    /// Resource usage is logged every time this many rows have been inserted
    pub report_interval_rows: u64,

    /// Lock time-to-live, refreshed after every flush
    pub lock_ttl_secs: u64,

    /// Supervisor poll interval when the queue is empty
    pub poll_interval_ms: u64,

    /// Heartbeat period
    pub heartbeat_interval_secs: u64,

    /// A heartbeat older than this counts as stale
    pub heartbeat_stale_secs: u64,

    /// A running job without progress for this long counts as stuck
    pub stuck_threshold_secs: u64,

    /// Scheduler evaluation period
    pub scheduler_tick_secs: u64,

    /// Finished jobs older than this many days are pruned; 0 keeps them all
    pub job_retention_days: u64,

    /// REST server settings
    pub server: ServerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_path: "solidafy.duckdb".to_string(),
            catalog_path: Some(PathBuf::from("catalog.json")),
            state_path: Some(PathBuf::from("sync-state.json")),
            lock_dir: None,
            read_batch_size: 10_000,
            insert_batch_size: 1_000,
            report_interval_rows: 50_000,
            lock_ttl_secs: 3_600,
            poll_interval_ms: 1_000,
            heartbeat_interval_secs: 10,
            heartbeat_stale_secs: 60,
            stuck_threshold_secs: 600,
            scheduler_tick_secs: 30,
            job_retention_days: 30,
            server: ServerSettings::default(),
        }
    }
}

/// REST server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Port to listen on
    pub port: u16,

    /// HS256 secret for operator tokens; privileged routes are open when unset
    pub api_secret: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            api_secret: None,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory configuration for tests and one-shot runs
    pub fn ephemeral() -> Self {
        Self {
            target_path: ":memory:".to_string(),
            catalog_path: None,
            state_path: None,
            lock_dir: None,
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file, applying environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string, applying environment overrides
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(API_SECRET_ENV) {
            if !secret.is_empty() {
                self.server.api_secret = Some(secret);
            }
        }
    }

    /// Check invariants between settings
    pub fn validate(&self) -> Result<()> {
        if self.insert_batch_size == 0 || self.read_batch_size == 0 {
            return Err(Error::config("batch sizes must be greater than zero"));
        }
        if self.read_batch_size < self.insert_batch_size {
            return Err(Error::config(format!(
                "read_batch_size ({}) must be >= insert_batch_size ({})",
                self.read_batch_size, self.insert_batch_size
            )));
        }
        if self.lock_ttl_secs == 0 {
            return Err(Error::config("lock_ttl_secs must be greater than zero"));
        }
        if self.report_interval_rows == 0 {
            return Err(Error::config("report_interval_rows must be greater than zero"));
        }
        Ok(())
    }

    /// Set batch sizes
    #[must_use]
    pub fn with_batch_sizes(mut self, read: usize, insert: usize) -> Self {
        self.read_batch_size = read;
        self.insert_batch_size = insert;
        self
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_stale(&self) -> Duration {
        Duration::from_secs(self.heartbeat_stale_secs)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs)
    }

    /// `None` when finished jobs are kept forever
    pub fn job_retention(&self) -> Option<Duration> {
        (self.job_retention_days > 0).then(|| Duration::from_secs(self.job_retention_days * 86_400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.read_batch_size, 10_000);
        assert_eq!(config.insert_batch_size, 1_000);
        assert_eq!(config.report_interval_rows, 50_000);
        assert_eq!(config.stuck_threshold(), Duration::from_secs(600));
        assert_eq!(config.job_retention(), Some(Duration::from_secs(30 * 86_400)));
    }

    #[test]
    fn test_zero_retention_keeps_jobs() {
        let config = EngineConfig::from_yaml("job_retention_days: 0\n").unwrap();
        assert_eq!(config.job_retention(), None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml(
            r"
target_path: /data/analytics.duckdb
read_batch_size: 5000
server:
  port: 9000
",
        )
        .unwrap();

        assert_eq!(config.target_path, "/data/analytics.duckdb");
        assert_eq!(config.read_batch_size, 5000);
        assert_eq!(config.insert_batch_size, 1_000);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_read_batch_must_cover_insert_batch() {
        let err = EngineConfig::from_yaml("read_batch_size: 100\ninsert_batch_size: 500\n")
            .unwrap_err();
        assert!(err.to_string().contains("read_batch_size"));
    }

    #[test]
    fn test_empty_yaml() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config.lock_ttl_secs, 3_600);
    }

    #[test]
    fn test_ephemeral() {
        let config = EngineConfig::ephemeral();
        assert_eq!(config.target_path, ":memory:");
        assert!(config.catalog_path.is_none());
    }
}
