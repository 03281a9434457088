//! Supervisor types

use crate::model::Heartbeat;
use crate::types::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Whether this process is consuming jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Running,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Identity of a running worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub pid: u32,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

/// Answer to `worker_status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub status: WorkerState,
    /// Latest heartbeat in the catalog, from whichever worker wrote it
    pub last_heartbeat: Option<Heartbeat>,
    pub active_jobs: usize,
    pub current_job: Option<JobId>,
    pub worker_info: Option<WorkerInfo>,
}

/// Timing of the consumer loop
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Fallback poll when no wake-up arrives
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Run the cron scheduler alongside the consumer
    pub run_scheduler: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            run_scheduler: true,
        }
    }
}

impl SupervisorConfig {
    pub fn from_engine(config: &crate::config::EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            run_scheduler: true,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, enabled: bool) -> Self {
        self.run_scheduler = enabled;
        self
    }
}
