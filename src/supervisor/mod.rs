//! Worker supervisor module
//!
//! The long-lived consumer of a worker process:
//!
//! ```text
//! poll next pending job (skipping locked datasets) -> SyncEngine::run_job -> poll ...
//!   + heartbeat every interval {timestamp, pid, uptime, active_jobs}
//!   + cron scheduler tick
//! ```

mod types;
mod worker;

pub use types::{SupervisorConfig, WorkerInfo, WorkerState, WorkerStatus};
pub use worker::WorkerSupervisor;
