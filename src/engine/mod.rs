//! Execution engine module
//!
//! Drives one job through the pipeline:
//!
//! ```text
//! lock -> running -> plan -> stream (read batch) -> map -> flush ... -> finalize -> unlock
//! ```
//!
//! # Overview
//!
//! The engine module provides:
//! - `SyncEngine` - runs jobs against a source opener and a target store
//! - `SyncConfig` - read / insert batch sizes
//! - `SyncStats` - counters reported for each run

mod pipeline;
mod types;

pub use types::{RunOutcome, SyncConfig, SyncStats};

use crate::catalog::Repository;
use crate::error::{sanitize, Error, Result};
use crate::jobs::JobTracker;
use crate::lock::{AcquireOutcome, LockManager};
use crate::model::{DatasetUpdate, Job};
use crate::source::SourceOpener;
use crate::state::StateManager;
use crate::types::{DatasetId, DatasetStatus, JobAction, JobStatus};
use crate::writer::TargetStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Sync engine for running dataset jobs
#[derive(Clone)]
pub struct SyncEngine {
    repo: Arc<dyn Repository>,
    opener: Arc<dyn SourceOpener>,
    target: Arc<dyn TargetStore>,
    state: StateManager,
    locks: LockManager,
    tracker: JobTracker,
    config: SyncConfig,
    worker_id: String,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("worker_id", &self.worker_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(
        repo: Arc<dyn Repository>,
        opener: Arc<dyn SourceOpener>,
        target: Arc<dyn TargetStore>,
        locks: LockManager,
    ) -> Self {
        Self {
            tracker: JobTracker::new(repo.clone()),
            repo,
            opener,
            target,
            state: StateManager::in_memory(),
            locks,
            config: SyncConfig::default(),
            worker_id: format!("worker-{}", std::process::id()),
        }
    }

    /// Set sync configuration
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the partition state store
    #[must_use]
    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = state;
        self
    }

    /// Set the lock holder identity
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Share a job tracker (and its cancellation registry)
    #[must_use]
    pub fn with_tracker(mut self, tracker: JobTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    fn holder(&self, job: &Job) -> String {
        format!("{}/job-{}", self.worker_id, job.id)
    }

    /// Run a pending job to a terminal state.
    ///
    /// Lock contention leaves the job pending. The lock is released on every
    /// path once it was acquired.
    pub async fn run_job(&self, job: Job) -> Result<RunOutcome> {
        if job.status != JobStatus::Pending {
            return Err(Error::InvalidTransition {
                job_id: job.id,
                from: job.status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }

        let holder = self.holder(&job);
        match self.locks.acquire(job.dataset_id, &holder, None).await? {
            AcquireOutcome::Granted(_) => {}
            AcquireOutcome::AlreadyHeld(lock) => {
                info!(
                    job_id = job.id,
                    dataset_id = job.dataset_id,
                    holder = %lock.holder,
                    "Dataset locked elsewhere, job left pending"
                );
                return Ok(RunOutcome::Contended {
                    holder: lock.holder,
                });
            }
        }

        let result = self.run_locked(job.clone(), &holder).await;

        if let Err(e) = self.locks.release(job.dataset_id, &holder).await {
            warn!(job_id = job.id, dataset_id = job.dataset_id, error = %e, "Lock release failed");
        }
        result.map(RunOutcome::Finished)
    }

    /// Every error after `start` ends the job in a terminal state
    async fn run_locked(&self, job: Job, holder: &str) -> Result<Job> {
        let (job, token) = self.tracker.start(job.id, holder).await?;

        let mut stats = SyncStats::new(job.dataset_id, job.id);
        let result = match self
            .repo
            .update_dataset(
                job.dataset_id,
                DatasetUpdate::status(DatasetStatus::Syncing).with_message(None),
            )
            .await
        {
            Ok(()) => self.execute(&job, holder, &token, &mut stats).await,
            Err(e) => Err(e),
        };
        let result = match result {
            Ok(()) => self.tracker.complete(job.id, stats.rows_written).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(done) => {
                info!(
                    job_id = job.id,
                    dataset_id = job.dataset_id,
                    rows = stats.rows_written,
                    removed = stats.rows_removed,
                    target_rows = stats.target_rows,
                    coerced = stats.values_coerced,
                    duration_ms = stats.duration_ms,
                    "Sync completed"
                );
                if stats.values_coerced > 0 {
                    warn!(
                        job_id = job.id,
                        coerced = stats.values_coerced,
                        "Values of the wrong type were loaded as column defaults"
                    );
                }
                self.write_back(
                    &done,
                    DatasetUpdate {
                        status: Some(DatasetStatus::Active),
                        status_message: Some(None),
                        last_sync_at: Some(Utc::now()),
                        total_rows: Some(stats.target_rows),
                    },
                )
                .await;
                Ok(done)
            }
            Err(e) => {
                let done = self.tracker.fail(job.id, stats.rows_written, &e).await?;
                let update = if e.is_cancelled() {
                    DatasetUpdate::status(DatasetStatus::Active)
                        .with_message(Some(format!("Job {} cancelled", job.id)))
                } else {
                    DatasetUpdate::status(DatasetStatus::Error)
                        .with_message(Some(sanitize(&e.to_string())))
                };
                self.write_back(&done, update).await;
                Ok(done)
            }
        }
    }

    /// Dataset status after the job is already terminal; failures only log
    async fn write_back(&self, job: &Job, update: DatasetUpdate) {
        if let Err(e) = self.repo.update_dataset(job.dataset_id, update).await {
            warn!(
                job_id = job.id,
                dataset_id = job.dataset_id,
                error = %e,
                "Dataset status write-back failed"
            );
        }
    }

    /// Enqueue and run one job in the calling task
    pub async fn sync_dataset(&self, dataset_id: DatasetId, action: JobAction) -> Result<Job> {
        let job = self.repo.enqueue_job(dataset_id, action).await?;
        match self.run_job(job.clone()).await? {
            RunOutcome::Finished(done) => Ok(done),
            RunOutcome::Contended { holder } => {
                self.tracker.skip(job.id, "Dataset locked by another worker").await?;
                Err(Error::LockContention { dataset_id, holder })
            }
        }
    }
}

#[cfg(test)]
mod tests;
