//! Operator-facing facade over catalog, locks, jobs and the worker

use super::types::TriggerAllOutcome;
use crate::catalog::Repository;
use crate::error::{Error, Result};
use crate::jobs::{diagnose, HealthReport, HealthThresholds, JobTracker};
use crate::lock::{LockInfo, LockManager, LockScope};
use crate::model::{Job, JobFilter, Schedule};
use crate::schedule::to_cron;
use crate::supervisor::{WorkerStatus, WorkerSupervisor};
use crate::types::{DatasetId, JobAction, JobId, ScheduleId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for operator actions
#[derive(Clone)]
pub struct ControlPlane {
    repo: Arc<dyn Repository>,
    worker: WorkerSupervisor,
    thresholds: HealthThresholds,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("worker", &self.worker)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    pub fn new(worker: WorkerSupervisor) -> Self {
        Self {
            repo: worker.engine().repository().clone(),
            worker,
            thresholds: HealthThresholds::default(),
        }
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn worker(&self) -> &WorkerSupervisor {
        &self.worker
    }

    fn locks(&self) -> &LockManager {
        self.worker.engine().locks()
    }

    fn tracker(&self) -> &JobTracker {
        self.worker.engine().tracker()
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Enqueue a job; fails with `AlreadyQueued` while one is pending or running
    pub async fn trigger(&self, dataset_id: DatasetId, action: JobAction) -> Result<Job> {
        let job = self.repo.enqueue_job(dataset_id, action).await?;
        info!(dataset_id, job_id = job.id, action = %action, "Sync triggered");
        self.worker.wake().await;
        Ok(job)
    }

    /// Enqueue a manual job for every dataset without an active one
    pub async fn trigger_all(&self) -> Result<TriggerAllOutcome> {
        let mut outcome = TriggerAllOutcome::default();
        for dataset in self.repo.datasets().await? {
            match self.repo.enqueue_job(dataset.id, JobAction::Manual).await {
                Ok(job) => outcome.enqueued.push(job),
                Err(Error::AlreadyQueued { dataset_id, .. }) => {
                    outcome.already_queued.push(dataset_id);
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            enqueued = outcome.enqueued.len(),
            already_queued = outcome.already_queued.len(),
            "Triggered all datasets"
        );
        self.worker.wake().await;
        Ok(outcome)
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        self.tracker().cancel(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.repo.jobs(filter).await
    }

    // ========================================================================
    // Worker
    // ========================================================================

    pub async fn worker_status(&self) -> Result<WorkerStatus> {
        self.worker.status().await
    }

    pub async fn worker_start(&self) -> Result<WorkerStatus> {
        self.worker.start().await
    }

    pub async fn worker_stop(&self, cancel_in_flight: bool) -> Result<WorkerStatus> {
        self.worker.stop(cancel_in_flight).await
    }

    pub async fn worker_restart(&self) -> Result<WorkerStatus> {
        self.worker.restart().await
    }

    // ========================================================================
    // Locks
    // ========================================================================

    pub async fn list_locks(&self) -> Result<Vec<LockInfo>> {
        self.locks().list().await
    }

    /// Force-clear one dataset lock, whoever holds it
    pub async fn delete_lock(&self, dataset_id: DatasetId) -> Result<bool> {
        let removed = self.locks().force_clear(LockScope::Dataset(dataset_id)).await? > 0;
        if removed {
            warn!(dataset_id, "Lock cleared by operator");
        }
        Ok(removed)
    }

    pub async fn delete_all_locks(&self) -> Result<usize> {
        let removed = self.locks().force_clear(LockScope::All).await?;
        warn!(removed, "All locks cleared by operator");
        Ok(removed)
    }

    // ========================================================================
    // Schedules
    // ========================================================================

    /// Set a dataset's schedule from a shorthand code or cron expression.
    ///
    /// `manual` (or an empty code) removes the schedule and returns `None`.
    pub async fn update_schedule(&self, dataset_id: DatasetId, code: &str) -> Result<Option<Schedule>> {
        self.repo.dataset(dataset_id).await?;
        match to_cron(code)? {
            Some(cron) => {
                let schedule = self.repo.upsert_schedule(dataset_id, cron, true).await?;
                info!(dataset_id, cron = %schedule.cron_expression, "Schedule updated");
                Ok(Some(schedule))
            }
            None => {
                self.repo.remove_schedule(dataset_id).await?;
                info!(dataset_id, "Schedule removed");
                Ok(None)
            }
        }
    }

    pub async fn toggle_schedule(&self, schedule_id: ScheduleId, is_active: bool) -> Result<Schedule> {
        self.repo.set_schedule_active(schedule_id, is_active).await
    }

    pub async fn schedules(&self) -> Result<Vec<Schedule>> {
        self.repo.schedules().await
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Stuck jobs, orphaned locks and crash signatures; changes nothing
    pub async fn health(&self) -> Result<HealthReport> {
        let jobs = self
            .repo
            .jobs(&JobFilter {
                status: Some(crate::types::JobStatus::Running),
                ..JobFilter::default()
            })
            .await?;
        let locks = self.locks().list().await?;
        let heartbeat = self.repo.last_heartbeat().await?;
        Ok(diagnose(
            &jobs,
            &locks,
            heartbeat.as_ref(),
            Utc::now(),
            self.thresholds,
        ))
    }
}
