//! Cron trigger evaluation

use super::expression::CronSchedule;
use crate::catalog::Repository;
use crate::error::{Error, Result};
use crate::types::{DatasetId, JobAction, JobId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Jobs enqueued, per dataset
    pub enqueued: Vec<(DatasetId, JobId)>,
    /// Datasets due but already pending or running
    pub already_queued: Vec<DatasetId>,
    /// Schedules that could not be evaluated
    pub errors: usize,
}

/// Evaluates active schedules and enqueues due datasets
#[derive(Clone)]
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn Repository>, tick: Duration) -> Self {
        Self { repo, tick }
    }

    /// Enqueue every schedule with a firing time in `(since, now]`.
    ///
    /// `since` is the schedule's last trigger, or `now - tick` for schedules
    /// that never fired. Enqueue is idempotent: a dataset with a pending or
    /// running job is left alone.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        let tick = chrono::Duration::from_std(self.tick).unwrap_or_else(|_| chrono::Duration::zero());
        let fallback = now - tick;

        for schedule in self.repo.schedules().await? {
            if !schedule.is_active {
                continue;
            }
            let cron = match CronSchedule::parse(&schedule.cron_expression) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(schedule_id = schedule.id, error = %e, "Skipping invalid schedule");
                    outcome.errors += 1;
                    continue;
                }
            };
            let since = schedule.last_triggered_at.unwrap_or(fallback);
            if !cron.is_due_between(since, now) {
                continue;
            }

            match self.repo.enqueue_job(schedule.dataset_id, JobAction::Scheduled).await {
                Ok(job) => {
                    info!(
                        dataset_id = schedule.dataset_id,
                        job_id = job.id,
                        cron = %cron,
                        "Scheduled sync enqueued"
                    );
                    outcome.enqueued.push((schedule.dataset_id, job.id));
                }
                Err(Error::AlreadyQueued { dataset_id, job_id }) => {
                    debug!(dataset_id, job_id, "Scheduled sync skipped, job already queued");
                    outcome.already_queued.push(dataset_id);
                }
                Err(e) => {
                    warn!(dataset_id = schedule.dataset_id, error = %e, "Scheduled enqueue failed");
                    outcome.errors += 1;
                    continue;
                }
            }
            self.repo.mark_schedule_triggered(schedule.id, now).await?;
        }
        Ok(outcome)
    }

    /// Tick until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_secs = self.tick.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}
