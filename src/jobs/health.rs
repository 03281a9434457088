//! Stuck-job and crash-signature heuristics
//!
//! Nothing here changes job or lock state. Findings are surfaced to the
//! operator, who decides whether to cancel jobs or clear locks.

use crate::lock::LockInfo;
use crate::model::{Heartbeat, Job};
use crate::types::{DatasetId, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Thresholds of the health heuristics
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// Running this long without progress counts as stuck
    pub stuck_after: Duration,
    /// A heartbeat older than this is stale
    pub heartbeat_stale_after: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            stuck_after: Duration::from_secs(600),
            heartbeat_stale_after: Duration::from_secs(60),
        }
    }
}

/// A running job past the stuck threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckJob {
    pub job_id: JobId,
    pub dataset_id: DatasetId,
    pub running_secs: u64,
    pub idle_secs: u64,
    pub rows_processed: u64,
}

/// Operator-facing health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub last_heartbeat: Option<Heartbeat>,
    pub heartbeat_stale: bool,
    pub running_jobs: Vec<JobId>,
    pub stuck_jobs: Vec<StuckJob>,
    /// Locks without a running job for their dataset
    pub orphaned_locks: Vec<LockInfo>,
    /// Stale heartbeat while jobs are still marked running
    pub crash_suspected: bool,
    pub warnings: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}

fn secs(d: chrono::Duration) -> u64 {
    d.to_std().map_or(0, |d| d.as_secs())
}

/// Combine job rows, locks and the last heartbeat into a report
pub fn diagnose(
    jobs: &[Job],
    locks: &[LockInfo],
    heartbeat: Option<&Heartbeat>,
    now: DateTime<Utc>,
    thresholds: HealthThresholds,
) -> HealthReport {
    let running: Vec<&Job> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Running)
        .collect();

    let stuck_jobs: Vec<StuckJob> = running
        .iter()
        .filter_map(|job| {
            let running_secs = secs(job.running_for(now)?);
            let idle_secs = secs(now - job.updated_at);
            let limit = thresholds.stuck_after.as_secs();
            (running_secs > limit && idle_secs > limit).then(|| StuckJob {
                job_id: job.id,
                dataset_id: job.dataset_id,
                running_secs,
                idle_secs,
                rows_processed: job.rows_processed,
            })
        })
        .collect();

    let running_datasets: HashSet<DatasetId> = running.iter().map(|j| j.dataset_id).collect();
    let orphaned_locks: Vec<LockInfo> = locks
        .iter()
        .filter(|l| !running_datasets.contains(&l.dataset_id))
        .cloned()
        .collect();

    let heartbeat_stale =
        heartbeat.map_or(true, |hb| hb.is_stale(now, thresholds.heartbeat_stale_after));
    let crash_suspected = heartbeat_stale && !running.is_empty();

    let mut warnings = Vec::new();
    if crash_suspected {
        let age = heartbeat.map_or_else(
            || "no heartbeat recorded".to_string(),
            |hb| format!("last heartbeat {}s ago", secs(now - hb.timestamp)),
        );
        warnings.push(format!(
            "Possible worker crash: {} job(s) marked running but {age}; \
             cancel the jobs and clear their locks once confirmed",
            running.len()
        ));
    }
    for job in &stuck_jobs {
        warnings.push(format!(
            "Job {} (dataset {}) running for {}s without progress for {}s",
            job.job_id, job.dataset_id, job.running_secs, job.idle_secs
        ));
    }
    for lock in &orphaned_locks {
        warnings.push(format!(
            "Lock on dataset {} held by {} has no running job",
            lock.dataset_id, lock.holder
        ));
    }

    HealthReport {
        generated_at: now,
        last_heartbeat: heartbeat.cloned(),
        heartbeat_stale,
        running_jobs: running.iter().map(|j| j.id).collect(),
        stuck_jobs,
        orphaned_locks,
        crash_suspected,
        warnings,
    }
}
