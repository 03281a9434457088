//! Job lifecycle tracker

use crate::catalog::{JobPatch, Repository};
use crate::error::{sanitize, Error, ErrorKind, Result};
use crate::model::Job;
use crate::types::{JobId, JobStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// In-process cancellation tokens of running jobs
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(job_id, token.clone());
        }
        token
    }

    /// Cancel a registered job; false when this process does not run it
    pub fn cancel(&self, job_id: JobId) -> bool {
        let token = self.tokens.lock().ok().and_then(|t| t.get(&job_id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let Ok(tokens) = self.tokens.lock() else {
            return 0;
        };
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    pub fn remove(&self, job_id: JobId) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(&job_id);
        }
    }

    pub fn active(&self) -> usize {
        self.tokens.lock().map_or(0, |t| t.len())
    }
}

/// Persists job state transitions and exposes cooperative cancellation
#[derive(Clone)]
pub struct JobTracker {
    repo: Arc<dyn Repository>,
    tokens: CancellationRegistry,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("active", &self.tokens.active())
            .finish_non_exhaustive()
    }
}

impl JobTracker {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            tokens: CancellationRegistry::default(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.tokens
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// pending -> running; the caller already holds the dataset lock
    pub async fn start(&self, job_id: JobId, worker_id: &str) -> Result<(Job, CancellationToken)> {
        let job = self
            .repo
            .transition_job(job_id, JobStatus::Running, JobPatch::worker(worker_id))
            .await?;
        let token = self.tokens.register(job_id);
        if job.cancel_requested {
            token.cancel();
        }
        info!(job_id, dataset_id = job.dataset_id, worker_id, "Job started");
        Ok((job, token))
    }

    /// Record rows flushed so far
    pub async fn progress(&self, job_id: JobId, rows: u64) -> Result<()> {
        self.repo.record_progress(job_id, rows).await
    }

    pub async fn complete(&self, job_id: JobId, rows: u64) -> Result<Job> {
        self.finish(job_id, JobStatus::Completed, rows, None).await
    }

    /// Terminal state for a job that ended with an error
    pub async fn fail(&self, job_id: JobId, rows: u64, error: &Error) -> Result<Job> {
        let status = match error.kind() {
            ErrorKind::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };
        let message = (status == JobStatus::Failed).then(|| sanitize(&error.to_string()));
        self.finish(job_id, status, rows, message).await
    }

    /// Mark a pending job as superseded
    pub async fn skip(&self, job_id: JobId, reason: &str) -> Result<Job> {
        self.repo
            .transition_job(job_id, JobStatus::Skipped, JobPatch::error(reason))
            .await
    }

    async fn finish(
        &self,
        job_id: JobId,
        status: JobStatus,
        rows: u64,
        error_message: Option<String>,
    ) -> Result<Job> {
        self.tokens.remove(job_id);
        let patch = JobPatch {
            error_message,
            rows_processed: Some(rows),
            ..JobPatch::default()
        };
        let job = self.repo.transition_job(job_id, status, patch).await?;
        match status {
            JobStatus::Failed => warn!(
                job_id,
                dataset_id = job.dataset_id,
                error = job.error_message.as_deref().unwrap_or_default(),
                "Job failed"
            ),
            _ => info!(
                job_id,
                dataset_id = job.dataset_id,
                status = %status,
                rows = job.rows_processed,
                "Job finished"
            ),
        }
        Ok(job)
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    /// Request cancellation.
    ///
    /// A pending job is cancelled at once; a running one is flagged and stops
    /// at its next read-batch boundary, whichever process runs it.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        let job = self.repo.job(job_id).await?;
        match job.status {
            JobStatus::Pending => {
                self.repo
                    .transition_job(job_id, JobStatus::Cancelled, JobPatch::default())
                    .await
            }
            JobStatus::Running => {
                let job = self.repo.request_cancel(job_id).await?;
                let local = self.tokens.cancel(job_id);
                info!(job_id, local, "Cancellation requested");
                Ok(job)
            }
            status => Err(Error::InvalidTransition {
                job_id,
                from: status.to_string(),
                to: JobStatus::Cancelled.to_string(),
            }),
        }
    }

    /// Fail with `Cancelled` when a stop was requested for this job
    pub async fn check_cancelled(&self, job_id: JobId, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::Cancelled { job_id });
        }
        // the flag may have been set by another process
        if self.repo.job(job_id).await?.cancel_requested {
            token.cancel();
            return Err(Error::Cancelled { job_id });
        }
        Ok(())
    }
}
