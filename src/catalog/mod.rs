//! Catalog module
//!
//! The catalog is the engine's view of the configuration rows owned by the
//! CRUD layer (connections, datasets, schedules) plus the rows the engine
//! writes itself (jobs, heartbeats, dataset status fields).
//!
//! # Overview
//!
//! - `Repository` - the seam between the engine and whatever stores the rows
//! - `Catalog` - JSON-file (or in-memory) implementation; every mutation is a
//!   locked read-modify-write, so several processes can share one file
//! - `CatalogSeed` - YAML import format standing in for the CRUD screens

mod file_lock;
mod store;

pub use store::{Catalog, CatalogSeed};

use crate::error::Result;
use crate::model::{
    ColumnMapping, Connection, Dataset, DatasetUpdate, Heartbeat, Job, JobFilter, Schedule,
};
use crate::types::{ConnectionId, DatasetId, JobAction, JobId, JobStatus, ScheduleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Optional fields written alongside a job transition
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub rows_processed: Option<u64>,
}

impl JobPatch {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn worker(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: Some(worker_id.into()),
            ..Self::default()
        }
    }
}

/// Storage seam for catalog rows
#[async_trait]
pub trait Repository: Send + Sync {
    // ------------------------------------------------------------------------
    // Configuration (read)
    // ------------------------------------------------------------------------

    async fn connection(&self, id: ConnectionId) -> Result<Connection>;

    async fn dataset(&self, id: DatasetId) -> Result<Dataset>;

    async fn datasets(&self) -> Result<Vec<Dataset>>;

    // ------------------------------------------------------------------------
    // Dataset write-back
    // ------------------------------------------------------------------------

    async fn update_dataset(&self, id: DatasetId, update: DatasetUpdate) -> Result<()>;

    /// Persist an inferred mapping; a mapping already present is kept
    async fn save_mapping(&self, id: DatasetId, mapping: ColumnMapping) -> Result<ColumnMapping>;

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    /// Create a pending job unless one is already pending or running.
    ///
    /// A `FullResync` supersedes a pending job (marked `skipped`); anything
    /// else fails with `AlreadyQueued`.
    async fn enqueue_job(&self, dataset_id: DatasetId, action: JobAction) -> Result<Job>;

    async fn job(&self, id: JobId) -> Result<Job>;

    async fn jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Pending or running job of a dataset
    async fn active_job(&self, dataset_id: DatasetId) -> Result<Option<Job>>;

    /// Oldest pending job whose dataset is not in `skip`
    async fn next_pending_job(&self, skip: &HashSet<DatasetId>) -> Result<Option<Job>>;

    /// Move a job along the state machine; terminal states are set once
    async fn transition_job(&self, id: JobId, to: JobStatus, patch: JobPatch) -> Result<Job>;

    /// Record progress; `rows_processed` never decreases
    async fn record_progress(&self, id: JobId, rows_processed: u64) -> Result<()>;

    /// Set the cross-process cancellation flag
    async fn request_cancel(&self, id: JobId) -> Result<Job>;

    // ------------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------------

    async fn schedules(&self) -> Result<Vec<Schedule>>;

    async fn upsert_schedule(
        &self,
        dataset_id: DatasetId,
        cron_expression: String,
        is_active: bool,
    ) -> Result<Schedule>;

    async fn remove_schedule(&self, dataset_id: DatasetId) -> Result<()>;

    async fn set_schedule_active(&self, id: ScheduleId, is_active: bool) -> Result<Schedule>;

    async fn mark_schedule_triggered(&self, id: ScheduleId, at: DateTime<Utc>) -> Result<()>;

    // ------------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------------

    async fn record_heartbeat(&self, heartbeat: Heartbeat) -> Result<()>;

    async fn last_heartbeat(&self) -> Result<Option<Heartbeat>>;
}
