//! Catalog entity types
//!
//! These rows are owned by the CRUD layer; the engine reads connections and
//! datasets and writes back job rows plus a handful of dataset fields.

use super::mapping::ColumnMapping;
use crate::error::{Error, Result};
use crate::types::{
    ConnectionId, DatasetId, DatasetStatus, JobAction, JobId, JobStatus, MergeMode,
    PartitionType, ScheduleId, SourceType, SyncStrategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Connection
// ============================================================================

/// Source descriptor; read-only to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or file path for sqlite/duckdb
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// `base64(nonce || AES-256-GCM ciphertext)` of the password
    #[serde(default)]
    pub encrypted_password: Option<String>,
    /// Plain password, accepted for development catalogs only
    #[serde(default)]
    pub password: Option<String>,
    /// Full connection string; overrides the individual fields
    #[serde(default)]
    pub connection_string: Option<String>,
    /// SSL mode (disable, prefer, require)
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_connection_status")]
    pub status: String,
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_connection_status() -> String {
    "active".to_string()
}

impl Connection {
    /// Minimal connection of the given type
    pub fn new(id: ConnectionId, name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id,
            name: name.into(),
            source_type,
            host: None,
            port: None,
            database: None,
            username: None,
            encrypted_password: None,
            password: None,
            connection_string: None,
            ssl_mode: default_ssl_mode(),
            status: default_connection_status(),
        }
    }

    /// File-backed DuckDB connection
    pub fn duckdb_file(id: ConnectionId, name: impl Into<String>, path: impl Into<String>) -> Self {
        let mut conn = Self::new(id, name, SourceType::Duckdb);
        conn.database = Some(path.into());
        conn
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// One sync unit bound to a connection and a target table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub connection_id: ConnectionId,
    pub name: String,
    #[serde(default)]
    pub source_table: Option<String>,
    #[serde(default)]
    pub source_query: Option<String>,
    pub target_table: String,
    #[serde(default)]
    pub sync_strategy: SyncStrategy,
    /// Watermark / window column for incremental strategies
    #[serde(default)]
    pub reference_column: Option<String>,
    #[serde(default)]
    pub partition_column: Option<String>,
    #[serde(default)]
    pub partition_type: PartitionType,
    #[serde(default)]
    pub refresh_window_days: Option<u32>,
    /// Reload out-of-window partitions whose `modified_column` moved
    #[serde(default)]
    pub detect_modified: bool,
    #[serde(default)]
    pub modified_column: Option<String>,
    /// Reload every partition once per week
    #[serde(default)]
    pub weekly_full_refresh: bool,
    #[serde(default)]
    pub delete_window_days: Option<u32>,
    /// Cap on rows loaded per job
    #[serde(default)]
    pub row_limit: Option<u64>,
    #[serde(default)]
    pub unique_column: Option<String>,
    #[serde(default)]
    pub merge_mode: MergeMode,
    #[serde(default)]
    pub column_mapping: Option<ColumnMapping>,
    #[serde(default)]
    pub custom_where: Option<String>,
    /// Interval shorthand or cron expression
    #[serde(default)]
    pub schedule_code: Option<String>,
    #[serde(default)]
    pub status: DatasetStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_rows: u64,
}

impl Dataset {
    /// Full-refresh dataset reading a whole table
    pub fn new(
        id: DatasetId,
        connection_id: ConnectionId,
        source_table: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        let source_table = source_table.into();
        Self {
            id,
            connection_id,
            name: source_table.clone(),
            source_table: Some(source_table),
            source_query: None,
            target_table: target_table.into(),
            sync_strategy: SyncStrategy::FullRefresh,
            reference_column: None,
            partition_column: None,
            partition_type: PartitionType::Monthly,
            refresh_window_days: None,
            detect_modified: false,
            modified_column: None,
            weekly_full_refresh: false,
            delete_window_days: None,
            row_limit: None,
            unique_column: None,
            merge_mode: MergeMode::Append,
            column_mapping: None,
            custom_where: None,
            schedule_code: None,
            status: DatasetStatus::Pending,
            status_message: None,
            last_sync_at: None,
            total_rows: 0,
        }
    }

    /// Set the sync strategy and its reference column
    #[must_use]
    pub fn with_strategy(mut self, strategy: SyncStrategy, reference: Option<&str>) -> Self {
        self.sync_strategy = strategy;
        self.reference_column = reference.map(String::from);
        self
    }

    /// Set the row cap
    #[must_use]
    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Validation run when the CRUD layer saves a dataset
    pub fn validate(&self) -> Result<()> {
        match (&self.source_table, &self.source_query) {
            (None, None) => {
                return Err(Error::config(format!(
                    "Dataset '{}' must have either source_table or source_query",
                    self.name
                )))
            }
            (Some(t), _) if t.trim().is_empty() => {
                return Err(Error::config("source_table must not be empty"))
            }
            _ => {}
        }
        if self.target_table.trim().is_empty() {
            return Err(Error::config("target_table must not be empty"));
        }
        if let Some(mapping) = &self.column_mapping {
            mapping.validate()?;
        }
        crate::strategy::check_requirements(self)
    }
}

// ============================================================================
// Job
// ============================================================================

/// One execution of a dataset sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub dataset_id: DatasetId,
    pub action: JobAction,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time progress was recorded
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub rows_processed: u64,
    /// Row cap captured at enqueue time
    #[serde(default)]
    pub row_limit: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Cross-process cooperative cancellation flag
    #[serde(default)]
    pub cancel_requested: bool,
    /// Worker that ran the job
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Job {
    /// New pending job
    pub fn pending(id: JobId, dataset: &Dataset, action: JobAction, now: DateTime<Utc>) -> Self {
        Self {
            id,
            dataset_id: dataset.id,
            action,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            rows_processed: 0,
            row_limit: dataset.row_limit,
            error_message: None,
            cancel_requested: false,
            worker_id: None,
        }
    }

    /// Wall-clock run time so far (or total, once finished)
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.completed_at.unwrap_or(now) - start)
    }
}

/// Filter for job listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub dataset_id: Option<DatasetId>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.dataset_id.map_or(true, |id| job.dataset_id == id)
            && self.status.map_or(true, |s| job.status == s)
    }
}

/// Fields of a dataset the engine writes back after a job
#[derive(Debug, Clone, Default)]
pub struct DatasetUpdate {
    pub status: Option<DatasetStatus>,
    /// `Some(None)` clears the message
    pub status_message: Option<Option<String>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_rows: Option<u64>,
}

impl DatasetUpdate {
    pub fn status(status: DatasetStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.status_message = Some(message);
        self
    }

    pub fn apply(self, dataset: &mut Dataset) {
        if let Some(status) = self.status {
            dataset.status = status;
        }
        if let Some(message) = self.status_message {
            dataset.status_message = message;
        }
        if let Some(at) = self.last_sync_at {
            dataset.last_sync_at = Some(at);
        }
        if let Some(total) = self.total_rows {
            dataset.total_rows = total;
        }
    }
}

// ============================================================================
// Schedule & Heartbeat
// ============================================================================

/// Cron trigger for one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub dataset_id: DatasetId,
    pub cron_expression: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Periodic liveness record of a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub worker_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub active_jobs: usize,
}

impl Heartbeat {
    /// Whether the heartbeat is older than `stale_after`
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: std::time::Duration) -> bool {
        let age = now - self.timestamp;
        age.to_std().map_or(false, |age| age > stale_after)
    }
}
