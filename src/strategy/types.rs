//! Strategy plan types

use crate::source::SqlDialect;
use crate::writer::TargetMutation;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// One date partition: `[start, end)` plus its key (`YYYY-MM` / `YYYY-MM-DD`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionRange {
    pub key: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Facts gathered by the engine before planning
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub now: DateTime<Utc>,
    pub dialect: SqlDialect,
    /// Quoted table or parenthesised query the extraction reads from
    pub relation: String,
    /// Highest reference value already in the target
    pub watermark: Option<String>,
    /// Whether the watermark column is numeric in the target
    pub watermark_numeric: bool,
    /// Ignore watermarks and reload everything
    pub full_resync: bool,
    pub last_full_refresh_at: Option<DateTime<Utc>>,
    /// Out-of-window partitions whose source maximum moved
    pub modified_partitions: Vec<String>,
    /// Target table missing or empty
    pub target_empty: bool,
}

impl PlanContext {
    /// Context for a first load at `now`
    pub fn new(now: DateTime<Utc>, dialect: SqlDialect, relation: impl Into<String>) -> Self {
        Self {
            now,
            dialect,
            relation: relation.into(),
            watermark: None,
            watermark_numeric: false,
            full_resync: false,
            last_full_refresh_at: None,
            modified_partitions: Vec::new(),
            target_empty: true,
        }
    }

    /// Set the watermark found in the target
    #[must_use]
    pub fn with_watermark(mut self, value: Option<String>, numeric: bool) -> Self {
        self.watermark = value;
        self.watermark_numeric = numeric;
        self
    }

    #[must_use]
    pub fn with_full_resync(mut self, full_resync: bool) -> Self {
        self.full_resync = full_resync;
        self
    }

    #[must_use]
    pub fn with_target_empty(mut self, empty: bool) -> Self {
        self.target_empty = empty;
        self
    }

    #[must_use]
    pub fn with_last_full_refresh(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_full_refresh_at = at;
        self
    }

    #[must_use]
    pub fn with_modified_partitions(mut self, keys: Vec<String>) -> Self {
        self.modified_partitions = keys;
        self
    }
}

/// Extraction query plus the target mutations around the load
#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
    pub extraction_query: String,
    /// Run once before the first flush
    pub pre_load: Vec<TargetMutation>,
    /// Run after the final flush, before the job completes
    pub post_load: Vec<TargetMutation>,
    /// Partitions reloaded by a windowed date-partition run
    pub partitions: Vec<PartitionRange>,
    /// Every row of the target is replaced
    pub full_reload: bool,
}

impl SyncPlan {
    pub fn partition_keys(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.key.as_str()).collect()
    }
}
