//! Engine types
//!
//! Settings and statistics of a sync run.

use crate::config::EngineConfig;
use crate::types::{DatasetId, JobId};
use serde::Serialize;

/// Batch settings for sync runs
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Rows per source read batch (bounds source-side memory)
    pub read_batch_size: usize,
    /// Rows per bulk load (bounds target statement size)
    pub insert_batch_size: usize,
    /// Memory is logged each time this many more rows were inserted
    pub report_interval: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            read_batch_size: 10_000,
            insert_batch_size: 1_000,
            report_interval: crate::writer::DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// Create a new sync config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the batch settings of an engine config
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            read_batch_size: config.read_batch_size,
            insert_batch_size: config.insert_batch_size,
            report_interval: config.report_interval_rows,
        }
    }

    /// Set batch sizes; the read size never drops below the insert size
    #[must_use]
    pub fn with_batch_sizes(mut self, read: usize, insert: usize) -> Self {
        self.insert_batch_size = insert.max(1);
        self.read_batch_size = read.max(self.insert_batch_size);
        self
    }

    /// Set the memory reporting interval
    #[must_use]
    pub fn with_report_interval(mut self, rows: u64) -> Self {
        self.report_interval = rows;
        self
    }
}

/// Statistics from a sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub dataset_id: DatasetId,
    pub job_id: JobId,
    /// Rows received from the source
    pub rows_read: u64,
    /// Rows loaded into the target
    pub rows_written: u64,
    pub read_batches: usize,
    pub flushes: usize,
    /// Rows removed by pre- and post-load mutations
    pub rows_removed: u64,
    /// Non-null source values loaded as a type default
    pub values_coerced: u64,
    pub partitions_reloaded: usize,
    pub full_reload: bool,
    /// Row count of the target table after the run
    pub target_rows: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    /// Create new stats
    pub fn new(dataset_id: DatasetId, job_id: JobId) -> Self {
        Self {
            dataset_id,
            job_id,
            ..Self::default()
        }
    }

    /// Count one read batch
    pub fn add_read_batch(&mut self, rows: usize) {
        self.read_batches += 1;
        self.rows_read += rows as u64;
    }

    /// Count one flush
    pub fn add_flush(&mut self, rows: usize) {
        self.flushes += 1;
        self.rows_written += rows as u64;
    }

    /// Add rows removed by a mutation
    pub fn add_removed(&mut self, rows: u64) {
        self.rows_removed += rows;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}

/// How a job run ended from the engine's point of view
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The job reached a terminal state
    Finished(crate::model::Job),
    /// Another holder owns the dataset lock; the job stays pending
    Contended { holder: String },
}
