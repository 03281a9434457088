//! Batch writer

use super::convert::convert_rows;
use super::target::TargetStore;
use crate::error::{Error, Result};
use crate::model::ColumnMapping;
use crate::types::Row;
use std::sync::Arc;
use sysinfo::System;

/// Default rows between memory reports
pub const DEFAULT_REPORT_INTERVAL: u64 = 50_000;

/// Flushes fixed-size bulk loads into a target table
pub struct BatchWriter {
    target: Arc<dyn TargetStore>,
    insert_batch_size: usize,
    report_interval: u64,
    inserted: u64,
    coerced: u64,
    next_report: u64,
    system: System,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("insert_batch_size", &self.insert_batch_size)
            .field("report_interval", &self.report_interval)
            .field("inserted", &self.inserted)
            .field("coerced", &self.coerced)
            .finish_non_exhaustive()
    }
}

impl BatchWriter {
    /// Create a writer flushing `insert_batch_size` rows per statement
    pub fn new(target: Arc<dyn TargetStore>, insert_batch_size: usize) -> Self {
        Self {
            target,
            insert_batch_size: insert_batch_size.max(1),
            report_interval: DEFAULT_REPORT_INTERVAL,
            inserted: 0,
            coerced: 0,
            next_report: DEFAULT_REPORT_INTERVAL,
            system: System::new(),
        }
    }

    /// Set the memory reporting interval
    #[must_use]
    pub fn with_report_interval(mut self, rows: u64) -> Self {
        self.report_interval = rows.max(1);
        self.next_report = self.inserted + self.report_interval;
        self
    }

    /// Rows per bulk load
    pub fn insert_batch_size(&self) -> usize {
        self.insert_batch_size
    }

    /// Rows written by this writer so far
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Non-null values loaded as a default because their type did not fit
    pub fn coerced(&self) -> u64 {
        self.coerced
    }

    /// Bulk-load one batch of rows.
    ///
    /// `rows` must not be empty. Each call commits on its own; earlier calls
    /// are not rolled back when a later one fails.
    pub async fn insert(
        &mut self,
        table: &str,
        mapping: &ColumnMapping,
        rows: &[Row],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Err(Error::load("insert requires at least one row"));
        }

        let (batch, coerced) = convert_rows(rows, mapping)?;
        let written = self.target.append(table, batch).await?;
        self.inserted += written as u64;
        self.coerced += coerced;

        tracing::debug!(table = %table, rows = written, total = self.inserted, "Flushed batch");
        self.maybe_report(table);
        Ok(written)
    }

    /// Log resident memory whenever the cumulative count crosses the interval
    fn maybe_report(&mut self, table: &str) {
        if self.inserted < self.next_report {
            return;
        }
        while self.next_report <= self.inserted {
            self.next_report += self.report_interval;
        }

        match self.resident_memory_mb() {
            Some(mb) => tracing::info!(
                table = %table,
                rows = self.inserted,
                memory_mb = mb,
                "Load progress"
            ),
            None => tracing::info!(table = %table, rows = self.inserted, "Load progress"),
        }
    }

    fn resident_memory_mb(&mut self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        self.system.refresh_process(pid);
        self.system.process(pid).map(|p| p.memory() / 1024 / 1024)
    }
}
