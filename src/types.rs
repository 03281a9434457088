//! Common types used throughout Solidafy Sync
//!
//! This module contains shared type definitions, type aliases,
//! and the enums stored on catalog rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// A single source row: column name to value, in source column order
pub type Row = serde_json::Map<String, JsonValue>;

/// Connection identifier
pub type ConnectionId = i64;

/// Dataset identifier
pub type DatasetId = i64;

/// Job identifier
pub type JobId = i64;

/// Schedule identifier
pub type ScheduleId = i64;

/// Implements `Display` + `FromStr` from the serde snake_case names
macro_rules! snake_case_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable lowercase name (as stored in the catalog)
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::config(format!(
                        "Unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// ============================================================================
// Source Types
// ============================================================================

/// Relational source engine of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// PostgreSQL (attached through DuckDB)
    Postgres,
    /// MySQL / MariaDB (attached through DuckDB)
    Mysql,
    /// Microsoft SQL Server (native TDS client)
    Mssql,
    /// SQLite file (attached through DuckDB)
    Sqlite,
    /// DuckDB file
    Duckdb,
}

snake_case_enum!(SourceType {
    Postgres => "postgres",
    Mysql => "mysql",
    Mssql => "mssql",
    Sqlite => "sqlite",
    Duckdb => "duckdb",
});

impl SourceType {
    /// Default TCP port for networked engines
    pub fn default_port(&self) -> u16 {
        match self {
            SourceType::Postgres => 5432,
            SourceType::Mysql => 3306,
            SourceType::Mssql => 1433,
            SourceType::Sqlite | SourceType::Duckdb => 0,
        }
    }
}

// ============================================================================
// Sync Strategy
// ============================================================================

/// Algorithm deciding which rows are extracted and how the target is mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Truncate the target and reload everything
    #[default]
    FullRefresh,
    /// Append rows with `reference_column > watermark`
    Timestamp,
    /// Append rows with a monotonic integer id above the last loaded one
    Id,
    /// Delete and reinsert a trailing date window
    DateDeleteInsert,
    /// Reload date partitions inside a sliding window
    DatePartition,
}

snake_case_enum!(SyncStrategy {
    FullRefresh => "full_refresh",
    Timestamp => "timestamp",
    Id => "id",
    DateDeleteInsert => "date_delete_insert",
    DatePartition => "date_partition",
});

/// Granularity of a date partition key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionType {
    /// `YYYY-MM` keys
    #[default]
    Monthly,
    /// `YYYY-MM-DD` keys
    Daily,
}

snake_case_enum!(PartitionType {
    Monthly => "monthly",
    Daily => "daily",
});

/// How incremental loads treat rows whose unique key already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Plain append; duplicates are left for read-time handling
    #[default]
    Append,
    /// Append, then keep only the newest row per `unique_column`
    Dedupe,
}

snake_case_enum!(MergeMode {
    Append => "append",
    Dedupe => "dedupe",
});

// ============================================================================
// Status Enums
// ============================================================================

/// Dataset status as shown to the CRUD layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    #[default]
    Pending,
    Active,
    Syncing,
    Error,
}

snake_case_enum!(DatasetStatus {
    Pending => "pending",
    Active => "active",
    Syncing => "syncing",
    Error => "error",
});

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

snake_case_enum!(JobStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Skipped => "skipped",
});

impl JobStatus {
    /// Terminal states are set exactly once
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// Pending or running jobs block a new enqueue for the same dataset
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Allowed edges of the job state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Pending, JobStatus::Skipped)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

/// What started a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Operator pressed "sync now"
    #[default]
    Manual,
    /// Cron trigger fired
    Scheduled,
    /// Ignore watermarks, truncate and reload everything
    FullResync,
}

snake_case_enum!(JobAction {
    Manual => "manual",
    Scheduled => "scheduled",
    FullResync => "full_resync",
});

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("full_refresh", SyncStrategy::FullRefresh)]
    #[test_case("timestamp", SyncStrategy::Timestamp)]
    #[test_case("ID", SyncStrategy::Id)]
    #[test_case("date_delete_insert", SyncStrategy::DateDeleteInsert)]
    #[test_case(" date_partition ", SyncStrategy::DatePartition)]
    fn test_strategy_from_str(input: &str, expected: SyncStrategy) {
        assert_eq!(input.parse::<SyncStrategy>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        let err = "merge".parse::<SyncStrategy>().unwrap_err();
        assert!(err.to_string().contains("Unknown SyncStrategy"));
    }

    #[test]
    fn test_job_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Skipped));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Skipped));
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&SyncStrategy::DateDeleteInsert).unwrap(),
            "\"date_delete_insert\""
        );
        assert_eq!(JobAction::FullResync.to_string(), "full_resync");
        assert!(JobStatus::Skipped.is_terminal());
        assert!(JobStatus::Running.is_active());
    }
}
