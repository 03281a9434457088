//! Lock records and outcomes

use crate::types::DatasetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A dataset-scoped, time-bounded lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub dataset_id: DatasetId,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LockRecord {
    pub fn new(
        dataset_id: DatasetId,
        holder: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            dataset_id,
            holder: holder.into(),
            acquired_at: now,
            expires_at: expiry(now, ttl),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before the lock may be taken over
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Result of an acquire attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(LockRecord),
    AlreadyHeld(LockRecord),
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted(_))
    }

    pub fn record(&self) -> &LockRecord {
        match self {
            AcquireOutcome::Granted(r) | AcquireOutcome::AlreadyHeld(r) => r,
        }
    }
}

/// Operator-facing view of an active lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub dataset_id: DatasetId,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub remaining_secs: u64,
}

impl LockInfo {
    pub fn from_record(record: &LockRecord, now: DateTime<Utc>) -> Self {
        Self {
            dataset_id: record.dataset_id,
            holder: record.holder.clone(),
            acquired_at: record.acquired_at,
            ttl_secs: record.ttl_secs,
            remaining_secs: record.remaining(now).as_secs(),
        }
    }
}

/// Target of a force-clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Dataset(DatasetId),
    All,
}
