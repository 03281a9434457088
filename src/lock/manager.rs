//! Dataset lock manager

use super::store::{FileLockStore, LockStore, MemoryLockStore};
use super::types::{expiry, AcquireOutcome, LockInfo, LockRecord, LockScope};
use crate::error::Result;
use crate::types::DatasetId;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// TTL-bounded mutual exclusion per dataset
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    default_ttl: Duration,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Process-local locks
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryLockStore::new()), default_ttl)
    }

    /// Lock files in a directory shared by worker processes
    pub fn file_backed(dir: impl AsRef<Path>, default_ttl: Duration) -> Result<Self> {
        Ok(Self::new(Arc::new(FileLockStore::new(dir)?), default_ttl))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Grant the lock unless a live one exists; never two concurrent grants
    pub async fn acquire(
        &self,
        dataset_id: DatasetId,
        holder: &str,
        ttl: Option<Duration>,
    ) -> Result<AcquireOutcome> {
        let now = Utc::now();
        let record = LockRecord::new(dataset_id, holder, now, ttl.unwrap_or(self.default_ttl));
        let outcome = self.store.try_insert(record, now).await?;
        match &outcome {
            AcquireOutcome::Granted(lock) => {
                debug!(dataset_id, holder, ttl_secs = lock.ttl_secs, "Lock acquired");
            }
            AcquireOutcome::AlreadyHeld(lock) => {
                debug!(dataset_id, holder, owner = %lock.holder, "Lock already held");
            }
        }
        Ok(outcome)
    }

    /// Release the lock if `holder` still owns it
    pub async fn release(&self, dataset_id: DatasetId, holder: &str) -> Result<bool> {
        let released = self.store.remove_if_holder(dataset_id, holder).await?;
        if released {
            debug!(dataset_id, holder, "Lock released");
        } else {
            warn!(dataset_id, holder, "Release skipped: lock not held by this holder");
        }
        Ok(released)
    }

    /// Push the expiry out by a full TTL; false once the lock was lost
    pub async fn refresh(&self, dataset_id: DatasetId, holder: &str) -> Result<bool> {
        let expires_at = expiry(Utc::now(), self.default_ttl);
        self.store.extend(dataset_id, holder, expires_at).await
    }

    /// Live locks with holder and remaining TTL
    pub async fn list(&self) -> Result<Vec<LockInfo>> {
        let now = Utc::now();
        let mut locks: Vec<LockInfo> = self
            .store
            .list()
            .await?
            .iter()
            .filter(|r| !r.is_expired(now))
            .map(|r| LockInfo::from_record(r, now))
            .collect();
        locks.sort_by_key(|l| l.dataset_id);
        Ok(locks)
    }

    /// Datasets currently locked
    pub async fn held_datasets(&self) -> Result<HashSet<DatasetId>> {
        Ok(self.list().await?.into_iter().map(|l| l.dataset_id).collect())
    }

    /// Operator recovery: drop locks regardless of holder.
    ///
    /// Job rows are left untouched.
    pub async fn force_clear(&self, scope: LockScope) -> Result<usize> {
        let removed = match scope {
            LockScope::Dataset(id) => usize::from(self.store.remove(id).await?),
            LockScope::All => self.store.clear().await?,
        };
        info!(?scope, removed, "Locks force-cleared");
        Ok(removed)
    }
}
