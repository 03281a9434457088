//! Lock storage backends
//!
//! `MemoryLockStore` serialises a single process. `FileLockStore` keeps one
//! JSON file per dataset in a shared directory so several worker processes on
//! one host (or a shared volume) exclude each other.

use super::types::{AcquireOutcome, LockRecord};
use crate::error::{Error, Result};
use crate::types::DatasetId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Atomic conditional storage for lock records
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Insert `record` unless a live lock exists; an expired lock is replaced
    async fn try_insert(&self, record: LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome>;

    /// Replace the expiry of a lock owned by `holder`
    async fn extend(
        &self,
        dataset_id: DatasetId,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Remove a lock only when owned by `holder`
    async fn remove_if_holder(&self, dataset_id: DatasetId, holder: &str) -> Result<bool>;

    /// Remove a lock whoever holds it
    async fn remove(&self, dataset_id: DatasetId) -> Result<bool>;

    /// Remove every lock, returning how many were removed
    async fn clear(&self) -> Result<usize>;

    /// All stored locks, expired ones included
    async fn list(&self) -> Result<Vec<LockRecord>>;
}

// ============================================================================
// Memory Store
// ============================================================================

/// Process-local lock table
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    locks: Arc<Mutex<BTreeMap<DatasetId, LockRecord>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_insert(&self, record: LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome> {
        let mut locks = self.locks.lock().await;
        if let Some(existing) = locks.get(&record.dataset_id) {
            if !existing.is_expired(now) {
                return Ok(AcquireOutcome::AlreadyHeld(existing.clone()));
            }
        }
        locks.insert(record.dataset_id, record.clone());
        Ok(AcquireOutcome::Granted(record))
    }

    async fn extend(
        &self,
        dataset_id: DatasetId,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        match locks.get_mut(&dataset_id) {
            Some(lock) if lock.holder == holder => {
                lock.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if_holder(&self, dataset_id: DatasetId, holder: &str) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        if locks.get(&dataset_id).is_some_and(|l| l.holder == holder) {
            locks.remove(&dataset_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn remove(&self, dataset_id: DatasetId) -> Result<bool> {
        Ok(self.locks.lock().await.remove(&dataset_id).is_some())
    }

    async fn clear(&self) -> Result<usize> {
        let mut locks = self.locks.lock().await;
        let count = locks.len();
        locks.clear();
        Ok(count)
    }

    async fn list(&self) -> Result<Vec<LockRecord>> {
        Ok(self.locks.lock().await.values().cloned().collect())
    }
}

// ============================================================================
// File Store
// ============================================================================

/// One `dataset-<id>.lock` JSON file per held lock.
///
/// A lock is created by hard-linking a fully written temp file into place,
/// which fails when the name already exists. Expired locks are moved aside
/// with a rename before the new link is attempted.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    dir: PathBuf,
    seq: Arc<AtomicU64>,
}

impl FileLockStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::config(format!("Failed to create lock dir {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            seq: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, dataset_id: DatasetId) -> PathBuf {
        self.dir.join(format!("dataset-{dataset_id}.lock"))
    }

    /// Unique scratch name inside the lock directory
    fn scratch_path(&self, dataset_id: DatasetId, kind: &str) -> PathBuf {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".dataset-{dataset_id}.{kind}.{}.{n}",
            std::process::id()
        ))
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&FileLockStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| Error::state(format!("lock task failed: {e}")))?
    }

    fn read(path: &Path) -> Result<Option<LockRecord>> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|e| {
                Error::state(format!("Corrupt lock file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_scratch(&self, record: &LockRecord, kind: &str) -> Result<PathBuf> {
        let scratch = self.scratch_path(record.dataset_id, kind);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&scratch)?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
        file.sync_all()?;
        Ok(scratch)
    }

    /// Link the scratch file into place; false when the name is taken
    fn link(scratch: &Path, path: &Path) -> Result<bool> {
        match fs::hard_link(scratch, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Move an expired lock aside; false if it changed under us
    fn evict_expired(&self, path: &Path, dataset_id: DatasetId, now: DateTime<Utc>) -> Result<bool> {
        let aside = self.scratch_path(dataset_id, "expired");
        match fs::rename(path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        // another acquirer may have replaced the expired file in between
        let moved = Self::read(&aside).ok().flatten();
        if moved.as_ref().is_some_and(|r| !r.is_expired(now)) {
            let restored = Self::link(&aside, path)?;
            let _ = fs::remove_file(&aside);
            if !restored {
                warn!(dataset_id, "Live lock was displaced during takeover");
            }
            return Ok(false);
        }
        let _ = fs::remove_file(&aside);
        Ok(true)
    }

    fn try_insert_sync(&self, record: &LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome> {
        let path = self.lock_path(record.dataset_id);
        let scratch = self.write_scratch(record, "new")?;

        let outcome = (|| -> Result<AcquireOutcome> {
            for _ in 0..2 {
                if Self::link(&scratch, &path)? {
                    return Ok(AcquireOutcome::Granted(record.clone()));
                }
                match Self::read(&path) {
                    Ok(Some(existing)) if !existing.is_expired(now) => {
                        return Ok(AcquireOutcome::AlreadyHeld(existing));
                    }
                    Ok(_) | Err(Error::State { .. }) => {
                        if !self.evict_expired(&path, record.dataset_id, now)? {
                            break;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            match Self::read(&path)? {
                Some(existing) => Ok(AcquireOutcome::AlreadyHeld(existing)),
                None => Err(Error::state(format!(
                    "Lock for dataset {} kept changing during acquire",
                    record.dataset_id
                ))),
            }
        })();

        let _ = fs::remove_file(&scratch);
        outcome
    }

    fn extend_sync(
        &self,
        dataset_id: DatasetId,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let path = self.lock_path(dataset_id);
        let Some(mut record) = Self::read(&path)? else {
            return Ok(false);
        };
        if record.holder != holder {
            return Ok(false);
        }
        record.expires_at = expires_at;
        let scratch = self.write_scratch(&record, "refresh")?;
        fs::rename(&scratch, &path)?;
        Ok(true)
    }

    fn remove_sync(&self, dataset_id: DatasetId, holder: Option<&str>) -> Result<bool> {
        let path = self.lock_path(dataset_id);
        if let Some(holder) = holder {
            match Self::read(&path)? {
                Some(record) if record.holder == holder => {}
                _ => return Ok(false),
            }
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lock_files(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_lock = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("dataset-") && n.ends_with(".lock"));
            if is_lock {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl LockStore for FileLockStore {
    async fn try_insert(&self, record: LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome> {
        self.blocking(move |store| store.try_insert_sync(&record, now))
            .await
    }

    async fn extend(
        &self,
        dataset_id: DatasetId,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let holder = holder.to_string();
        self.blocking(move |store| store.extend_sync(dataset_id, &holder, expires_at))
            .await
    }

    async fn remove_if_holder(&self, dataset_id: DatasetId, holder: &str) -> Result<bool> {
        let holder = holder.to_string();
        self.blocking(move |store| store.remove_sync(dataset_id, Some(&holder)))
            .await
    }

    async fn remove(&self, dataset_id: DatasetId) -> Result<bool> {
        self.blocking(move |store| store.remove_sync(dataset_id, None))
            .await
    }

    async fn clear(&self) -> Result<usize> {
        self.blocking(|store| {
            let mut removed = 0;
            for path in store.lock_files()? {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(removed)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<LockRecord>> {
        self.blocking(|store| {
            let mut records = Vec::new();
            for path in store.lock_files()? {
                match Self::read(&path) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable lock"),
                }
            }
            Ok(records)
        })
        .await
    }
}
