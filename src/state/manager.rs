//! State manager implementation
//!
//! Provides file-based state persistence with atomic writes.

use super::types::{DatasetState, SyncState};
use crate::error::{Error, Result};
use crate::types::DatasetId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;

/// State manager for persisting and loading sync state
#[derive(Debug)]
pub struct StateManager {
    /// Path to the state file
    path: PathBuf,
    /// Current state (cached)
    state: Arc<RwLock<SyncState>>,
    /// Whether to auto-save on every update
    auto_save: bool,
}

impl StateManager {
    /// Create a new state manager with the given path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Arc::new(RwLock::new(SyncState::new())),
            auto_save: true,
        }
    }

    /// Create an in-memory state manager (no file persistence)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(SyncState::new())),
            auto_save: false,
        }
    }

    /// Create a state manager from a file, loading existing state if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = read_json_file(&path)?.unwrap_or_default();

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
            auto_save: true,
        })
    }

    /// Save current state to file
    pub async fn save(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }

        let state = self.state.read().await;
        write_json_atomic(&self.path, &*state).await
    }

    /// Snapshot of one dataset's state
    pub async fn dataset(&self, dataset_id: DatasetId) -> DatasetState {
        let state = self.state.read().await;
        state.get_dataset(dataset_id).cloned().unwrap_or_default()
    }

    /// Partition watermarks of a dataset
    pub async fn partition_watermarks(&self, dataset_id: DatasetId) -> BTreeMap<String, String> {
        let state = self.state.read().await;
        state
            .get_dataset(dataset_id)
            .map(DatasetState::watermarks)
            .unwrap_or_default()
    }

    /// Record loaded partitions with their new watermarks
    pub async fn record_partitions(
        &self,
        dataset_id: DatasetId,
        partitions: &BTreeMap<String, Option<String>>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let ds = state.get_dataset_mut(dataset_id);
            for (key, watermark) in partitions {
                ds.record_partition(key, watermark.clone(), at);
            }
        }

        if self.auto_save {
            self.save().await?;
        }

        Ok(())
    }

    /// Last time every partition of the dataset was reloaded
    pub async fn last_full_refresh(&self, dataset_id: DatasetId) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state.get_dataset(dataset_id)?.last_full_refresh_at
    }

    /// Mark a complete reload of the dataset
    pub async fn mark_full_refresh(&self, dataset_id: DatasetId, at: DateTime<Utc>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.get_dataset_mut(dataset_id).last_full_refresh_at = Some(at);
        }

        if self.auto_save {
            self.save().await?;
        }

        Ok(())
    }

    /// Clear state for a specific dataset
    pub async fn clear_dataset(&self, dataset_id: DatasetId) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.datasets.remove(&dataset_id);
        }

        if self.auto_save {
            self.save().await?;
        }

        Ok(())
    }

    /// Export state as pretty-printed JSON string
    pub async fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string_pretty(&*state).map_err(|e| Error::State {
            message: format!("Failed to serialize state: {e}"),
        })
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            state: Arc::clone(&self.state),
            auto_save: self.auto_save,
        }
    }
}

/// Read a JSON file, returning `None` when it does not exist
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::State {
        message: format!("Failed to read {}: {e}", path.display()),
    })?;
    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| Error::State {
            message: format!("Failed to parse {}: {e}", path.display()),
        })
}

/// Serialize to a uniquely named temp file in the same directory, then
/// rename it over `path`. Concurrent writers never share a temp file.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_vec_pretty(value).map_err(|e| Error::State {
        message: format!("Failed to serialize state: {e}"),
    })?;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || persist_atomic(&path, &contents))
        .await
        .map_err(|e| Error::State {
            message: format!("State write task failed: {e}"),
        })?
}

fn persist_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::State {
        message: format!("Failed to create temp file in {}: {e}", dir.display()),
    })?;
    temp.write_all(contents).map_err(|e| Error::State {
        message: format!("Failed to write {}: {e}", temp.path().display()),
    })?;
    temp.persist(path).map_err(|e| Error::State {
        message: format!("Failed to rename state file {}: {e}", path.display()),
    })?;

    Ok(())
}
