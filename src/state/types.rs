//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs.

use crate::types::DatasetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Complete sync state of the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// Per-dataset state
    #[serde(default)]
    pub datasets: HashMap<DatasetId, DatasetState>,
}

impl SyncState {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a dataset
    pub fn get_dataset(&self, dataset_id: DatasetId) -> Option<&DatasetState> {
        self.datasets.get(&dataset_id)
    }

    /// Get mutable state for a dataset, creating if needed
    pub fn get_dataset_mut(&mut self, dataset_id: DatasetId) -> &mut DatasetState {
        self.datasets.entry(dataset_id).or_default()
    }
}

/// State for a single dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetState {
    /// Per-partition load watermarks, keyed by partition key (`2024-03`)
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionState>,

    /// Last time every partition was reloaded
    #[serde(default)]
    pub last_full_refresh_at: Option<DateTime<Utc>>,
}

impl DatasetState {
    /// Create a new empty dataset state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get partition state
    pub fn get_partition(&self, key: &str) -> Option<&PartitionState> {
        self.partitions.get(key)
    }

    /// Watermark recorded for a partition
    pub fn partition_watermark(&self, key: &str) -> Option<&str> {
        self.partitions.get(key)?.watermark.as_deref()
    }

    /// Record a partition load
    pub fn record_partition(&mut self, key: &str, watermark: Option<String>, at: DateTime<Utc>) {
        let entry = self.partitions.entry(key.to_string()).or_default();
        entry.watermark = watermark;
        entry.loaded_at = Some(at);
    }

    /// Partition watermarks as a plain map
    pub fn watermarks(&self) -> BTreeMap<String, String> {
        self.partitions
            .iter()
            .filter_map(|(k, p)| p.watermark.clone().map(|w| (k.clone(), w)))
            .collect()
    }
}

/// State for a single partition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionState {
    /// Max modified value seen at the last load of this partition
    #[serde(default)]
    pub watermark: Option<String>,

    /// When the partition was last reloaded
    #[serde(default)]
    pub loaded_at: Option<DateTime<Utc>>,
}
