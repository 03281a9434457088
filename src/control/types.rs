//! Control plane types

use crate::model::Job;
use crate::types::DatasetId;
use serde::{Deserialize, Serialize};

/// Result of `trigger_all`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerAllOutcome {
    pub enqueued: Vec<Job>,
    /// Datasets that already had a pending or running job
    pub already_queued: Vec<DatasetId>,
}
