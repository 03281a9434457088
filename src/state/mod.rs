//! State management module
//!
//! Tracks what the date-partition strategy needs between runs: the watermark
//! each partition was loaded at and when the dataset was last fully reloaded.
//!
//! # Overview
//!
//! The state module provides:
//! - `SyncState` - Per-dataset partition tracking
//! - `StateManager` - File-based state persistence

mod manager;
mod types;

pub(crate) use manager::{read_json_file, write_json_atomic};
pub use manager::StateManager;
pub use types::{DatasetState, PartitionState, SyncState};

#[cfg(test)]
mod manager_tests;
