//! Catalog data model
//!
//! Connections and datasets are configured by the CRUD layer; jobs, locks,
//! schedules and heartbeats are written by the engine.

pub mod mapping;
mod types;

pub use mapping::{ColumnMapping, ColumnType, MappedColumn};
pub use types::{
    Connection, Dataset, DatasetUpdate, Heartbeat, Job, JobFilter, Schedule,
};
