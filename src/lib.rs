// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Solidafy Sync
//!
//! Batch ETL engine that copies tables from operational databases into a
//! DuckDB analytics store, one dataset at a time.
//!
//! ## Features
//!
//! - **Sync strategies**: Full refresh, timestamp and id watermarks, trailing
//!   date windows, and date-partitioned reloads with change detection
//! - **Streaming loads**: Source rows are read in batches and bulk-loaded
//!   through Arrow, so memory stays bounded
//! - **Job lifecycle**: Pending, running and terminal states with
//!   cooperative cancellation and row limits
//! - **Dataset locks**: Time-bounded, refreshed after every flush
//! - **Worker supervisor**: Queue consumer, heartbeat and cron scheduler
//! - **Control plane**: CLI and REST API for triggers, locks and health
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use solidafy_sync::catalog::Catalog;
//! use solidafy_sync::engine::SyncEngine;
//! use solidafy_sync::lock::LockManager;
//! use solidafy_sync::source::DefaultSourceOpener;
//! use solidafy_sync::writer::DuckDbTarget;
//! use solidafy_sync::{JobAction, Result};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let catalog = Arc::new(Catalog::open("catalog.json")?);
//!     let engine = SyncEngine::new(
//!         catalog,
//!         Arc::new(DefaultSourceOpener::from_env()?),
//!         Arc::new(DuckDbTarget::open("analytics.duckdb")?),
//!         LockManager::in_memory(Duration::from_secs(3600)),
//!     );
//!
//!     let job = engine.sync_dataset(1, JobAction::Manual).await?;
//!     println!("{} rows", job.rows_processed);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             Control plane (CLI / REST, operator tokens)         │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │      Worker supervisor: queue consumer, heartbeat, scheduler    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │  Source  │ Strategy  │    Mapping    │  Writer   │ Jobs/Locks  │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ DuckDB   │ Full      │ Inference     │ Arrow     │ Tracker     │
//! │ attach   │ Timestamp │ Null defaults │ Appender  │ Cancel      │
//! │ MSSQL    │ Id        │ Date parsing  │ Mutations │ TTL locks   │
//! │          │ Partition │               │           │ Health      │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Engine configuration
pub mod config;

/// Connections, datasets, jobs, schedules and column mappings
pub mod model;

/// Catalog repository (file-backed)
pub mod catalog;

/// Per-dataset sync state (partition watermarks)
pub mod state;

/// Source adapters
pub mod source;

/// Column mapping inference and value coercion
pub mod mapping;

/// Analytics target and batch writer
pub mod writer;

/// Sync strategy planning
pub mod strategy;

/// Dataset locks
pub mod lock;

/// Job lifecycle and health heuristics
pub mod jobs;

/// Cron schedules
pub mod schedule;

/// Sync execution engine
pub mod engine;

/// Worker supervisor
pub mod supervisor;

/// Operator control plane
pub mod control;

/// Operator tokens
pub mod auth;

/// Command-line interface and REST API
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use catalog::{Catalog, Repository};
pub use config::EngineConfig;
pub use control::ControlPlane;
pub use engine::{RunOutcome, SyncConfig, SyncEngine};
pub use supervisor::WorkerSupervisor;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
