//! Job lifecycle module
//!
//! `pending -> running -> {completed, failed, cancelled}`, with `skipped` for
//! pending jobs that were superseded. Terminal states are written once.
//!
//! # Overview
//!
//! - `JobTracker` - transitions, progress and cooperative cancellation
//! - `CancellationRegistry` - tokens of the jobs running in this process
//! - `diagnose` - stuck jobs, orphaned locks and crash signatures

mod health;
mod tracker;

pub use health::{diagnose, HealthReport, HealthThresholds, StuckJob};
pub use tracker::{CancellationRegistry, JobTracker};
