//! CLI module
//!
//! Command-line interface for the sync engine.
//!
//! # Commands
//!
//! - `worker` - Run the job consumer, scheduler and REST API
//! - `sync` - Sync one dataset in this process
//! - `trigger` / `cancel` / `jobs` - Job control
//! - `locks` / `unlock` - Lock administration
//! - `status` / `health` - Worker status and health heuristics
//! - `schedule` - Set a dataset schedule
//! - `token` / `encrypt` - Operator tokens and credential encryption
//! - `catalog` - Import or print the catalog
//!
//! With `--server`, job, lock, status and schedule commands go through a
//! running worker's REST API instead of the local catalog.

mod client;
mod commands;
mod runner;
mod server;

pub use client::ApiClient;
pub use commands::{CatalogCommands, Cli, Commands, OutputFormat};
pub use runner::Runner;
pub use server::{router, serve, AppState};

#[cfg(test)]
mod tests;
