//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Solidafy sync engine CLI
#[derive(Parser, Debug)]
#[command(name = "solidafy-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Engine configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Talk to a running worker's REST API instead of the local catalog
    #[arg(long, global = true, env = "SOLIDAFY_SERVER")]
    pub server: Option<String>,

    /// Bearer token for privileged REST calls
    #[arg(long, global = true, env = "SOLIDAFY_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker: job consumer, scheduler and REST API in one process
    Worker {
        /// Port for the REST API (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start the REST API
        #[arg(long)]
        no_server: bool,
    },

    /// Sync one dataset now, in this process
    Sync {
        /// Dataset id
        dataset: i64,

        /// Ignore watermarks, truncate and reload
        #[arg(long)]
        full_resync: bool,
    },

    /// Enqueue a sync job
    Trigger {
        /// Dataset id (omit with --all)
        dataset: Option<i64>,

        /// Enqueue every dataset without an active job
        #[arg(long, conflicts_with = "dataset")]
        all: bool,

        /// Ignore watermarks, truncate and reload
        #[arg(long)]
        full_resync: bool,
    },

    /// Cancel a pending or running job
    Cancel {
        /// Job id
        job: i64,
    },

    /// List jobs
    Jobs {
        /// Only jobs of this dataset
        #[arg(long)]
        dataset: Option<i64>,

        /// Only jobs in this status (pending, running, completed, ...)
        #[arg(long)]
        status: Option<String>,

        /// Newest N jobs
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List dataset locks
    Locks,

    /// Force-clear dataset locks
    Unlock {
        /// Dataset id (omit with --all)
        dataset: Option<i64>,

        /// Clear every lock
        #[arg(long, conflicts_with = "dataset")]
        all: bool,
    },

    /// Show worker status
    Status,

    /// Report stuck jobs, orphaned locks and crash signatures
    Health,

    /// Set a dataset schedule (manual, hourly, daily_at_02, every_15_minutes, cron)
    Schedule {
        /// Dataset id
        dataset: i64,

        /// Interval code or cron expression; `manual` removes the schedule
        code: String,
    },

    /// Mint an operator token from the configured API secret
    Token {
        /// Token subject
        #[arg(long, default_value = "operator")]
        subject: String,

        /// Role: operator or viewer
        #[arg(long, default_value = "operator")]
        role: String,

        /// Lifetime in seconds
        #[arg(long)]
        lifetime: Option<u64>,
    },

    /// Encrypt a source password for the catalog
    Encrypt {
        /// Plaintext password (omit with --generate-key)
        password: Option<String>,

        /// Print a fresh base64 key instead
        #[arg(long, conflicts_with = "password")]
        generate_key: bool,
    },

    /// Catalog maintenance
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
}

/// Catalog subcommands
#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// Import connections, datasets and schedules from a YAML file
    Import {
        /// Seed file
        file: PathBuf,
    },

    /// Print the catalog
    Show,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// One line per item
    Pretty,
}
