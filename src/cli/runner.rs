//! CLI runner - executes commands

use crate::auth::{Role, TokenAuthority};
use crate::catalog::{Catalog, CatalogSeed};
use crate::cli::client::ApiClient;
use crate::cli::commands::{CatalogCommands, Cli, Commands, OutputFormat};
use crate::cli::server::{serve, AppState};
use crate::config::EngineConfig;
use crate::control::ControlPlane;
use crate::engine::{SyncConfig, SyncEngine};
use crate::error::{Error, Result};
use crate::jobs::{HealthReport, HealthThresholds};
use crate::lock::{LockInfo, LockManager};
use crate::model::{Job, JobFilter, Schedule};
use crate::schedule::Scheduler;
use crate::source::{CredentialCipher, DefaultSourceOpener, SECRET_KEY_ENV};
use crate::state::StateManager;
use crate::supervisor::{SupervisorConfig, WorkerStatus, WorkerSupervisor};
use crate::types::{DatasetId, JobAction, JobStatus};
use crate::writer::DuckDbTarget;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Components wired from the engine configuration
struct Components {
    catalog: Arc<Catalog>,
    plane: ControlPlane,
}

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = self.load_config()?;

        if let Some(client) = self.remote_client()? {
            if self.run_remote(&client).await? {
                return Ok(());
            }
        }

        match &self.cli.command {
            Commands::Worker { port, no_server } => {
                let port = port.unwrap_or(config.server.port);
                self.worker(&config, port, *no_server).await
            }
            Commands::Sync {
                dataset,
                full_resync,
            } => self.sync(&config, *dataset, *full_resync).await,
            Commands::Trigger {
                dataset,
                all,
                full_resync,
            } => {
                let plane = operator_plane(&config)?;
                if *all {
                    let outcome = plane.trigger_all().await?;
                    self.output(&outcome, |o| {
                        let mut lines: Vec<String> = o.enqueued.iter().map(job_line).collect();
                        lines.extend(
                            o.already_queued
                                .iter()
                                .map(|id| format!("dataset {id}: already queued")),
                        );
                        lines
                    })
                } else {
                    let id = required_dataset(*dataset)?;
                    let job = plane.trigger(id, action(*full_resync)).await?;
                    self.output(&job, |j| vec![job_line(j)])
                }
            }
            Commands::Cancel { job } => {
                let job = operator_plane(&config)?.cancel(*job).await?;
                self.output(&job, |j| vec![job_line(j)])
            }
            Commands::Jobs {
                dataset,
                status,
                limit,
            } => {
                let filter = job_filter(*dataset, status.as_deref(), *limit)?;
                let jobs = operator_plane(&config)?.list_jobs(&filter).await?;
                self.output(&jobs, |jobs| jobs.iter().map(job_line).collect())
            }
            Commands::Locks => {
                let locks = operator_plane(&config)?.list_locks().await?;
                self.output(&locks, |locks| locks.iter().map(lock_line).collect())
            }
            Commands::Unlock { dataset, all } => {
                let plane = operator_plane(&config)?;
                let removed = if *all {
                    plane.delete_all_locks().await?
                } else {
                    usize::from(plane.delete_lock(required_dataset(*dataset)?).await?)
                };
                self.output(&json!({ "removed": removed }), |_| {
                    vec![format!("{removed} lock(s) removed")]
                })
            }
            Commands::Status => {
                let status = operator_plane(&config)?.worker_status().await?;
                self.output(&status, status_lines)
            }
            Commands::Health => {
                let report = operator_plane(&config)?.health().await?;
                self.output(&report, health_lines)
            }
            Commands::Schedule { dataset, code } => {
                let schedule = operator_plane(&config)?.update_schedule(*dataset, code).await?;
                self.output(&schedule, |s| vec![schedule_line(*dataset, s.as_ref())])
            }
            Commands::Token {
                subject,
                role,
                lifetime,
            } => self.token(&config, subject, role, *lifetime),
            Commands::Encrypt {
                password,
                generate_key,
            } => self.encrypt(password.as_deref(), *generate_key),
            Commands::Catalog { command } => {
                let catalog = build(&config, TargetAccess::Detached)?.catalog;
                match command {
                    CatalogCommands::Import { file } => {
                        let yaml = std::fs::read_to_string(file).map_err(|e| {
                            Error::config(format!("Failed to read {}: {e}", file.display()))
                        })?;
                        let (connections, datasets) =
                            catalog.import(CatalogSeed::from_yaml(&yaml)?).await?;
                        let summary = json!({ "connections": connections, "datasets": datasets });
                        self.output(&summary, |_| {
                            vec![format!(
                                "Imported {connections} connection(s) and {datasets} dataset(s)"
                            )]
                        })
                    }
                    CatalogCommands::Show => {
                        println!("{}", catalog.to_json_pretty().await?);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Load the config file, or defaults when none is given
    fn load_config(&self) -> Result<EngineConfig> {
        match &self.cli.config {
            Some(path) => EngineConfig::from_file(path),
            None => {
                let mut config = EngineConfig::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn remote_client(&self) -> Result<Option<ApiClient>> {
        let Some(url) = self.cli.server.as_deref() else {
            return Ok(None);
        };
        Ok(Some(ApiClient::new(url)?.with_token(self.cli.token.clone())))
    }

    // ========================================================================
    // Remote mode
    // ========================================================================

    /// Run a command against a worker's REST API; `false` for local-only commands
    async fn run_remote(&self, client: &ApiClient) -> Result<bool> {
        match &self.cli.command {
            Commands::Trigger {
                dataset,
                all,
                full_resync,
            } => {
                if *all {
                    let outcome = client.trigger_all().await?;
                    self.output(&outcome, |o| o.enqueued.iter().map(job_line).collect())?;
                } else {
                    let job = client.trigger(required_dataset(*dataset)?, *full_resync).await?;
                    self.output(&job, |j| vec![job_line(j)])?;
                }
            }
            Commands::Cancel { job } => {
                let job = client.cancel(*job).await?;
                self.output(&job, |j| vec![job_line(j)])?;
            }
            Commands::Jobs {
                dataset,
                status,
                limit,
            } => {
                let jobs = client
                    .jobs(&job_filter(*dataset, status.as_deref(), *limit)?)
                    .await?;
                self.output(&jobs, |jobs| jobs.iter().map(job_line).collect())?;
            }
            Commands::Locks => {
                let locks = client.locks().await?;
                self.output(&locks, |locks| locks.iter().map(lock_line).collect())?;
            }
            Commands::Unlock { dataset, all } => {
                let removed = if *all {
                    client.delete_all_locks().await?
                } else {
                    client.delete_lock(required_dataset(*dataset)?).await?
                };
                self.output(&removed, |v| vec![v.to_string()])?;
            }
            Commands::Status => {
                let status = client.worker_status().await?;
                self.output(&status, status_lines)?;
            }
            Commands::Health => {
                let report = client.health().await?;
                self.output(&report, health_lines)?;
            }
            Commands::Schedule { dataset, code } => {
                let schedule = client.update_schedule(*dataset, code).await?;
                self.output(&schedule, |s| vec![schedule_line(*dataset, s.as_ref())])?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    // ========================================================================
    // Local commands
    // ========================================================================

    /// Run the supervisor (and REST API) until Ctrl-C
    async fn worker(&self, config: &EngineConfig, port: u16, no_server: bool) -> Result<()> {
        let components = build(config, TargetAccess::Open)?;
        let plane = components.plane;
        plane.worker_start().await?;

        let shutdown = CancellationToken::new();
        let server = if no_server {
            None
        } else {
            let authority = config
                .server
                .api_secret
                .as_deref()
                .map(TokenAuthority::new)
                .transpose()?;
            if authority.is_none() {
                tracing::warn!("No API secret configured, privileged routes are open");
            }
            let state = AppState::new(plane.clone(), authority);
            let token = shutdown.clone();
            Some(tokio::spawn(async move { serve(state, port, token).await }))
        };

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Other(format!("Failed to listen for Ctrl-C: {e}")))?;
        tracing::info!("Shutting down, waiting for the in-flight job");

        shutdown.cancel();
        let status = plane.worker_stop(false).await?;
        if let Some(server) = server {
            server
                .await
                .map_err(|e| Error::Other(format!("Server task failed: {e}")))??;
        }
        self.output(&status, status_lines)
    }

    /// One-shot sync in this process
    async fn sync(&self, config: &EngineConfig, dataset: DatasetId, full_resync: bool) -> Result<()> {
        let components = build(config, TargetAccess::Open)?;
        let job = components
            .plane
            .worker()
            .engine()
            .sync_dataset(dataset, action(full_resync))
            .await?;
        let failed = job.status == JobStatus::Failed;
        self.output(&job, |j| vec![job_line(j)])?;
        if failed {
            return Err(Error::load(
                job.error_message
                    .unwrap_or_else(|| format!("Job {} failed", job.id)),
            ));
        }
        Ok(())
    }

    fn token(
        &self,
        config: &EngineConfig,
        subject: &str,
        role: &str,
        lifetime: Option<u64>,
    ) -> Result<()> {
        let secret = config.server.api_secret.as_deref().ok_or_else(|| {
            Error::config(format!(
                "No API secret configured (set server.api_secret or {})",
                crate::config::API_SECRET_ENV
            ))
        })?;
        let mut authority = TokenAuthority::new(secret)?;
        if let Some(secs) = lifetime {
            authority = authority.with_lifetime(secs);
        }
        let role: Role = role.parse()?;
        println!("{}", authority.mint(subject, role)?);
        Ok(())
    }

    fn encrypt(&self, password: Option<&str>, generate_key: bool) -> Result<()> {
        if generate_key {
            println!("{}", CredentialCipher::generate_key());
            return Ok(());
        }
        let password =
            password.ok_or_else(|| Error::config("Password required (or use --generate-key)"))?;
        let cipher = CredentialCipher::from_env()?
            .ok_or_else(|| Error::config(format!("{SECRET_KEY_ENV} is not set")))?;
        println!("{}", cipher.encrypt(password)?);
        Ok(())
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn output<T: Serialize>(&self, value: &T, pretty: impl Fn(&T) -> Vec<String>) -> Result<()> {
        match self.cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Pretty => {
                for line in pretty(value) {
                    println!("{line}");
                }
            }
        }
        Ok(())
    }
}

/// How a command uses the analytics target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetAccess {
    /// Runs syncs and opens the target file
    Open,
    /// Operator commands never load data, so they leave the target file to the
    /// worker that holds DuckDB's exclusive lock on it
    Detached,
}

/// Wire catalog, state, locks, target, engine, supervisor and control plane
fn build(config: &EngineConfig, access: TargetAccess) -> Result<Components> {
    let catalog = Arc::new(match &config.catalog_path {
        Some(path) => Catalog::open(path)?.with_job_retention(config.job_retention()),
        None => Catalog::in_memory().with_job_retention(config.job_retention()),
    });
    let state = match &config.state_path {
        Some(path) => StateManager::from_file(path)?,
        None => StateManager::in_memory(),
    };
    let locks = match &config.lock_dir {
        Some(dir) => LockManager::file_backed(dir, config.lock_ttl())?,
        None => LockManager::in_memory(config.lock_ttl()),
    };
    let target = Arc::new(match access {
        TargetAccess::Open => DuckDbTarget::open(&config.target_path)?,
        TargetAccess::Detached => DuckDbTarget::in_memory()?,
    });
    let opener = Arc::new(DefaultSourceOpener::from_env()?);

    let engine = SyncEngine::new(catalog.clone(), opener, target, locks)
        .with_config(SyncConfig::from_engine(config))
        .with_state(state);
    let scheduler = Scheduler::new(catalog.clone(), config.scheduler_tick());
    let worker = WorkerSupervisor::new(engine, scheduler, SupervisorConfig::from_engine(config));
    let plane = ControlPlane::new(worker).with_thresholds(HealthThresholds {
        stuck_after: config.stuck_threshold(),
        heartbeat_stale_after: config.heartbeat_stale(),
    });

    Ok(Components { catalog, plane })
}

/// Control plane for a one-off operator command
fn operator_plane(config: &EngineConfig) -> Result<ControlPlane> {
    Ok(build(config, TargetAccess::Detached)?.plane)
}

fn action(full_resync: bool) -> JobAction {
    if full_resync {
        JobAction::FullResync
    } else {
        JobAction::Manual
    }
}

fn required_dataset(dataset: Option<DatasetId>) -> Result<DatasetId> {
    dataset.ok_or_else(|| Error::config("Dataset id required (or use --all)"))
}

fn job_filter(
    dataset: Option<DatasetId>,
    status: Option<&str>,
    limit: Option<usize>,
) -> Result<JobFilter> {
    Ok(JobFilter {
        dataset_id: dataset,
        status: status.map(str::parse::<JobStatus>).transpose()?,
        limit,
    })
}

fn job_line(job: &Job) -> String {
    let mut line = format!(
        "job {} dataset {} {} {} rows={}",
        job.id, job.dataset_id, job.action, job.status, job.rows_processed
    );
    if let Some(error) = &job.error_message {
        line.push_str(&format!(" error={error}"));
    }
    line
}

fn lock_line(lock: &LockInfo) -> String {
    format!(
        "dataset {} held by {} ({}s left of {}s)",
        lock.dataset_id, lock.holder, lock.remaining_secs, lock.ttl_secs
    )
}

fn schedule_line(dataset: DatasetId, schedule: Option<&Schedule>) -> String {
    match schedule {
        Some(s) => format!(
            "dataset {dataset}: '{}' (active: {})",
            s.cron_expression, s.is_active
        ),
        None => format!("dataset {dataset}: manual"),
    }
}

fn status_lines(status: &WorkerStatus) -> Vec<String> {
    let mut lines = vec![format!(
        "worker {} active_jobs={}",
        status.status, status.active_jobs
    )];
    if let Some(job) = status.current_job {
        lines.push(format!("current job: {job}"));
    }
    if let Some(hb) = &status.last_heartbeat {
        lines.push(format!("last heartbeat: {} ({})", hb.timestamp, hb.worker_id));
    }
    lines
}

fn health_lines(report: &HealthReport) -> Vec<String> {
    if report.is_healthy() {
        return vec!["healthy".to_string()];
    }
    report.warnings.clone()
}
