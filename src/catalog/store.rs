//! JSON-file catalog store
//!
//! The whole catalog lives in one JSON document shared by every process that
//! opens the file. Each mutation takes the catalog file lock, re-reads the
//! document, applies the change and rewrites it through a temp file +
//! rename, so writes from other processes are never lost. Reads use the
//! cached document and re-read it when the file changed on disk.

use super::file_lock::CatalogFileLock;
use super::{JobPatch, Repository};
use crate::error::{Error, Result};
use crate::model::{
    ColumnMapping, Connection, Dataset, DatasetUpdate, Heartbeat, Job, JobFilter, Schedule,
};
use crate::state::{read_json_file, write_json_atomic};
use crate::types::{ConnectionId, DatasetId, JobAction, JobId, JobStatus, ScheduleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

/// Progress updates hit the file at most this often
const PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// File timestamps are coarse; a file modified more recently than this is
/// re-read even when its stamp looks unchanged
const STAMP_SETTLE: Duration = Duration::from_secs(2);

/// Persisted catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    connections: BTreeMap<ConnectionId, Connection>,
    #[serde(default)]
    datasets: BTreeMap<DatasetId, Dataset>,
    #[serde(default)]
    jobs: BTreeMap<JobId, Job>,
    #[serde(default)]
    schedules: BTreeMap<ScheduleId, Schedule>,
    #[serde(default)]
    heartbeat: Option<Heartbeat>,
    #[serde(default)]
    next_job_id: JobId,
    #[serde(default)]
    next_schedule_id: ScheduleId,
}

impl CatalogData {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Job", id))
    }

    fn active_job(&self, dataset_id: DatasetId) -> Option<&Job> {
        self.jobs
            .values()
            .find(|j| j.dataset_id == dataset_id && j.status.is_active())
    }

    fn allocate_job_id(&mut self) -> JobId {
        let floor = self.jobs.keys().next_back().copied().unwrap_or(0);
        self.next_job_id = self.next_job_id.max(floor) + 1;
        self.next_job_id
    }

    fn allocate_schedule_id(&mut self) -> ScheduleId {
        let floor = self.schedules.keys().next_back().copied().unwrap_or(0);
        self.next_schedule_id = self.next_schedule_id.max(floor) + 1;
        self.next_schedule_id
    }

    /// Drop terminal jobs that finished before `cutoff`
    fn prune_jobs(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        before - self.jobs.len()
    }
}

/// Modification time and size of the catalog file; `None` fields when missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Self {
        std::fs::metadata(path).map_or_else(
            |_| Self::default(),
            |m| Self {
                modified: m.modified().ok(),
                len: m.len(),
            },
        )
    }

    /// Old enough that a later write is guaranteed a different stamp
    fn settled(&self) -> bool {
        self.modified
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age > STAMP_SETTLE)
    }
}

/// Cached document plus the file stamp it was read at
#[derive(Debug, Default)]
struct Cached {
    data: CatalogData,
    /// `None` forces a re-read
    stamp: Option<FileStamp>,
}

impl Cached {
    fn reload(&mut self, path: &Path) -> Result<()> {
        let stamp = FileStamp::of(path);
        self.data = read_json_file(path)?.unwrap_or_default();
        self.stamp = Some(stamp);
        Ok(())
    }
}

/// YAML document imported by `catalog import`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

impl CatalogSeed {
    /// Parse a seed from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// File-backed (or in-memory) catalog
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    cache: Arc<RwLock<Cached>>,
    last_progress_save: Arc<Mutex<Option<Instant>>>,
    job_retention: Option<Duration>,
}

impl Catalog {
    /// In-memory catalog (no file persistence)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            cache: Arc::new(RwLock::new(Cached::default())),
            last_progress_save: Arc::new(Mutex::new(None)),
            job_retention: None,
        }
    }

    /// Open a catalog file, starting empty when it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cached = Cached::default();
        cached.reload(&path)?;
        Ok(Self {
            path,
            cache: Arc::new(RwLock::new(cached)),
            last_progress_save: Arc::new(Mutex::new(None)),
            job_retention: None,
        })
    }

    /// Prune finished jobs older than `retention` whenever a job is enqueued
    #[must_use]
    pub fn with_job_retention(mut self, retention: Option<Duration>) -> Self {
        self.job_retention = retention;
        self
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Current document, re-read first when another process may have
    /// rewritten the file
    async fn read(&self) -> Result<RwLockReadGuard<'_, CatalogData>> {
        if !self.is_in_memory() {
            let current = FileStamp::of(&self.path);
            let cached = self.cache.read().await.stamp == Some(current) && current.settled();
            if !cached {
                self.cache.write().await.reload(&self.path)?;
            }
        }
        Ok(RwLockReadGuard::map(self.cache.read().await, |c| &c.data))
    }

    /// Apply one change to the latest document and persist it.
    ///
    /// File-backed catalogs hold the catalog file lock across the re-read and
    /// the rewrite. Nothing is written when `change` fails.
    async fn mutate<T>(&self, change: impl FnOnce(&mut CatalogData) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.write().await;
        if self.is_in_memory() {
            return change(&mut cache.data);
        }

        let _guard = CatalogFileLock::acquire(&self.lock_path()).await?;
        cache.reload(&self.path)?;
        let value = change(&mut cache.data)?;
        if let Err(e) = write_json_atomic(&self.path, &cache.data).await {
            cache.stamp = None;
            return Err(e);
        }
        cache.stamp = Some(FileStamp::of(&self.path));
        Ok(value)
    }

    // ========================================================================
    // Configuration writes (CRUD-layer stand-ins)
    // ========================================================================

    /// Insert or replace a connection
    pub async fn put_connection(&self, connection: Connection) -> Result<()> {
        self.mutate(|data| {
            data.connections.insert(connection.id, connection);
            Ok(())
        })
        .await
    }

    /// Insert or replace a dataset after validating it
    pub async fn put_dataset(&self, dataset: Dataset) -> Result<()> {
        dataset.validate()?;
        self.mutate(|data| {
            if !data.connections.contains_key(&dataset.connection_id) {
                return Err(Error::not_found("Connection", dataset.connection_id));
            }
            data.datasets.insert(dataset.id, dataset);
            Ok(())
        })
        .await
    }

    /// Delete a dataset and its schedule; its jobs stay for history
    pub async fn remove_dataset(&self, id: DatasetId) -> Result<()> {
        self.mutate(|data| {
            if data.datasets.remove(&id).is_none() {
                return Err(Error::not_found("Dataset", id));
            }
            data.schedules.retain(|_, s| s.dataset_id != id);
            Ok(())
        })
        .await
    }

    /// Import connections and datasets; schedule codes become schedules
    pub async fn import(&self, seed: CatalogSeed) -> Result<(usize, usize)> {
        let counts = (seed.connections.len(), seed.datasets.len());
        for connection in seed.connections {
            self.put_connection(connection).await?;
        }
        for dataset in seed.datasets {
            let id = dataset.id;
            let code = dataset.schedule_code.clone();
            self.put_dataset(dataset).await?;
            if let Some(cron) = code.as_deref().and_then(|c| crate::schedule::to_cron(c).transpose())
            {
                self.upsert_schedule(id, cron?, true).await?;
            }
        }
        Ok(counts)
    }

    /// Full catalog as pretty JSON
    pub async fn to_json_pretty(&self) -> Result<String> {
        let data = self.read().await?;
        Ok(serde_json::to_string_pretty(&*data)?)
    }
}

impl Clone for Catalog {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            cache: Arc::clone(&self.cache),
            last_progress_save: Arc::clone(&self.last_progress_save),
            job_retention: self.job_retention,
        }
    }
}

#[async_trait]
impl Repository for Catalog {
    async fn connection(&self, id: ConnectionId) -> Result<Connection> {
        self.read()
            .await?
            .connections
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("Connection", id))
    }

    async fn dataset(&self, id: DatasetId) -> Result<Dataset> {
        self.read()
            .await?
            .datasets
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("Dataset", id))
    }

    async fn datasets(&self) -> Result<Vec<Dataset>> {
        Ok(self.read().await?.datasets.values().cloned().collect())
    }

    async fn update_dataset(&self, id: DatasetId, update: DatasetUpdate) -> Result<()> {
        self.mutate(|data| {
            let dataset = data
                .datasets
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("Dataset", id))?;
            update.apply(dataset);
            Ok(())
        })
        .await
    }

    async fn save_mapping(&self, id: DatasetId, mapping: ColumnMapping) -> Result<ColumnMapping> {
        mapping.validate()?;
        self.mutate(|data| {
            let dataset = data
                .datasets
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("Dataset", id))?;
            Ok(dataset.column_mapping.get_or_insert(mapping).clone())
        })
        .await
    }

    async fn enqueue_job(&self, dataset_id: DatasetId, action: JobAction) -> Result<Job> {
        let retention = self.job_retention;
        self.mutate(|data| {
            let dataset = data
                .datasets
                .get(&dataset_id)
                .cloned()
                .ok_or_else(|| Error::not_found("Dataset", dataset_id))?;

            if let Some(existing) = data.active_job(dataset_id).cloned() {
                let supersede =
                    action == JobAction::FullResync && existing.status == JobStatus::Pending;
                if !supersede {
                    return Err(Error::AlreadyQueued {
                        dataset_id,
                        job_id: existing.id,
                    });
                }
                let now = Utc::now();
                let old = data.job_mut(existing.id)?;
                old.status = JobStatus::Skipped;
                old.completed_at = Some(now);
                old.updated_at = now;
                old.error_message = Some("Superseded by full resync".to_string());
            }

            let now = Utc::now();
            if let Some(cutoff) = retention
                .and_then(|r| chrono::Duration::from_std(r).ok())
                .map(|r| now - r)
            {
                let pruned = data.prune_jobs(cutoff);
                if pruned > 0 {
                    debug!(pruned, "Pruned finished jobs past retention");
                }
            }

            let id = data.allocate_job_id();
            let job = Job::pending(id, &dataset, action, now);
            data.jobs.insert(id, job.clone());
            Ok(job)
        })
        .await
    }

    async fn job(&self, id: JobId) -> Result<Job> {
        self.read()
            .await?
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let data = self.read().await?;
        let matching = data.jobs.values().rev().filter(|j| filter.matches(j)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn active_job(&self, dataset_id: DatasetId) -> Result<Option<Job>> {
        Ok(self.read().await?.active_job(dataset_id).cloned())
    }

    async fn next_pending_job(&self, skip: &HashSet<DatasetId>) -> Result<Option<Job>> {
        let data = self.read().await?;
        Ok(data
            .jobs
            .values()
            .find(|j| j.status == JobStatus::Pending && !skip.contains(&j.dataset_id))
            .cloned())
    }

    async fn transition_job(&self, id: JobId, to: JobStatus, patch: JobPatch) -> Result<Job> {
        self.mutate(|data| {
            let job = data.job_mut(id)?;
            if !job.status.can_transition_to(to) {
                return Err(Error::InvalidTransition {
                    job_id: id,
                    from: job.status.to_string(),
                    to: to.to_string(),
                });
            }

            let now = Utc::now();
            job.status = to;
            job.updated_at = now;
            if to == JobStatus::Running {
                job.started_at = Some(now);
            }
            if to.is_terminal() {
                job.completed_at = Some(now);
            }
            if let Some(message) = patch.error_message {
                job.error_message = Some(message);
            }
            if let Some(worker) = patch.worker_id {
                job.worker_id = Some(worker);
            }
            if let Some(rows) = patch.rows_processed {
                job.rows_processed = job.rows_processed.max(rows);
            }
            Ok(job.clone())
        })
        .await
    }

    /// File-backed catalogs persist progress at most once per interval; the
    /// terminal transition carries the final count
    async fn record_progress(&self, id: JobId, rows_processed: u64) -> Result<()> {
        if !self.is_in_memory() {
            let mut last = self.last_progress_save.lock().await;
            if last.is_some_and(|t| t.elapsed() < PROGRESS_SAVE_INTERVAL) {
                return Ok(());
            }
            *last = Some(Instant::now());
        }

        self.mutate(|data| {
            let job = data.job_mut(id)?;
            if job.status != JobStatus::Running {
                return Err(Error::InvalidTransition {
                    job_id: id,
                    from: job.status.to_string(),
                    to: "progress".to_string(),
                });
            }
            job.rows_processed = job.rows_processed.max(rows_processed);
            job.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn request_cancel(&self, id: JobId) -> Result<Job> {
        self.mutate(|data| {
            let job = data.job_mut(id)?;
            if !job.status.is_terminal() {
                job.cancel_requested = true;
                job.updated_at = Utc::now();
            }
            Ok(job.clone())
        })
        .await
    }

    async fn schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.read().await?.schedules.values().cloned().collect())
    }

    async fn upsert_schedule(
        &self,
        dataset_id: DatasetId,
        cron_expression: String,
        is_active: bool,
    ) -> Result<Schedule> {
        self.mutate(|data| {
            if !data.datasets.contains_key(&dataset_id) {
                return Err(Error::not_found("Dataset", dataset_id));
            }
            let existing = data
                .schedules
                .values_mut()
                .find(|s| s.dataset_id == dataset_id);
            if let Some(schedule) = existing {
                schedule.cron_expression = cron_expression;
                schedule.is_active = is_active;
                return Ok(schedule.clone());
            }

            let id = data.allocate_schedule_id();
            let schedule = Schedule {
                id,
                dataset_id,
                cron_expression,
                is_active,
                last_triggered_at: None,
            };
            data.schedules.insert(id, schedule.clone());
            Ok(schedule)
        })
        .await
    }

    async fn remove_schedule(&self, dataset_id: DatasetId) -> Result<()> {
        self.mutate(|data| {
            data.schedules.retain(|_, s| s.dataset_id != dataset_id);
            Ok(())
        })
        .await
    }

    async fn set_schedule_active(&self, id: ScheduleId, is_active: bool) -> Result<Schedule> {
        self.mutate(|data| {
            let schedule = data
                .schedules
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("Schedule", id))?;
            schedule.is_active = is_active;
            Ok(schedule.clone())
        })
        .await
    }

    async fn mark_schedule_triggered(&self, id: ScheduleId, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|data| {
            let schedule = data
                .schedules
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("Schedule", id))?;
            schedule.last_triggered_at = Some(at);
            Ok(())
        })
        .await
    }

    async fn record_heartbeat(&self, heartbeat: Heartbeat) -> Result<()> {
        self.mutate(|data| {
            data.heartbeat = Some(heartbeat);
            Ok(())
        })
        .await
    }

    async fn last_heartbeat(&self) -> Result<Option<Heartbeat>> {
        Ok(self.read().await?.heartbeat.clone())
    }
}
