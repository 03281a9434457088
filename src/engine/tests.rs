//! Tests for engine module

use super::*;
use crate::catalog::Catalog;
use crate::model::{Connection, Dataset};
use crate::source::{DefaultSourceOpener, RowStream, SourceConnector};
use crate::types::{JobId, Row, SourceType, SyncStrategy};
use crate::writer::DuckDbTarget;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

/// Source file with `orders(id, name, updated_at)` holding `rows` rows
fn source_file(dir: &TempDir, rows: u32) -> String {
    let path = dir.path().join("source.duckdb");
    let conn = duckdb::Connection::open(&path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE orders AS
         SELECT i AS id, 'order ' || i AS name,
                TIMESTAMP '2024-01-01 00:00:00' + INTERVAL (i) MINUTE AS updated_at
         FROM range(1, {}) t(i);",
        rows + 1
    ))
    .unwrap();
    path.to_string_lossy().into_owned()
}

async fn file_engine(path: &str, dataset: Dataset) -> (SyncEngine, Arc<Catalog>, Arc<DuckDbTarget>) {
    let catalog = Arc::new(Catalog::in_memory());
    catalog
        .put_connection(Connection::duckdb_file(1, "source", path))
        .await
        .unwrap();
    catalog.put_dataset(dataset).await.unwrap();

    let target = Arc::new(DuckDbTarget::in_memory().unwrap());
    let engine = SyncEngine::new(
        catalog.clone(),
        Arc::new(DefaultSourceOpener::new(None)),
        target.clone(),
        LockManager::in_memory(Duration::from_secs(60)),
    )
    .with_config(SyncConfig::new().with_batch_sizes(16, 8))
    .with_worker_id("test-worker");
    (engine, catalog, target)
}

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn batch(ids: std::ops::Range<i64>) -> Vec<Row> {
    ids.map(|id| row(json!({"id": id, "name": format!("n{id}")})))
        .collect()
}

/// In-memory source that may raise the cancel flag when queried
#[derive(Clone)]
struct FakeSource {
    batches: Vec<Vec<Row>>,
    cancel: Option<(Arc<Catalog>, JobId)>,
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceConnector for FakeSource {
    fn source_type(&self) -> SourceType {
        SourceType::Duckdb
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }

    async fn stream_query(&self, _query: &str, _batch_size: usize) -> Result<RowStream> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some((catalog, job_id)) = &self.cancel {
            catalog.request_cancel(*job_id).await?;
        }
        Ok(RowStream::from_batches(
            self.batches.iter().cloned().map(Ok).collect(),
        ))
    }
}

#[async_trait]
impl SourceOpener for FakeSource {
    async fn open(&self, _connection: &Connection) -> Result<Box<dyn SourceConnector>> {
        Ok(Box::new(self.clone()))
    }
}

async fn fake_engine(source: FakeSource, dataset: Dataset) -> (SyncEngine, Arc<Catalog>, Arc<DuckDbTarget>) {
    let catalog = Arc::new(Catalog::in_memory());
    catalog
        .put_connection(Connection::new(1, "fake", SourceType::Duckdb))
        .await
        .unwrap();
    catalog.put_dataset(dataset).await.unwrap();
    let target = Arc::new(DuckDbTarget::in_memory().unwrap());
    let engine = SyncEngine::new(
        catalog.clone(),
        Arc::new(source),
        target.clone(),
        LockManager::in_memory(Duration::from_secs(60)),
    )
    .with_config(SyncConfig::new().with_batch_sizes(10, 4));
    (engine, catalog, target)
}

fn fake(batches: Vec<Vec<Row>>) -> FakeSource {
    FakeSource {
        batches,
        cancel: None,
        queries: Arc::new(AtomicUsize::new(0)),
    }
}

// ============================================================================
// SyncConfig Tests
// ============================================================================

#[test]
fn test_sync_config_defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.read_batch_size, 10_000);
    assert_eq!(config.insert_batch_size, 1_000);
}

#[test]
fn test_read_batch_never_below_insert_batch() {
    let config = SyncConfig::new().with_batch_sizes(100, 500);
    assert_eq!(config.insert_batch_size, 500);
    assert_eq!(config.read_batch_size, 500);

    let config = SyncConfig::new().with_batch_sizes(10, 0);
    assert_eq!(config.insert_batch_size, 1);
}

#[test]
fn test_sync_stats_counters() {
    let mut stats = SyncStats::new(3, 7);
    stats.add_read_batch(10);
    stats.add_read_batch(5);
    stats.add_flush(8);
    stats.add_flush(7);
    stats.add_removed(2);

    assert_eq!(stats.rows_read, 15);
    assert_eq!(stats.read_batches, 2);
    assert_eq!(stats.rows_written, 15);
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.rows_removed, 2);
}

// ============================================================================
// File Source Runs
// ============================================================================

#[tokio::test]
async fn test_full_refresh_infers_mapping_and_reloads() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, 50);
    let (engine, catalog, target) = file_engine(&path, Dataset::new(1, 1, "orders", "orders")).await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.rows_processed, 50);

    let dataset = catalog.dataset(1).await.unwrap();
    assert_eq!(dataset.status, DatasetStatus::Active);
    assert_eq!(dataset.total_rows, 50);
    assert!(dataset.last_sync_at.is_some());
    let mapping = dataset.column_mapping.unwrap();
    assert_eq!(mapping.columns().len(), 3);

    // a second full refresh replaces, never duplicates
    engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(target.row_count("orders").await.unwrap(), 50);
    assert!(engine.locks().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_id_strategy_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, 40);
    let dataset = Dataset::new(1, 1, "orders", "orders").with_strategy(SyncStrategy::Id, Some("id"));
    let (engine, _catalog, target) = file_engine(&path, dataset).await;

    let first = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(first.rows_processed, 40);

    let second = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.rows_processed, 0);
    assert_eq!(target.row_count("orders").await.unwrap(), 40);
}

#[tokio::test]
async fn test_row_limit_caps_the_load() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, 100);
    let dataset = Dataset::new(1, 1, "orders", "orders").with_row_limit(30);
    let (engine, _catalog, target) = file_engine(&path, dataset).await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.rows_processed, 30);
    assert_eq!(target.row_count("orders").await.unwrap(), 30);
}

#[tokio::test]
async fn test_unreachable_source_fails_job() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.duckdb");
    let (engine, catalog, target) =
        file_engine(&missing.to_string_lossy(), Dataset::new(1, 1, "orders", "orders")).await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());

    let dataset = catalog.dataset(1).await.unwrap();
    assert_eq!(dataset.status, DatasetStatus::Error);
    assert!(dataset.status_message.is_some());
    assert!(!target.table_exists("orders").await.unwrap());
}

// ============================================================================
// Fake Source Runs
// ============================================================================

#[tokio::test]
async fn test_row_limit_enforced_across_batches() {
    let source = fake(vec![batch(0..10), batch(10..20), batch(20..30)]);
    let dataset = Dataset::new(1, 1, "items", "items").with_row_limit(15);
    let (engine, _catalog, target) = fake_engine(source, dataset).await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.rows_processed, 15);
    assert_eq!(target.row_count("items").await.unwrap(), 15);
}

#[tokio::test]
async fn test_mapping_inferred_once() {
    let source = fake(vec![batch(0..5)]);
    let (engine, catalog, _target) = fake_engine(source, Dataset::new(1, 1, "items", "items")).await;

    engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    let first = catalog.dataset(1).await.unwrap().column_mapping.unwrap();
    engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    let second = catalog.dataset(1).await.unwrap().column_mapping.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.target_for("name"), Some("name"));
}

#[tokio::test]
async fn test_empty_source_truncates_full_refresh_target() {
    let source = fake(vec![batch(0..5)]);
    let (engine, catalog, target) = fake_engine(source, Dataset::new(1, 1, "items", "items")).await;
    engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(target.row_count("items").await.unwrap(), 5);

    let empty = fake(Vec::new());
    let engine = SyncEngine::new(
        catalog.clone(),
        Arc::new(empty),
        target.clone(),
        LockManager::in_memory(Duration::from_secs(60)),
    );
    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.rows_processed, 0);
    assert_eq!(target.row_count("items").await.unwrap(), 0);
    assert_eq!(catalog.dataset(1).await.unwrap().total_rows, 0);
}

#[tokio::test]
async fn test_cancel_flag_stops_before_first_flush() {
    let mut source = fake(vec![batch(0..10), batch(10..20)]);
    let (engine, catalog, target) =
        fake_engine(source.clone(), Dataset::new(1, 1, "items", "items")).await;
    let job = catalog.enqueue_job(1, JobAction::Manual).await.unwrap();

    // the source raises the cross-process flag as the query starts
    source.cancel = Some((catalog.clone(), job.id));
    let engine = SyncEngine::new(
        catalog.clone(),
        Arc::new(source),
        target.clone(),
        engine.locks().clone(),
    );

    let RunOutcome::Finished(done) = engine.run_job(job).await.unwrap() else {
        panic!("expected a finished run");
    };
    assert_eq!(done.status, JobStatus::Cancelled);
    assert_eq!(done.rows_processed, 0);
    assert!(!target.table_exists("items").await.unwrap());

    let dataset = catalog.dataset(1).await.unwrap();
    assert_eq!(dataset.status, DatasetStatus::Active);
    assert_eq!(dataset.status_message.as_deref(), Some(format!("Job {} cancelled", done.id).as_str()));
    assert!(engine.locks().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_contended_job_stays_pending() {
    let source = fake(vec![batch(0..3)]);
    let queries = source.queries.clone();
    let (engine, catalog, _target) = fake_engine(source, Dataset::new(1, 1, "items", "items")).await;
    engine.locks().acquire(1, "other-worker", None).await.unwrap();

    let job = catalog.enqueue_job(1, JobAction::Manual).await.unwrap();
    let outcome = engine.run_job(job.clone()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Contended { ref holder } if holder == "other-worker"));
    assert_eq!(catalog.job(job.id).await.unwrap().status, JobStatus::Pending);
    assert_eq!(queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_one_shot_sync_reports_contention() {
    let (engine, catalog, _target) =
        fake_engine(fake(vec![batch(0..3)]), Dataset::new(1, 1, "items", "items")).await;
    engine.locks().acquire(1, "other-worker", None).await.unwrap();

    let err = engine.sync_dataset(1, JobAction::Manual).await.unwrap_err();
    assert!(matches!(err, Error::LockContention { dataset_id: 1, .. }));

    let jobs = catalog.jobs(&crate::model::JobFilter::default()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Skipped);
}

#[tokio::test]
async fn test_run_job_rejects_non_pending() {
    let (engine, catalog, _target) =
        fake_engine(fake(vec![batch(0..3)]), Dataset::new(1, 1, "items", "items")).await;
    let done = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert!(catalog.job(done.id).await.unwrap().status.is_terminal());

    let err = engine.run_job(done).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_deleted_dataset_fails_job_and_releases_lock() {
    let source = fake(vec![batch(0..3)]);
    let queries = source.queries.clone();
    let (engine, catalog, _target) = fake_engine(source, Dataset::new(1, 1, "items", "items")).await;
    let job = catalog.enqueue_job(1, JobAction::Manual).await.unwrap();
    // removed by the CRUD layer between enqueue and pickup
    catalog.remove_dataset(1).await.unwrap();

    let RunOutcome::Finished(done) = engine.run_job(job.clone()).await.unwrap() else {
        panic!("expected a finished run");
    };
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_message.unwrap_or_default().contains("not found"));
    assert_eq!(catalog.job(job.id).await.unwrap().status, JobStatus::Failed);
    assert_eq!(queries.load(Ordering::SeqCst), 0);
    assert_eq!(engine.tracker().registry().active(), 0);
    assert!(engine.locks().list().await.unwrap().is_empty());
}
