//! Sync tests against live source databases
//!
//! These tests require running servers.
//! Set POSTGRES_TEST_URL and/or MSSQL_TEST_URL to run them.

use solidafy_sync::catalog::{Catalog, Repository};
use solidafy_sync::engine::SyncEngine;
use solidafy_sync::lock::LockManager;
use solidafy_sync::model::{Connection, Dataset};
use solidafy_sync::source::DefaultSourceOpener;
use solidafy_sync::writer::DuckDbTarget;
use solidafy_sync::{DatasetStatus, JobAction, JobStatus, SourceType, SyncStrategy};
use std::sync::Arc;
use std::time::Duration;

/// Get a connection string from the environment or skip
fn get_test_connection(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

async fn engine_for(source_type: SourceType, conn_str: String, dataset: Dataset) -> (SyncEngine, Arc<DuckDbTarget>) {
    let catalog = Arc::new(Catalog::in_memory());
    let mut connection = Connection::new(1, "live", source_type);
    connection.connection_string = Some(conn_str);
    catalog.put_connection(connection).await.unwrap();
    catalog.put_dataset(dataset).await.unwrap();

    let target = Arc::new(DuckDbTarget::in_memory().unwrap());
    let engine = SyncEngine::new(
        catalog,
        Arc::new(DefaultSourceOpener::new(None)),
        target.clone(),
        LockManager::in_memory(Duration::from_secs(60)),
    );
    (engine, target)
}

fn query_dataset(query: &str) -> Dataset {
    let mut dataset = Dataset::new(1, 1, "live", "live_rows");
    dataset.source_table = None;
    dataset.source_query = Some(query.to_string());
    dataset
}

#[tokio::test]
async fn test_postgres_full_refresh() {
    let Some(conn_str) = get_test_connection("POSTGRES_TEST_URL") else {
        println!("Skipping: POSTGRES_TEST_URL not set");
        return;
    };

    let dataset = query_dataset("SELECT g AS id, 'row ' || g AS name FROM generate_series(1, 250) AS t(g)");
    let (engine, target) = engine_for(SourceType::Postgres, conn_str, dataset).await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert_eq!(job.rows_processed, 250);

    let rows = target
        .query_rows("SELECT count(*) AS n FROM live_rows")
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], 250);
}

#[tokio::test]
async fn test_postgres_id_watermark() {
    let Some(conn_str) = get_test_connection("POSTGRES_TEST_URL") else {
        println!("Skipping: POSTGRES_TEST_URL not set");
        return;
    };

    let dataset = query_dataset("SELECT g AS id FROM generate_series(1, 100) AS t(g)")
        .with_strategy(SyncStrategy::Id, Some("id"));
    let (engine, _target) = engine_for(SourceType::Postgres, conn_str, dataset).await;

    let first = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(first.rows_processed, 100);
    let second = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(second.rows_processed, 0);
}

#[tokio::test]
async fn test_mssql_full_refresh_with_row_limit() {
    let Some(conn_str) = get_test_connection("MSSQL_TEST_URL") else {
        println!("Skipping: MSSQL_TEST_URL not set");
        return;
    };

    let dataset = query_dataset(
        "SELECT TOP 500 ROW_NUMBER() OVER (ORDER BY (SELECT NULL)) AS id, name \
         FROM sys.all_objects",
    )
    .with_row_limit(120);
    let (engine, target) = engine_for(SourceType::Mssql, conn_str, dataset).await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert_eq!(job.rows_processed, 120);

    let rows = target
        .query_rows("SELECT count(*) AS n FROM live_rows")
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], 120);
}

#[tokio::test]
async fn test_unreachable_source_fails_job() {
    let Some(_) = get_test_connection("MSSQL_TEST_URL") else {
        println!("Skipping: MSSQL_TEST_URL not set");
        return;
    };

    let dataset = query_dataset("SELECT 1 AS id");
    let (engine, _target) = engine_for(
        SourceType::Mssql,
        "server=tcp:127.0.0.1,1;user id=sa;password=NotThePassword1;TrustServerCertificate=true"
            .to_string(),
        dataset,
    )
    .await;

    let job = engine.sync_dataset(1, JobAction::Manual).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.unwrap_or_default();
    assert!(!message.contains("NotThePassword1"), "{message}");

    let dataset = engine.repository().dataset(1).await.unwrap();
    assert_eq!(dataset.status, DatasetStatus::Error);
}
