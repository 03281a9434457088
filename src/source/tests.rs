//! Tests for source adapters

use super::*;
use crate::error::Error;
use crate::model::Connection;
use crate::types::{PartitionType, SourceType};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

fn make_source_file(dir: &std::path::Path, rows: usize) -> String {
    let path = dir.join("source.duckdb");
    let conn = ::duckdb::Connection::open(&path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE orders AS \
         SELECT i AS id, 'name ' || i AS name, \
                TIMESTAMP '2024-01-01 00:00:00' + to_hours(i) AS created_at, \
                CAST(i AS DECIMAL(10, 2)) / 4 AS amount \
         FROM range({rows}) t(i)"
    ))
    .unwrap();
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Dialect Tests
// ============================================================================

#[test]
fn test_dialect_quoting() {
    assert_eq!(SqlDialect::DuckDb.quote_ident("a\"b"), "\"a\"\"b\"");
    assert_eq!(SqlDialect::TSql.quote_ident("a]b"), "[a]]b]");
    assert_eq!(SqlDialect::DuckDb.quote_qualified("public.orders"), "\"public\".\"orders\"");
    assert_eq!(SqlDialect::TSql.quote_qualified("dbo.orders"), "[dbo].[orders]");
}

#[test]
fn test_dialect_select_row_cap() {
    let preds = vec!["\"id\" > 10".to_string()];
    assert_eq!(
        SqlDialect::DuckDb.select("*", "\"t\"", &preds, Some("\"id\""), Some(5)),
        "SELECT * FROM \"t\" WHERE (\"id\" > 10) ORDER BY \"id\" LIMIT 5"
    );
    assert_eq!(
        SqlDialect::TSql.select("*", "[t]", &[], None, Some(5)),
        "SELECT TOP (5) * FROM [t]"
    );
    assert_eq!(SqlDialect::TSql.select("*", "[t]", &[], None, None), "SELECT * FROM [t]");
}

#[test]
fn test_dialect_partition_and_literals() {
    assert_eq!(
        SqlDialect::DuckDb.partition_key_expr("d", PartitionType::Monthly),
        "strftime(CAST(\"d\" AS TIMESTAMP), '%Y-%m')"
    );
    assert_eq!(
        SqlDialect::TSql.partition_key_expr("d", PartitionType::Daily),
        "FORMAT([d], 'yyyy-MM-dd')"
    );

    let at = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap();
    assert_eq!(SqlDialect::DuckDb.datetime_literal(&at), "'2024-03-01 06:00:00'");
    assert_eq!(SqlDialect::TSql.datetime_literal(&at), "'2024-03-01T06:00:00'");
    assert_eq!(SqlDialect::for_source(SourceType::Mssql), SqlDialect::TSql);
    assert_eq!(SqlDialect::for_source(SourceType::Postgres), SqlDialect::DuckDb);
}

// ============================================================================
// Credential Tests
// ============================================================================

#[test]
fn test_credentials_round_trip() {
    let cipher = CredentialCipher::new(&[7u8; 32]).unwrap();
    let token = cipher.encrypt("s3cret").unwrap();
    assert_ne!(token, "s3cret");
    assert_eq!(cipher.decrypt(&token).unwrap(), "s3cret");

    // fresh nonce every time
    assert_ne!(cipher.encrypt("s3cret").unwrap(), token);

    let other = CredentialCipher::new(&[8u8; 32]).unwrap();
    assert!(matches!(other.decrypt(&token), Err(Error::Connection { .. })));
}

#[test]
fn test_credentials_bad_key() {
    assert!(CredentialCipher::new(&[1u8; 16]).is_err());
    assert!(CredentialCipher::from_base64_key("not base64!").is_err());

    let key = CredentialCipher::generate_key();
    assert!(CredentialCipher::from_base64_key(&key).is_ok());
}

#[test]
fn test_resolve_secrets() {
    let cipher = CredentialCipher::new(&[3u8; 32]).unwrap();
    let mut conn = Connection::new(1, "pg", SourceType::Postgres);
    conn.username = Some("etl".into());

    let secrets = resolve_secrets(&conn, None).unwrap();
    assert!(secrets.password.is_none());

    conn.password = Some("plain".into());
    assert_eq!(resolve_secrets(&conn, None).unwrap().password.as_deref(), Some("plain"));

    conn.encrypted_password = Some(cipher.encrypt("hidden").unwrap());
    let secrets = resolve_secrets(&conn, Some(&cipher)).unwrap();
    assert_eq!(secrets.password.as_deref(), Some("hidden"));
    assert!(!format!("{secrets:?}").contains("hidden"));

    // encrypted password without a key is a configuration problem
    assert!(matches!(
        resolve_secrets(&conn, None),
        Err(Error::Configuration { .. })
    ));
}

// ============================================================================
// Stream Tests
// ============================================================================

#[tokio::test]
async fn test_row_stream_from_batches() {
    let row = json!({"a": 1}).as_object().cloned().unwrap();
    let stream = RowStream::from_batches(vec![Ok(vec![row.clone()]), Ok(vec![row])]);
    assert_eq!(stream.collect_rows().await.unwrap().len(), 2);
}

fn numbered_rows(
    count: i64,
) -> impl futures::Stream<Item = crate::error::Result<crate::types::Row>> + Unpin {
    futures::stream::iter(
        (0..count).map(|i| Ok(json!({ "id": i }).as_object().cloned().unwrap())),
    )
}

#[tokio::test]
async fn test_closed_receiver_still_reads_cursor_to_end() {
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let read = AtomicUsize::new(0);
    let rows = numbered_rows(50).inspect(|_| {
        read.fetch_add(1, Ordering::SeqCst);
    });
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    drop(rx);

    super::mssql::forward_rows(rows, 10, &tx).await.unwrap();
    assert_eq!(read.load(Ordering::SeqCst), 50);
}

#[tokio::test]
async fn test_draining_stream_lets_producer_finish_after_drop() {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let task = tokio::spawn(async move {
        let result = super::mssql::forward_rows(numbered_rows(50), 5, &tx).await;
        let _ = done_tx.send(result.is_ok());
    });

    let mut stream = RowStream::draining(rx, task);
    assert_eq!(stream.next_batch().await.unwrap().unwrap().len(), 5);
    drop(stream);

    let finished = tokio::time::timeout(std::time::Duration::from_secs(5), done_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(finished);
}

#[tokio::test]
async fn test_duckdb_source_streams_batches() {
    let dir = tempdir().unwrap();
    let path = make_source_file(dir.path(), 25);

    let source = open(&Connection::duckdb_file(1, "local", &path), None)
        .await
        .unwrap();
    source.check().await.unwrap();
    assert_eq!(source.dialect(), SqlDialect::DuckDb);

    let mut stream = source
        .stream_query("SELECT * FROM \"orders\" ORDER BY \"id\"", 10)
        .await
        .unwrap();

    let mut sizes = Vec::new();
    let mut first = None;
    while let Some(batch) = stream.next_batch().await {
        let batch = batch.unwrap();
        if first.is_none() {
            first = batch.first().cloned();
        }
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![10, 10, 5]);

    let first = first.unwrap();
    assert_eq!(first.keys().cloned().collect::<Vec<_>>(), vec!["id", "name", "created_at", "amount"]);
    assert_eq!(first["id"], json!(0));
    assert_eq!(first["name"], json!("name 0"));
    assert_eq!(first["created_at"], json!("2024-01-01 00:00:00"));
    assert_eq!(first["amount"], json!(0.0));
}

#[tokio::test]
async fn test_duckdb_source_early_drop() {
    let dir = tempdir().unwrap();
    let path = make_source_file(dir.path(), 100);
    let source = open(&Connection::duckdb_file(1, "local", &path), None)
        .await
        .unwrap();

    let mut stream = source.stream_query("SELECT * FROM orders", 10).await.unwrap();
    assert_eq!(stream.next_batch().await.unwrap().unwrap().len(), 10);
    drop(stream);

    // the handle is usable again once the previous cursor is gone
    let rows = source
        .stream_query("SELECT COUNT(*) AS n FROM orders", 10)
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], json!(100));
}

#[tokio::test]
async fn test_duckdb_source_bad_query_is_extraction_error() {
    let dir = tempdir().unwrap();
    let path = make_source_file(dir.path(), 1);
    let source = open(&Connection::duckdb_file(1, "local", &path), None)
        .await
        .unwrap();

    let mut stream = source.stream_query("SELECT * FROM missing", 10).await.unwrap();
    let err = stream.next_batch().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Extraction { .. }));
}

#[tokio::test]
async fn test_duckdb_source_requires_path() {
    let conn = Connection::new(1, "nofile", SourceType::Duckdb);
    let err = open(&conn, None).await.err().unwrap();
    assert!(matches!(err, Error::Configuration { .. }));
}
