//! DuckDB-backed source adapter
//!
//! Postgres, MySQL and SQLite databases are attached read-only to an
//! in-memory DuckDB instance through its scanner extensions; DuckDB files
//! are attached directly. Results are pulled through DuckDB's streaming
//! Arrow interface so only one read batch is materialized at a time.

use super::arrow_rows::record_batch_to_rows;
use super::types::ConnectionSecrets;
use super::{RowStream, SourceConnector};
use crate::error::{Error, Result};
use crate::model::Connection as SourceConnection;
use crate::types::{Row, SourceType};
use crate::writer::quote_literal;
use async_trait::async_trait;
use duckdb::Connection;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Source reached through an attached DuckDB database
pub struct DuckDbSource {
    conn: Arc<Mutex<Connection>>,
    source_type: SourceType,
    name: String,
}

impl std::fmt::Debug for DuckDbSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbSource")
            .field("source_type", &self.source_type)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DuckDbSource {
    /// Open an in-memory DuckDB and attach the source as `source_db`
    pub async fn connect(connection: &SourceConnection, secrets: &ConnectionSecrets) -> Result<Self> {
        let source_type = connection.source_type;
        let connection_string = build_connection_string(connection, secrets)?;

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_in_memory().map_err(|e| {
                Error::connection(format!("Failed to create DuckDB connection: {e}"))
            })?;
            attach_database(&conn, source_type, &connection_string)?;
            Ok(conn)
        })
        .await
        .map_err(|e| Error::connection(format!("Source connect task failed: {e}")))??;

        tracing::debug!(source = %connection.name, source_type = %source_type, "Attached source database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            source_type,
            name: connection.name.clone(),
        })
    }
}

/// Build connection string from config
fn build_connection_string(
    connection: &SourceConnection,
    secrets: &ConnectionSecrets,
) -> Result<String> {
    // If connection_string is provided, use it directly
    if let Some(conn_str) = &connection.connection_string {
        return Ok(conn_str.clone());
    }

    let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
    let host = connection.host.as_deref().unwrap_or("localhost");
    let port = connection
        .port
        .unwrap_or_else(|| connection.source_type.default_port());
    let user = encode(secrets.username.as_deref().unwrap_or("postgres"));
    let password = encode(secrets.password.as_deref().unwrap_or_default());
    let database = connection.database.as_deref();

    match connection.source_type {
        SourceType::Postgres => Ok(format!(
            "postgresql://{user}:{password}@{host}:{port}/{}?sslmode={}",
            database.unwrap_or("postgres"),
            connection.ssl_mode
        )),
        SourceType::Mysql => Ok(format!(
            "mysql://{user}:{password}@{host}:{port}/{}",
            database.unwrap_or("mysql")
        )),
        // file-based sources use the database as a path
        SourceType::Sqlite | SourceType::Duckdb => database
            .filter(|d| !d.trim().is_empty())
            .map(String::from)
            .ok_or_else(|| {
                Error::config(format!(
                    "Connection '{}' needs a database file path",
                    connection.name
                ))
            }),
        SourceType::Mssql => Err(Error::config(
            "SQL Server sources are read through the TDS adapter",
        )),
    }
}

/// Attach external database to DuckDB and make it the default catalog
fn attach_database(conn: &Connection, source_type: SourceType, connection_string: &str) -> Result<()> {
    let (extension, options) = match source_type {
        SourceType::Postgres => (Some("postgres"), "TYPE POSTGRES, READ_ONLY"),
        SourceType::Mysql => (Some("mysql"), "TYPE MYSQL, READ_ONLY"),
        SourceType::Sqlite => (Some("sqlite"), "TYPE SQLITE, READ_ONLY"),
        // Native DuckDB - just attach directly
        SourceType::Duckdb => (None, "READ_ONLY"),
        SourceType::Mssql => {
            return Err(Error::config("SQL Server cannot be attached to DuckDB"));
        }
    };

    if let Some(ext) = extension {
        conn.execute_batch(&format!("INSTALL {ext}; LOAD {ext};"))
            .map_err(|e| Error::connection(format!("Failed to load {ext} extension: {e}")))?;
    }

    let attach_sql = format!(
        "ATTACH {} AS source_db ({options}); USE source_db;",
        quote_literal(connection_string)
    );
    conn.execute_batch(&attach_sql)
        .map_err(|e| Error::connection(format!("Failed to attach {source_type} source: {e}")))?;

    Ok(())
}

/// Run a query and push read batches until the consumer goes away
fn stream_rows(
    conn: &Mutex<Connection>,
    query: &str,
    batch_size: usize,
    tx: &mpsc::Sender<Result<Vec<Row>>>,
) -> Result<()> {
    let guard = conn
        .lock()
        .map_err(|_| Error::extraction("source connection mutex poisoned"))?;

    // Streaming needs the result schema up front
    let schema = {
        let mut shape = guard
            .prepare(&format!("SELECT * FROM ({query}) AS shape LIMIT 0"))
            .map_err(|e| Error::extraction(format!("Failed to prepare query: {e}")))?;
        let arrow = shape
            .query_arrow([])
            .map_err(|e| Error::extraction(format!("Failed to execute query: {e}")))?;
        arrow.get_schema()
    };

    let mut stmt = guard
        .prepare(query)
        .map_err(|e| Error::extraction(format!("Failed to prepare query: {e}")))?;
    let batches = stmt
        .stream_arrow([], schema)
        .map_err(|e| Error::extraction(format!("Failed to execute query: {e}")))?;

    let mut buffer = Vec::with_capacity(batch_size);
    for batch in batches {
        for row in record_batch_to_rows(&batch)? {
            buffer.push(row);
            if buffer.len() >= batch_size {
                let full = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                if tx.blocking_send(Ok(full)).is_err() {
                    // consumer dropped the stream
                    return Ok(());
                }
            }
        }
    }

    if !buffer.is_empty() {
        let _ = tx.blocking_send(Ok(buffer));
    }
    Ok(())
}

#[async_trait]
impl SourceConnector for DuckDbSource {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn check(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let guard = conn
                .lock()
                .map_err(|_| Error::connection("source connection mutex poisoned"))?;
            guard
                .execute_batch("SELECT 1")
                .map_err(|e| Error::connection(format!("Connection check failed: {e}")))
        })
        .await
        .map_err(|e| Error::connection(format!("Connection check task failed: {e}")))?
    }

    async fn stream_query(&self, query: &str, batch_size: usize) -> Result<RowStream> {
        let (tx, rx) = mpsc::channel(2);
        let conn = Arc::clone(&self.conn);
        let query = query.to_string();
        let batch_size = batch_size.max(1);

        tracing::debug!(source = %self.name, "Executing query: {}", query);

        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_rows(&conn, &query, batch_size, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(RowStream::new(rx, task))
    }
}
