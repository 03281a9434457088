//! Columnar target store
//!
//! `DuckDbTarget` keeps one DuckDB connection behind a mutex and runs every
//! statement on the blocking pool. DuckDB allows one writing process per
//! database file; other engines plug in behind `TargetStore`.

use super::sql::{quote_ident, quote_literal};
use super::types::TargetMutation;
use crate::error::{Error, Result};
use crate::model::ColumnMapping;
use crate::source::record_batch_to_rows;
use crate::types::Row;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Analytics store the batch writer loads into
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create the table for a mapping if it does not exist yet
    async fn ensure_table(&self, table: &str, mapping: &ColumnMapping) -> Result<()>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Run a table mutation, returning affected rows
    async fn apply(&self, table: &str, mutation: &TargetMutation) -> Result<u64>;

    /// Bulk-append one batch, returning rows written
    async fn append(&self, table: &str, batch: RecordBatch) -> Result<usize>;

    /// `MAX(column)` as text, `None` for an empty or missing table
    async fn max_value(&self, table: &str, column: &str) -> Result<Option<String>>;

    async fn row_count(&self, table: &str) -> Result<u64>;
}

/// DuckDB analytics target
#[derive(Clone)]
pub struct DuckDbTarget {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl std::fmt::Debug for DuckDbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbTarget")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl DuckDbTarget {
    /// Open (or create) a DuckDB file; `:memory:` opens an in-memory database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Self::in_memory();
        }
        let conn = Connection::open(path).map_err(|e| {
            Error::load(format!("Failed to open target {}: {e}", path.display()))
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: path.display().to_string(),
        })
    }

    /// In-memory target
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::load(format!("Failed to create DuckDB connection: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: ":memory:".to_string(),
        })
    }

    /// Where the target lives
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run a read query and return its rows
    pub async fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = Vec::new();
            for batch in stmt.query_arrow([])? {
                rows.extend(record_batch_to_rows(&batch)?);
            }
            Ok(rows)
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::load("target connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::load(format!("target task failed: {e}")))?
    }
}

fn create_table_sql(table: &str, mapping: &ColumnMapping) -> String {
    let columns = mapping
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.target), c.column_type.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({columns})", quote_ident(table))
}

/// SQL for a mutation against a DuckDB table
pub fn mutation_sql(table: &str, mutation: &TargetMutation) -> String {
    let table = quote_ident(table);
    match mutation {
        TargetMutation::Truncate => format!("DELETE FROM {table}"),
        TargetMutation::DeleteRange { column, from, to } => {
            let column = quote_ident(column);
            let mut conditions = Vec::new();
            if let Some(from) = from {
                conditions.push(format!("{column} >= {}", quote_literal(from)));
            }
            if let Some(to) = to {
                conditions.push(format!("{column} < {}", quote_literal(to)));
            }
            if conditions.is_empty() {
                format!("DELETE FROM {table}")
            } else {
                format!("DELETE FROM {table} WHERE {}", conditions.join(" AND "))
            }
        }
        TargetMutation::Dedupe {
            unique_column,
            order_column,
        } => {
            let order = match order_column {
                Some(col) => format!("{} DESC NULLS LAST, rowid DESC", quote_ident(col)),
                None => "rowid DESC".to_string(),
            };
            format!(
                "CREATE OR REPLACE TEMP TABLE __dedupe AS \
                 SELECT * FROM {table} \
                 QUALIFY row_number() OVER (PARTITION BY {} ORDER BY {order}) = 1; \
                 DELETE FROM {table}; \
                 INSERT INTO {table} SELECT * FROM __dedupe; \
                 DROP TABLE __dedupe;",
                quote_ident(unique_column)
            )
        }
    }
}

fn table_exists_sync(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[async_trait]
impl TargetStore for DuckDbTarget {
    async fn ensure_table(&self, table: &str, mapping: &ColumnMapping) -> Result<()> {
        let sql = create_table_sql(table, mapping);
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| Error::load(format!("Failed to create target table: {e}")))
        })
        .await
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        self.with_conn(move |conn| table_exists_sync(conn, &table))
            .await
    }

    async fn apply(&self, table: &str, mutation: &TargetMutation) -> Result<u64> {
        let table = table.to_string();
        let mutation = mutation.clone();
        self.with_conn(move |conn| {
            if !table_exists_sync(conn, &table)? {
                return Ok(0);
            }
            let sql = mutation_sql(&table, &mutation);
            tracing::debug!(table = %table, %mutation, "Applying target mutation");
            match mutation {
                TargetMutation::Dedupe { .. } => {
                    let before: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {}", quote_ident(&table)),
                        [],
                        |row| row.get(0),
                    )?;
                    conn.execute_batch(&format!("BEGIN TRANSACTION; {sql} COMMIT;"))
                        .map_err(|e| {
                            let _ = conn.execute_batch("ROLLBACK");
                            Error::load(format!("Dedupe failed: {e}"))
                        })?;
                    let after: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {}", quote_ident(&table)),
                        [],
                        |row| row.get(0),
                    )?;
                    Ok((before - after).max(0) as u64)
                }
                _ => conn
                    .execute(&sql, [])
                    .map(|n| n as u64)
                    .map_err(|e| Error::load(format!("{mutation} failed: {e}"))),
            }
        })
        .await
    }

    async fn append(&self, table: &str, batch: RecordBatch) -> Result<usize> {
        let table = table.to_string();
        let rows = batch.num_rows();
        self.with_conn(move |conn| {
            let mut appender = conn
                .appender(&table)
                .map_err(|e| Error::load(format!("Failed to open appender on {table}: {e}")))?;
            appender
                .append_record_batch(batch)
                .map_err(|e| Error::load(format!("Bulk insert into {table} failed: {e}")))?;
            appender
                .flush()
                .map_err(|e| Error::load(format!("Bulk insert into {table} failed: {e}")))?;
            Ok(rows)
        })
        .await
    }

    async fn max_value(&self, table: &str, column: &str) -> Result<Option<String>> {
        let table = table.to_string();
        let column = column.to_string();
        self.with_conn(move |conn| {
            if !table_exists_sync(conn, &table)? {
                return Ok(None);
            }
            let sql = format!(
                "SELECT CAST(MAX({}) AS VARCHAR) FROM {}",
                quote_ident(&column),
                quote_ident(&table)
            );
            let value: Option<String> = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(value)
        })
        .await
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            if !table_exists_sync(conn, &table)? {
                return Ok(0);
            }
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&table)),
                [],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
