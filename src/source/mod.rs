//! Source connector module
//!
//! Streams rows out of relational sources through forward-only cursors.
//!
//! # Overview
//!
//! - `SourceConnector` - open handle able to run a streaming query
//! - `RowStream` - lazy, finite sequence of read batches; dropping it stops
//!   the producer and releases the cursor
//! - `DuckDbSource` - postgres / mysql / sqlite / duckdb via DuckDB attach
//! - `MssqlSource` - SQL Server over TDS
//! - `CredentialCipher` - AES-256-GCM credential decryption

mod arrow_rows;
mod credentials;
mod attach;
mod mssql;
mod types;

pub use attach::DuckDbSource;
pub use arrow_rows::record_batch_to_rows;
pub use credentials::{resolve_secrets, CredentialCipher, SECRET_KEY_ENV};
pub use mssql::MssqlSource;
pub use types::{ConnectionSecrets, SqlDialect};

use crate::error::Result;
use crate::model::Connection;
use crate::types::{Row, SourceType};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// Row Stream
// ============================================================================

/// Forward-only stream of read batches.
///
/// Not restartable. The producer stops and closes its cursor as soon as the
/// stream is dropped, whatever the exit path. A draining producer is left to
/// read its cursor to the end instead, since aborting it would strand a
/// half-read result set on a shared connection.
#[derive(Debug)]
pub struct RowStream {
    rx: mpsc::Receiver<Result<Vec<Row>>>,
    task: Option<JoinHandle<()>>,
    abort_on_drop: bool,
}

impl RowStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Vec<Row>>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
            abort_on_drop: true,
        }
    }

    /// Producer finishes on its own once the receiver closes
    pub(crate) fn draining(rx: mpsc::Receiver<Result<Vec<Row>>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
            abort_on_drop: false,
        }
    }

    /// Stream over batches already in memory
    pub fn from_batches(batches: Vec<Result<Vec<Row>>>) -> Self {
        let (tx, rx) = mpsc::channel(batches.len().max(1));
        for batch in batches {
            // capacity covers every batch
            let _ = tx.try_send(batch);
        }
        Self {
            rx,
            task: None,
            abort_on_drop: true,
        }
    }

    /// Next read batch, `None` once the cursor is exhausted
    pub async fn next_batch(&mut self) -> Option<Result<Vec<Row>>> {
        self.rx.recv().await
    }

    /// Drain the whole stream (small result sets only)
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next_batch().await {
            rows.extend(batch?);
        }
        Ok(rows)
    }
}

impl Stream for RowStream {
    type Item = Result<Vec<Row>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            if self.abort_on_drop {
                task.abort();
            }
        }
    }
}

// ============================================================================
// Connector Traits
// ============================================================================

/// An open source handle
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// SQL flavour of generated queries
    fn dialect(&self) -> SqlDialect {
        SqlDialect::for_source(self.source_type())
    }

    /// Cheap round trip proving the connection works
    async fn check(&self) -> Result<()>;

    /// Start a streaming query yielding batches of at most `batch_size` rows
    async fn stream_query(&self, query: &str, batch_size: usize) -> Result<RowStream>;
}

/// Opens source handles for connections
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, connection: &Connection) -> Result<Box<dyn SourceConnector>>;
}

/// Opener for the built-in adapters
#[derive(Debug, Clone, Default)]
pub struct DefaultSourceOpener {
    cipher: Option<CredentialCipher>,
}

impl DefaultSourceOpener {
    pub fn new(cipher: Option<CredentialCipher>) -> Self {
        Self { cipher }
    }

    /// Use the key from `SOLIDAFY_SECRET_KEY` when present
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(CredentialCipher::from_env()?))
    }
}

#[async_trait]
impl SourceOpener for DefaultSourceOpener {
    async fn open(&self, connection: &Connection) -> Result<Box<dyn SourceConnector>> {
        open(connection, self.cipher.as_ref()).await
    }
}

/// Open a source handle for a connection
pub async fn open(
    connection: &Connection,
    cipher: Option<&CredentialCipher>,
) -> Result<Box<dyn SourceConnector>> {
    let secrets = resolve_secrets(connection, cipher)?;
    match connection.source_type {
        SourceType::Mssql => Ok(Box::new(MssqlSource::connect(connection, &secrets).await?)),
        _ => Ok(Box::new(DuckDbSource::connect(connection, &secrets).await?)),
    }
}

#[cfg(test)]
mod tests;
