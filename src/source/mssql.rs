//! SQL Server source adapter over TDS

use super::types::ConnectionSecrets;
use super::{RowStream, SourceConnector};
use crate::error::{Error, Result};
use crate::mapping::format_datetime;
use crate::model::Connection;
use crate::types::{JsonValue, Row, SourceType};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::TryStreamExt;
use std::sync::Arc;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server source
pub struct MssqlSource {
    session: Arc<Mutex<Session>>,
    name: String,
}

/// One TDS connection plus whether its last result set was read to the end
struct Session {
    config: Config,
    client: TdsClient,
    in_sync: bool,
}

impl Session {
    /// Reconnect when a previous query was cut off mid-result-set
    async fn ready(&mut self) -> Result<&mut TdsClient> {
        if !self.in_sync {
            tracing::debug!("Reconnecting SQL Server session after interrupted query");
            self.client = open_client(self.config.clone()).await?;
            self.in_sync = true;
        }
        Ok(&mut self.client)
    }
}

impl std::fmt::Debug for MssqlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MssqlSource {
    /// Connect and authenticate
    pub async fn connect(connection: &Connection, secrets: &ConnectionSecrets) -> Result<Self> {
        let config = build_config(connection, secrets)?;
        let client = open_client(config.clone()).await?;

        tracing::debug!(source = %connection.name, "Connected to SQL Server");

        Ok(Self {
            session: Arc::new(Mutex::new(Session {
                config,
                client,
                in_sync: true,
            })),
            name: connection.name.clone(),
        })
    }
}

async fn open_client(config: Config) -> Result<TdsClient> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| Error::connection(format!("Failed to reach SQL Server: {e}")))?;
    tcp.set_nodelay(true)?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| Error::connection(format!("SQL Server login failed: {e}")))
}

fn build_config(connection: &Connection, secrets: &ConnectionSecrets) -> Result<Config> {
    if let Some(conn_str) = &connection.connection_string {
        return Config::from_ado_string(conn_str)
            .map_err(|e| Error::connection(format!("Invalid SQL Server connection string: {e}")));
    }

    let mut config = Config::new();
    config.host(connection.host.as_deref().unwrap_or("localhost"));
    config.port(
        connection
            .port
            .unwrap_or_else(|| SourceType::Mssql.default_port()),
    );
    if let Some(database) = &connection.database {
        config.database(database);
    }
    config.authentication(AuthMethod::sql_server(
        secrets.username.as_deref().unwrap_or("sa"),
        secrets.password.as_deref().unwrap_or_default(),
    ));

    match connection.ssl_mode.as_str() {
        "disable" => config.encryption(EncryptionLevel::NotSupported),
        "require" | "verify-full" => config.encryption(EncryptionLevel::Required),
        _ => config.encryption(EncryptionLevel::On),
    }
    if connection.ssl_mode != "verify-full" {
        config.trust_cert();
    }

    Ok(config)
}

fn number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value).map_or(JsonValue::Null, JsonValue::Number)
}

fn datetime_text<'a, T: FromSql<'a>>(
    data: &'a ColumnData<'static>,
    to_naive: impl FnOnce(T) -> Option<chrono::NaiveDateTime>,
) -> JsonValue {
    T::from_sql(data)
        .ok()
        .flatten()
        .and_then(to_naive)
        .map_or(JsonValue::Null, |dt| JsonValue::String(format_datetime(&dt)))
}

/// Convert one TDS cell
fn cell_value(data: &ColumnData<'static>) -> JsonValue {
    match data {
        ColumnData::U8(v) => v.map_or(JsonValue::Null, Into::into),
        ColumnData::I16(v) => v.map_or(JsonValue::Null, Into::into),
        ColumnData::I32(v) => v.map_or(JsonValue::Null, Into::into),
        ColumnData::I64(v) => v.map_or(JsonValue::Null, Into::into),
        ColumnData::F32(v) => v.map_or(JsonValue::Null, |f| number(f64::from(f))),
        ColumnData::F64(v) => v.map_or(JsonValue::Null, number),
        ColumnData::Bit(v) => v.map_or(JsonValue::Null, JsonValue::Bool),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(JsonValue::Null, |s| JsonValue::String(s.to_string())),
        ColumnData::Guid(v) => v.map_or(JsonValue::Null, |g| JsonValue::String(g.to_string())),
        ColumnData::Numeric(v) => v.map_or(JsonValue::Null, |n| {
            number(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }),
        ColumnData::Binary(v) => v
            .as_ref()
            .map_or(JsonValue::Null, |b| JsonValue::String(STANDARD.encode(b))),
        ColumnData::Date(_) => {
            datetime_text::<chrono::NaiveDate>(data, |d| d.and_hms_opt(0, 0, 0))
        }
        ColumnData::DateTimeOffset(_) => {
            datetime_text::<chrono::DateTime<chrono::Utc>>(data, |dt| Some(dt.naive_utc()))
        }
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |t| JsonValue::String(t.to_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            datetime_text::<chrono::NaiveDateTime>(data, Some)
        }
        // xml: select it cast to nvarchar
        #[allow(unreachable_patterns)]
        _ => JsonValue::Null,
    }
}

fn convert_row(row: &tiberius::Row) -> Row {
    let mut out = Row::with_capacity(row.len());
    for (column, data) in row.cells() {
        out.insert(column.name().to_string(), cell_value(data));
    }
    out
}

async fn stream_rows(
    client: &mut TdsClient,
    query: &str,
    batch_size: usize,
    tx: &mpsc::Sender<Result<Vec<Row>>>,
) -> Result<()> {
    let stream = client
        .simple_query(query)
        .await
        .map_err(|e| Error::extraction(format!("Failed to execute query: {e}")))?;
    let rows = stream
        .into_row_stream()
        .map_ok(|row| convert_row(&row))
        .map_err(|e| Error::extraction(format!("Cursor read failed: {e}")));

    forward_rows(rows, batch_size, tx).await
}

/// Batch rows into `tx`. Once the receiver is gone the rest of the cursor is
/// read and discarded so the connection ends up between result sets.
pub(super) async fn forward_rows<S>(
    mut rows: S,
    batch_size: usize,
    tx: &mpsc::Sender<Result<Vec<Row>>>,
) -> Result<()>
where
    S: futures::Stream<Item = Result<Row>> + Unpin,
{
    let mut buffer = Vec::with_capacity(batch_size);
    while let Some(row) = rows.try_next().await? {
        buffer.push(row);
        if buffer.len() >= batch_size {
            let full = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
            if tx.send(Ok(full)).await.is_err() {
                let mut discarded = 0u64;
                while rows.try_next().await?.is_some() {
                    discarded += 1;
                }
                tracing::debug!(discarded, "Row stream closed early; cursor drained");
                return Ok(());
            }
        }
    }

    if !buffer.is_empty() {
        let _ = tx.send(Ok(buffer)).await;
    }
    Ok(())
}

#[async_trait]
impl SourceConnector for MssqlSource {
    fn source_type(&self) -> SourceType {
        SourceType::Mssql
    }

    async fn check(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let result = async {
            session
                .ready()
                .await?
                .simple_query("SELECT 1")
                .await
                .map_err(|e| Error::connection(format!("Connection check failed: {e}")))?
                .into_results()
                .await
                .map_err(|e| Error::connection(format!("Connection check failed: {e}")))?;
            Ok::<(), Error>(())
        }
        .await;
        session.in_sync = result.is_ok();
        result
    }

    async fn stream_query(&self, query: &str, batch_size: usize) -> Result<RowStream> {
        let (tx, rx) = mpsc::channel(2);
        let session = Arc::clone(&self.session);
        let query = query.to_string();
        let batch_size = batch_size.max(1);

        tracing::debug!(source = %self.name, "Executing query: {}", query);

        let task = tokio::spawn(async move {
            let mut session = session.lock_owned().await;
            let ready = session.ready().await.map(|_| ());
            let result = match ready {
                Ok(()) => {
                    // cleared until the result set has been read to the end
                    session.in_sync = false;
                    stream_rows(&mut session.client, &query, batch_size, &tx).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => session.in_sync = true,
                Err(e) => {
                    session.in_sync = false;
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(RowStream::draining(rx, task))
    }
}
