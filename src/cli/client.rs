//! REST client for a running worker
//!
//! Retries connection failures and retryable statuses (429, 5xx) with
//! exponential backoff; client errors are returned at once.

use crate::control::TriggerAllOutcome;
use crate::error::{is_retryable_status, Error, Result};
use crate::jobs::HealthReport;
use crate::lock::LockInfo;
use crate::model::{Job, JobFilter, Schedule};
use crate::supervisor::WorkerStatus;
use crate::types::{DatasetId, JobId, ScheduleId};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Response envelope of the REST API
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the operator REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // relative joins keep the last path segment only with a trailing slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("solidafy-sync/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: None,
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
        })
    }

    /// Send `Authorization: Bearer <token>`
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Set retry behaviour
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    pub async fn trigger(&self, dataset_id: DatasetId, full_resync: bool) -> Result<Job> {
        self.request(
            Method::POST,
            &format!("datasets/{dataset_id}/trigger"),
            Some(json!({ "full_resync": full_resync })),
        )
        .await
    }

    pub async fn trigger_all(&self) -> Result<TriggerAllOutcome> {
        self.request(Method::POST, "datasets/trigger", None).await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        self.request(Method::POST, &format!("jobs/{job_id}/cancel"), None)
            .await
    }

    pub async fn jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut path = String::from("jobs");
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(id) = filter.dataset_id {
            query.append_pair("dataset_id", &id.to_string());
        }
        if let Some(status) = filter.status {
            query.append_pair("status", status.as_str());
        }
        if let Some(limit) = filter.limit {
            query.append_pair("limit", &limit.to_string());
        }
        let query = query.finish();
        if !query.is_empty() {
            path = format!("{path}?{query}");
        }
        self.request(Method::GET, &path, None).await
    }

    pub async fn worker_status(&self) -> Result<WorkerStatus> {
        self.request(Method::GET, "worker", None).await
    }

    /// `action` is `start`, `stop` or `restart`
    pub async fn worker_action(&self, action: &str, cancel_in_flight: bool) -> Result<WorkerStatus> {
        self.request(
            Method::POST,
            &format!("worker/{action}"),
            Some(json!({ "cancel_in_flight": cancel_in_flight })),
        )
        .await
    }

    pub async fn locks(&self) -> Result<Vec<LockInfo>> {
        self.request(Method::GET, "locks", None).await
    }

    pub async fn delete_lock(&self, dataset_id: DatasetId) -> Result<Value> {
        self.request(Method::DELETE, &format!("locks/{dataset_id}"), None)
            .await
    }

    pub async fn delete_all_locks(&self) -> Result<Value> {
        self.request(Method::DELETE, "locks", None).await
    }

    pub async fn update_schedule(&self, dataset_id: DatasetId, code: &str) -> Result<Option<Schedule>> {
        self.request(
            Method::PUT,
            &format!("datasets/{dataset_id}/schedule"),
            Some(json!({ "code": code })),
        )
        .await
    }

    pub async fn toggle_schedule(&self, schedule_id: ScheduleId, is_active: bool) -> Result<Schedule> {
        self.request(
            Method::PUT,
            &format!("schedules/{schedule_id}/active"),
            Some(json!({ "is_active": is_active })),
        )
        .await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.request(Method::GET, "health", None).await
    }

    // ========================================================================
    // Transport
    // ========================================================================

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = self.base_url.join(path)?;
        let mut attempt = 0;

        loop {
            let mut req = self.client.request(method.clone(), url.clone());
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            if let Some(body) = &body {
                req = req.json(body);
            }

            let error = match req.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !is_retryable_status(status) {
                        debug!(%method, %url, status, "Request finished");
                        return decode(status, response.text().await?);
                    }
                    Error::HttpStatus {
                        status,
                        body: response.text().await.unwrap_or_default(),
                    }
                }
                Err(e) if e.is_connect() || e.is_timeout() => Error::Http(e),
                Err(e) => return Err(Error::Http(e)),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            let delay = self.initial_backoff * 2u32.saturating_pow(attempt);
            warn!(
                %url,
                error = %error,
                "Request failed, attempt {}/{}, retrying in {:?}",
                attempt + 1,
                self.max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Unwrap the envelope, mapping `success: false` to an error
fn decode<T: DeserializeOwned>(status: u16, body: String) -> Result<T> {
    let envelope: Envelope<T> = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) if status >= 400 => return Err(Error::HttpStatus { status, body }),
        Err(e) => return Err(e.into()),
    };

    if !envelope.success || status >= 400 {
        let message = envelope.error.unwrap_or_else(|| "request failed".to_string());
        return Err(match status {
            401 | 403 => Error::unauthorized(message),
            _ => Error::HttpStatus {
                status,
                body: message,
            },
        });
    }

    match envelope.data {
        Some(data) => Ok(data),
        // `null` data is valid for `Option` payloads
        None => Ok(serde_json::from_value(Value::Null)?),
    }
}
