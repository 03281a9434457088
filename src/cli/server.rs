//! HTTP server exposing the control plane as a REST API

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{Role, TokenAuthority};
use crate::control::ControlPlane;
use crate::error::{Error, Result};
use crate::model::JobFilter;
use crate::types::{DatasetId, JobAction, JobId, JobStatus, ScheduleId};

/// App state shared across handlers
#[derive(Clone)]
pub struct AppState {
    plane: ControlPlane,
    /// Privileged routes are open when no API secret is configured
    authority: Option<TokenAuthority>,
}

impl AppState {
    pub fn new(plane: ControlPlane, authority: Option<TokenAuthority>) -> Self {
        Self { plane, authority }
    }

    fn require_operator(&self, headers: &HeaderMap) -> std::result::Result<(), ApiError> {
        let Some(authority) = &self.authority else {
            return Ok(());
        };
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        authority.authorize(header, Role::Operator)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    #[serde(default)]
    full_resync: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerRequest {
    #[serde(default)]
    cancel_in_flight: bool,
}

#[derive(Debug, Deserialize)]
struct ScheduleRequest {
    code: String,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
struct JobsQuery {
    dataset_id: Option<DatasetId>,
    status: Option<String>,
    limit: Option<usize>,
}

/// Response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Engine error rendered as an HTTP response
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyQueued { .. }
            | Error::InvalidTransition { .. }
            | Error::LockContention { .. } => StatusCode::CONFLICT,
            Error::Configuration { .. } | Error::MissingColumn { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

type Handler = std::result::Result<Response, ApiError>;

/// Build the REST router
pub fn router(state: AppState) -> Router {
    // Build CORS layer - allow all origins for the UI
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/datasets/trigger", post(trigger_all))
        .route("/datasets/:id/trigger", post(trigger))
        .route("/datasets/:id/schedule", put(update_schedule))
        .route("/schedules/:id/active", put(toggle_schedule))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/worker", get(worker_status))
        .route("/worker/:action", post(worker_action))
        .route("/locks", get(list_locks).delete(delete_all_locks))
        .route("/locks/:dataset_id", delete(delete_lock))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve the REST API until `shutdown` fires
pub async fn serve(state: AppState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind to port {port}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Other(format!("Server error: {e}")))?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Handler {
    Ok(ok(state.plane.health().await?))
}

async fn trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DatasetId>,
    body: Option<Json<TriggerRequest>>,
) -> Handler {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let action = if req.full_resync {
        JobAction::FullResync
    } else {
        JobAction::Manual
    };
    Ok(ok(state.plane.trigger(id, action).await?))
}

async fn trigger_all(State(state): State<Arc<AppState>>) -> Handler {
    Ok(ok(state.plane.trigger_all().await?))
}

async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<JobId>) -> Handler {
    Ok(ok(state.plane.cancel(id).await?))
}

async fn list_jobs(State(state): State<Arc<AppState>>, Query(query): Query<JobsQuery>) -> Handler {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let filter = JobFilter {
        dataset_id: query.dataset_id,
        status,
        limit: query.limit,
    };
    Ok(ok(state.plane.list_jobs(&filter).await?))
}

async fn worker_status(State(state): State<Arc<AppState>>) -> Handler {
    Ok(ok(state.plane.worker_status().await?))
}

async fn worker_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Option<Json<WorkerRequest>>,
) -> Handler {
    state.require_operator(&headers)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let status = match action.as_str() {
        "start" => state.plane.worker_start().await?,
        "stop" => state.plane.worker_stop(req.cancel_in_flight).await?,
        "restart" => state.plane.worker_restart().await?,
        other => {
            return Ok((
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<()>::error(format!("Unknown worker action: {other}"))),
            )
                .into_response())
        }
    };
    Ok(ok(status))
}

async fn list_locks(State(state): State<Arc<AppState>>) -> Handler {
    Ok(ok(state.plane.list_locks().await?))
}

async fn delete_lock(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<DatasetId>,
    headers: HeaderMap,
) -> Handler {
    state.require_operator(&headers)?;
    let removed = state.plane.delete_lock(dataset_id).await?;
    Ok(ok(json!({ "dataset_id": dataset_id, "removed": removed })))
}

async fn delete_all_locks(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Handler {
    state.require_operator(&headers)?;
    let removed = state.plane.delete_all_locks().await?;
    Ok(ok(json!({ "removed": removed })))
}

async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DatasetId>,
    Json(req): Json<ScheduleRequest>,
) -> Handler {
    Ok(ok(state.plane.update_schedule(id, &req.code).await?))
}

async fn toggle_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ScheduleId>,
    Json(req): Json<ToggleRequest>,
) -> Handler {
    Ok(ok(state.plane.toggle_schedule(id, req.is_active).await?))
}
