//! Tests for the REST router and client

use super::*;
use crate::auth::{Role, TokenAuthority};
use crate::catalog::Catalog;
use crate::control::ControlPlane;
use crate::engine::SyncEngine;
use crate::error::Error;
use crate::lock::LockManager;
use crate::model::{Connection, Dataset, JobFilter};
use crate::schedule::Scheduler;
use crate::source::DefaultSourceOpener;
use crate::supervisor::{SupervisorConfig, WorkerSupervisor};
use crate::types::{JobStatus, SourceType};
use crate::writer::DuckDbTarget;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "router-test-secret";

async fn plane() -> ControlPlane {
    let catalog = Arc::new(Catalog::in_memory());
    catalog
        .put_connection(Connection::new(1, "src", SourceType::Postgres))
        .await
        .unwrap();
    for id in [1, 2] {
        catalog
            .put_dataset(Dataset::new(id, 1, "orders", format!("orders_{id}")))
            .await
            .unwrap();
    }
    let engine = SyncEngine::new(
        catalog.clone(),
        Arc::new(DefaultSourceOpener::new(None)),
        Arc::new(DuckDbTarget::in_memory().unwrap()),
        LockManager::in_memory(Duration::from_secs(60)),
    );
    let scheduler = Scheduler::new(catalog, Duration::from_secs(60));
    let worker = WorkerSupervisor::new(
        engine,
        scheduler,
        SupervisorConfig::default()
            .with_scheduler(false)
            .with_poll_interval(Duration::from_millis(20)),
    );
    ControlPlane::new(worker)
}

async fn app(secured: bool) -> axum::Router {
    let authority = secured.then(|| TokenAuthority::new(SECRET).unwrap());
    router(AppState::new(plane().await, authority))
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn job_json(id: i64, dataset_id: i64, status: &str) -> Value {
    json!({
        "id": id,
        "dataset_id": dataset_id,
        "action": "manual",
        "status": status,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    })
}

// ============================================================================
// Router Tests
// ============================================================================

#[tokio::test]
async fn test_health_route() {
    let app = app(false).await;
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["crash_suspected"], false);
}

#[tokio::test]
async fn test_trigger_route_conflicts_when_queued() {
    let app = app(false).await;

    let (status, body) = send(
        &app,
        with_json("POST", "/datasets/1/trigger", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["dataset_id"], 1);

    let (status, body) = send(
        &app,
        with_json("POST", "/datasets/1/trigger", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("already"));
}

#[tokio::test]
async fn test_trigger_route_full_resync_supersedes() {
    let app = app(false).await;
    send(&app, with_json("POST", "/datasets/1/trigger", json!({}), None)).await;

    let (status, body) = send(
        &app,
        with_json(
            "POST",
            "/datasets/1/trigger",
            json!({ "full_resync": true }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"], "full_resync");
}

#[tokio::test]
async fn test_trigger_unknown_dataset_is_not_found() {
    let app = app(false).await;
    let (status, _) = send(
        &app,
        with_json("POST", "/datasets/99/trigger", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_jobs_route_filters_by_status() {
    let app = app(false).await;
    send(&app, with_json("POST", "/datasets/trigger", json!({}), None)).await;

    let (status, body) = send(&app, get("/jobs?status=pending&dataset_id=2")).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["dataset_id"], 2);

    let (status, _) = send(&app, get("/jobs?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_route() {
    let app = app(false).await;
    let (_, body) = send(
        &app,
        with_json("POST", "/datasets/1/trigger", json!({}), None),
    )
    .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        with_json("POST", &format!("/jobs/{id}/cancel"), json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
}

#[tokio::test]
async fn test_schedule_routes() {
    let app = app(false).await;
    let (status, body) = send(
        &app,
        with_json("PUT", "/datasets/1/schedule", json!({ "code": "hourly" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cron_expression"], "0 * * * *");
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        with_json(
            "PUT",
            &format!("/schedules/{id}/active"),
            json!({ "is_active": false }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], false);

    let (status, _) = send(
        &app,
        with_json("PUT", "/datasets/1/schedule", json!({ "code": "sometimes" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_privileged_routes_open_without_secret() {
    let app = app(false).await;
    let req = Request::builder()
        .method("DELETE")
        .uri("/locks/1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], false);
}

#[tokio::test]
async fn test_worker_control_requires_operator_token() {
    let app = app(true).await;
    let authority = TokenAuthority::new(SECRET).unwrap();
    let viewer = authority.mint("bob", Role::Viewer).unwrap();
    let operator = authority.mint("alice", Role::Operator).unwrap();

    let (status, _) = send(&app, with_json("POST", "/worker/start", json!({}), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        with_json("POST", "/worker/start", json!({}), Some(&viewer)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        with_json("POST", "/worker/start", json!({}), Some(&operator)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");

    // reads stay open
    let (status, body) = send(&app, get("/worker")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");

    let (status, body) = send(
        &app,
        with_json(
            "POST",
            "/worker/stop",
            json!({ "cancel_in_flight": true }),
            Some(&operator),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "stopped");
}

#[tokio::test]
async fn test_unknown_worker_action() {
    let app = app(false).await;
    let (status, body) = send(&app, with_json("POST", "/worker/pause", json!({}), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

// ============================================================================
// Client Tests
// ============================================================================

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri())
        .unwrap()
        .with_retries(2, Duration::from_millis(1))
}

#[tokio::test]
async fn test_client_decodes_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/datasets/7/trigger"))
        .and(body_json(json!({ "full_resync": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "data": job_json(3, 7, "pending") })),
        )
        .mount(&server)
        .await;

    let job = client(&server).trigger(7, true).await.unwrap();
    assert_eq!(job.id, 3);
    assert_eq!(job.dataset_id, 7);
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_client_sends_bearer_token_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("status", "failed"))
        .and(query_param("limit", "5"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": [] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let filter = JobFilter {
        dataset_id: None,
        status: Some(JobStatus::Failed),
        limit: Some(5),
    };
    let jobs = client(&server)
        .with_token(Some("tok".into()))
        .jobs(&filter)
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_client_retries_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/locks"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": [] })),
        )
        .mount(&server)
        .await;

    let locks = client(&server).locks().await.unwrap();
    assert!(locks.is_empty());
}

#[tokio::test]
async fn test_client_gives_up_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/locks"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).locks().await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 503, .. }));
}

#[tokio::test]
async fn test_client_maps_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/worker/start"))
        .respond_with(ResponseTemplate::new(401).set_body_json(
            json!({ "success": false, "error": "Missing bearer token" }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).worker_action("start", false).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { .. }));
}

#[tokio::test]
async fn test_client_conflict_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/datasets/1/trigger"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            json!({ "success": false, "error": "already queued" }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).trigger(1, false).await.unwrap_err();
    match err {
        Error::HttpStatus { status, body } => {
            assert_eq!(status, 409);
            assert_eq!(body, "already queued");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_client_keeps_base_path() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/locks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "data": { "removed": 2 } })),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(&format!("{}/api", server.uri())).unwrap();
    let removed = client.delete_all_locks().await.unwrap();
    assert_eq!(removed["removed"], 2);
}

#[tokio::test]
async fn test_client_null_schedule() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/datasets/4/schedule"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": null })),
        )
        .mount(&server)
        .await;

    let schedule = client(&server).update_schedule(4, "manual").await.unwrap();
    assert!(schedule.is_none());
}

// ============================================================================
// End-to-End
// ============================================================================

#[tokio::test]
async fn test_client_against_router() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(plane().await, None));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ApiClient::new(&format!("http://{addr}")).unwrap();
    let job = client.trigger(2, false).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let err = client.trigger(2, false).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 409, .. }));

    let outcome = client.trigger_all().await.unwrap();
    assert_eq!(outcome.enqueued.len(), 1);
    assert_eq!(outcome.already_queued, vec![2]);

    let cancelled = client.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
}
