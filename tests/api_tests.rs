//! Integration tests for the REST API

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use jobqueue::api::{router, ApiState};
use jobqueue::{BroadcastNotifier, Job, JobQueue, JobStatus, SqliteStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

// ============================================================================
// TEST HELPERS
// ============================================================================

fn app() -> (Router, JobQueue) {
    let events = BroadcastNotifier::default();
    let queue = JobQueue::new(
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(events.clone()),
    );
    let state = Arc::new(ApiState::new(queue.clone(), events));
    (router(state), queue)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, name: &str, priority: &str) -> Job {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/jobs",
        Some(json!({ "name": name, "priority": priority })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_value(body).unwrap()
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_get_job() {
    let (app, _) = app();
    let job = create(&app, "render", "High").await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);

    let (status, body) = send(&app, Method::GET, &format!("/api/jobs/{}", job.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "render");
    assert_eq!(body["priority"], "High");
    assert_eq!(body["status"], "Pending");
}

#[tokio::test]
async fn test_create_rejects_empty_name() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/jobs",
        Some(json!({ "name": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let (app, _) = app();
    let missing = format!("/api/jobs/{}", Uuid::new_v4());

    let (status, body) = send(&app, Method::GET, &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = send(&app, Method::POST, &format!("{}/stop", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/jobs/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop_restart_delete_roundtrip() {
    let (app, _) = app();
    let job = create(&app, "encode", "Regular").await;
    let path = format!("/api/jobs/{}", job.id);

    let (status, body) = send(&app, Method::POST, &format!("{}/stop", path), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Stopped");

    let (status, body) = send(&app, Method::POST, &format!("{}/restart", path), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Pending");
    assert_eq!(body["retryCount"], 1);

    let (status, _) = send(&app, Method::DELETE, &path, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, &path, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_and_progress_follow_lifecycle() {
    let (app, queue) = app();
    let job = create(&app, "encode", "Regular").await;
    let path = format!("/api/jobs/{}", job.id);

    // Not running yet: both writes leave the job untouched.
    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("{}/status", path),
        Some(json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Pending");

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("{}/progress", path),
        Some(json!({ "progress": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"], 0);

    queue.claim(Uuid::new_v4(), 1).await;

    let (_, body) = send(
        &app,
        Method::PUT,
        &format!("{}/progress", path),
        Some(json!({ "progress": 50 })),
    )
    .await;
    assert_eq!(body["progress"], 50);

    let (_, body) = send(
        &app,
        Method::PUT,
        &format!("{}/status", path),
        Some(json!({ "status": "Failed", "message": "out of memory" })),
    )
    .await;
    assert_eq!(body["status"], "Failed");
    assert_eq!(body["errorMessage"], "out of memory");

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("{}/status", path),
        Some(json!({ "status": "paused" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_jobs_with_filters() {
    let (app, _) = app();
    let regular = create(&app, "r", "Regular").await;
    let high = create(&app, "h", "High").await;

    let (status, body) = send(&app, Method::GET, "/api/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs: Vec<Job> = serde_json::from_value(body).unwrap();
    assert_eq!(
        jobs.iter().map(|j| j.id).collect::<Vec<_>>(),
        vec![high.id, regular.id]
    );

    let (_, body) = send(&app, Method::GET, "/api/jobs?priority=regular", None).await;
    let jobs: Vec<Job> = serde_json::from_value(body).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, regular.id);

    let (_, body) = send(&app, Method::GET, "/api/jobs?status=running", None).await;
    assert_eq!(body, json!([]));

    let (status, _) = send(&app, Method::GET, "/api/jobs?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_workers() {
    let (app, _) = app();
    let (status, body) = send(&app, Method::GET, "/api/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
