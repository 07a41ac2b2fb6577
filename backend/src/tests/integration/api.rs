use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::handlers::api_router;
use crate::tests::fixtures::{user_payload, workflow_body};
use crate::tests::helpers::TestHarness;
use crate::workflows::WorkerStats;
use crate::AppState;

fn app(harness: &TestHarness, worker_stats: Option<Arc<WorkerStats>>) -> Router {
    api_router(Arc::new(AppState {
        engine: harness.engine.clone(),
        worker_stats,
    }))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let harness = TestHarness::new();
    let (status, body) = send(&app(&harness, None), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_workflow_crud() {
    let harness = TestHarness::new();
    let app = app(&harness, None);

    let (status, created) = send(&app, "POST", "/api/v1/workflows", Some(workflow_body("Tag pros", "user.created"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["enabled"], true);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, "GET", &format!("/api/v1/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Tag pros");
    assert_eq!(fetched["actions"][0]["type"], "tag_user");

    let mut update = workflow_body("Tag pros v2", "user.created");
    update["enabled"] = json!(false);
    let (status, updated) = send(&app, "PUT", &format!("/api/v1/workflows/{}", id), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Tag pros v2");
    assert_eq!(updated["enabled"], false);

    let (status, toggled) = send(&app, "POST", &format!("/api/v1/workflows/{}/toggle", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["enabled"], true);

    let (status, list) = send(&app, "GET", "/api/v1/workflows?page=1&per_page=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["meta"]["total"], 1);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) = send(&app, "GET", &format!("/api/v1/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_workflow_rejected() {
    let harness = TestHarness::new();
    let app = app(&harness, None);

    let (status, error) = send(&app, "POST", "/api/v1/workflows", Some(workflow_body("", "user.created"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "VALIDATION_ERROR");
    assert!(error["details"]["name"].is_array());

    let mut body = workflow_body("Broken email", "user.created");
    body["actions"] = json!([{"type": "send_email", "to": "", "subject": "s", "body": "b"}]);
    let (status, error) = send(&app, "POST", "/api/v1/workflows", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error["details"]["actions"].is_array());
}

#[tokio::test]
async fn test_event_dispatch_and_run_inspection() {
    let harness = TestHarness::new();
    let app = app(&harness, None);
    send(&app, "POST", "/api/v1/workflows", Some(workflow_body("Tag pros", "user.created"))).await;

    let (status, accepted) = send(
        &app,
        "POST",
        "/api/v1/events",
        Some(json!({"event_type": "user.created", "payload": user_payload("u1", "pro")})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_ids = accepted["run_ids"].as_array().unwrap();
    assert_eq!(run_ids.len(), 1);
    let run_id = run_ids[0].as_str().unwrap();

    let (_, skipped) = send(
        &app,
        "POST",
        "/api/v1/events",
        Some(json!({"event_type": "user.created", "payload": user_payload("u2", "free")})),
    )
    .await;
    assert!(skipped["run_ids"].as_array().unwrap().is_empty());

    let (status, run) = send(&app, "GET", &format!("/api/v1/runs/{}", run_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "running");
    assert_eq!(run["trigger_data"]["user"]["id"], "u1");

    let (status, runs) = send(&app, "GET", "/api/v1/runs?status=running&per_page=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs["meta"]["total"], 1);
    assert_eq!(runs["meta"]["per_page"], 5);

    let (_, none) = send(&app, "GET", "/api/v1/runs?status=failed", None).await;
    assert_eq!(none["meta"]["total"], 0);

    let (status, logs) = send(&app, "GET", &format!("/api/v1/runs/{}/logs", run_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(logs.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", &format!("/api/v1/runs/{}/logs", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/api/v1/events", Some(json!({"event_type": " "}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_test_dispatch_endpoint() {
    let harness = TestHarness::new();
    let app = app(&harness, None);
    let (_, created) = send(&app, "POST", "/api/v1/workflows", Some(workflow_body("Tag pros", "user.created"))).await;
    let id = created["id"].as_str().unwrap();

    let (status, dry) = send(
        &app,
        "POST",
        &format!("/api/v1/workflows/{}/test", id),
        Some(json!({"payload": user_payload("u1", "pro"), "dry_run": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dry["matched"], true);
    assert!(dry["run_id"].is_null());

    let (_, real) = send(
        &app,
        "POST",
        &format!("/api/v1/workflows/{}/test", id),
        Some(json!({"payload": user_payload("u1", "pro")})),
    )
    .await;
    assert!(real["run_id"].is_string());
}

#[tokio::test]
async fn test_stats_include_worker_counters() {
    let harness = TestHarness::new();
    send(&app(&harness, None), "POST", "/api/v1/workflows", Some(workflow_body("Tag pros", "user.created"))).await;

    let (status, without_worker) = send(&app(&harness, None), "GET", "/api/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(without_worker["workflows_total"], 1);
    assert!(without_worker.get("worker").is_none());

    let stats = Arc::new(WorkerStats::default());
    let (_, with_worker) = send(&app(&harness, Some(stats)), "GET", "/api/v1/stats", None).await;
    assert_eq!(with_worker["worker"]["processed"], 0);
    assert_eq!(with_worker["queue"]["queued"], 0);
}
