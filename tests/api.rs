//! End-to-end HTTP tests against the full router, driven the same way the
//! teacher drives its own router tests: build the `Router`, feed it
//! requests through `tower::ServiceExt::oneshot`, no real socket involved.
//! These exercise the seed scenarios from the broker's testable-properties
//! list.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use sandbox_broker::router::{build_router, AppState};
use sandbox_broker::Configuration;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> Configuration {
    Configuration {
        bind_host: "127.0.0.1".to_string(),
        bind_port: 0,
        command_timeout_ms: 5_000,
        cleanup_interval_ms: 60_000,
        temp_file_max_age_ms: 60_000,
        temp_dir: std::env::temp_dir(),
        debug: false,
    }
}

async fn app() -> axum::Router {
    build_router(AppState::new(Arc::new(test_config())))
}

async fn call(app: axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn ping_and_health_do_not_require_a_session() {
    let app = app().await;
    let (status, body) = call(app.clone(), Method::GET, "/api/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");

    let (status, body) = call(app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn stateful_shell_preserves_cwd_and_env_across_calls() {
    let app = app().await;

    let (status, _) = call(
        app.clone(),
        Method::POST,
        "/api/session/create",
        Some(json!({ "id": "s1", "cwd": "/tmp", "isolation": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app.clone(),
        Method::POST,
        "/api/execute",
        Some(json!({ "id": "s1", "command": "cd subdir 2>/dev/null || mkdir -p subdir && cd subdir; export K=v" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = call(
        app,
        Method::POST,
        "/api/execute",
        Some(json!({ "id": "s1", "command": "pwd; echo $K" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stdout = body["stdout"].as_str().unwrap();
    assert!(stdout.starts_with("/tmp/subdir"), "got: {stdout:?}");
    assert!(stdout.trim_end().ends_with('v'), "got: {stdout:?}");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = app().await;
    let (status, body) = call(
        app,
        Method::POST,
        "/api/execute",
        Some(json!({ "id": "does-not-exist", "command": "true" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn exec_exit_code_and_success_agree() {
    let app = app().await;
    let (status, body) = call(
        app,
        Method::POST,
        "/api/execute",
        Some(json!({ "command": "exit 3" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exitCode"], 3);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn expose_port_boundary_values_are_rejected() {
    let app = app().await;
    let (status, _) = call(app.clone(), Method::POST, "/api/expose-port", Some(json!({ "port": 1023 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app, Method::POST, "/api/expose-port", Some(json!({ "port": 65536 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expose_then_unexpose_round_trips() {
    let app = app().await;
    let (status, _) = call(
        app.clone(),
        Method::POST,
        "/api/expose-port",
        Some(json!({ "port": 18080, "name": "app" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(app.clone(), Method::GET, "/api/exposed-ports", None).await;
    assert_eq!(status, StatusCode::OK);
    let ports = body["ports"].as_array().unwrap();
    assert!(ports.iter().any(|p| p["port"] == 18080));

    let (status, _) = call(
        app.clone(),
        Method::DELETE,
        "/api/unexpose-port",
        Some(json!({ "port": 18080 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(app, Method::GET, "/api/exposed-ports", None).await;
    let ports = body["ports"].as_array().unwrap();
    assert!(!ports.iter().any(|p| p["port"] == 18080));
}

#[tokio::test]
async fn proxy_to_unregistered_port_is_not_found() {
    let app = app().await;
    let req = Request::builder()
        .method(Method::GET)
        .uri("/proxy/19999/healthz")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn background_process_runs_to_completion_and_kill_all_is_scoped() {
    let app = app().await;

    let (status, body) = call(
        app.clone(),
        Method::POST,
        "/api/process/start",
        Some(json!({
            "command": "for i in 1 2 3; do echo line$i; sleep 0.02; done",
            "session_name": "s2",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["process"]["id"].as_str().unwrap().to_string();

    let (_, body) = call(
        app.clone(),
        Method::POST,
        "/api/process/start",
        Some(json!({ "command": "sleep 2", "session_name": "s2" })),
    )
    .await;
    assert!(body["process"]["id"].as_str().is_some());

    // Give the first (short-lived) job a moment to finish on its own.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let (status, body) = call(app.clone(), Method::GET, &format!("/api/process/{id}/logs"), None).await;
    assert_eq!(status, StatusCode::OK);
    let lines = body["logs"]["stdout"].as_array().unwrap();
    assert!(lines.len() >= 3, "expected at least 3 log lines, got {lines:?}");

    let (status, body) = call(
        app.clone(),
        Method::DELETE,
        "/api/process/kill-all?session=s2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["killedCount"].as_u64().unwrap() >= 1);

    let (_, body) = call(app, Method::GET, "/api/process/list?session=s2", None).await;
    let processes = body["processes"].as_array().unwrap();
    assert_eq!(processes.len(), 2);
}

#[tokio::test]
async fn write_then_read_file_round_trips_content() {
    let app = app().await;
    let dir = std::env::temp_dir().join(format!("broker-test-{}", uuid::Uuid::new_v4()));
    let path = dir.join("round-trip.txt");
    let path_str = path.to_string_lossy().to_string();
    let dir_str = dir.to_string_lossy().to_string();

    let (status, _) = call(
        app.clone(),
        Method::POST,
        "/api/mkdir",
        Some(json!({ "path": dir_str, "recursive": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        app.clone(),
        Method::POST,
        "/api/write",
        Some(json!({ "path": path_str, "content": "hello sandbox\n" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app,
        Method::POST,
        "/api/read",
        Some(json!({ "path": path_str })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "hello sandbox\n");

    let _ = std::fs::remove_dir_all(&dir);
}
