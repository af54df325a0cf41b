use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::router::state::AppState;

/// `GET /api/ping` — does not gate on session/process state; Jupyter
/// readiness is a passthrough from `/tmp/jupyter-ready`, observed and not
/// otherwise acted on.
pub async fn ping() -> Json<serde_json::Value> {
    let jupyter = if tokio::fs::metadata("/tmp/jupyter-ready").await.is_ok() {
        "ready"
    } else {
        "not ready"
    };

    Json(json!({
        "message": "pong",
        "timestamp": Utc::now(),
        "jupyter": jupyter,
    }))
}

/// `GET /api/health` — a liveness probe independent of the Jupyter
/// passthrough `ping` carries.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.uptime_seconds(),
    }))
}
