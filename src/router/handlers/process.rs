use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::Stream;

use crate::error::{BrokerError, Result};
use crate::process_manager::ProcessEvent;
use crate::router::handlers::resolve_session;
use crate::router::sse::sse_from_broadcast_mapped;
use crate::router::state::AppState;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct ProcessStartOptions {
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessStartRequest {
    pub command: String,
    pub session_name: Option<String>,
    pub options: Option<ProcessStartOptions>,
}

/// `POST /api/process/start`
pub async fn start(State(state): State<AppState>, Json(body): Json<ProcessStartRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_name.as_deref()).await?;
    let options = body.options.unwrap_or_default();
    let info = session.info();
    let cwd = options.cwd.unwrap_or(info.cwd);
    let mut env = session.env_overlay().clone();
    env.extend(options.env.unwrap_or_default());
    let name = body.session_name.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let process = state
        .processes
        .start(session.id().to_string(), name, body.command, cwd, env, info.isolation_effective)
        .await?;

    Ok(Json(json!({ "process": process })))
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    pub session: Option<String>,
}

/// `GET /api/process/list`
pub async fn list(State(state): State<AppState>, Query(filter): Query<SessionFilter>) -> Json<serde_json::Value> {
    let processes = state.processes.list(filter.session.as_deref());
    Json(json!({
        "processes": processes,
        "count": processes.len(),
        "timestamp": Utc::now(),
    }))
}

/// `GET /api/process/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>> {
    let process = state.processes.get(&id)?;
    Ok(Json(json!({
        "process": process,
        "timestamp": Utc::now(),
    })))
}

/// `DELETE /api/process/{id}`
pub async fn kill(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>> {
    state.processes.kill(&id).await?;
    Ok(Json(json!({
        "success": true,
        "processId": id,
        "message": "process killed",
        "timestamp": Utc::now(),
    })))
}

/// `DELETE /api/process/kill-all`
pub async fn kill_all(State(state): State<AppState>, Query(filter): Query<SessionFilter>) -> Json<serde_json::Value> {
    let before = state.processes.list(filter.session.as_deref()).len();
    state.processes.kill_all(filter.session.as_deref()).await;
    Json(json!({
        "success": true,
        "killedCount": before,
        "message": "kill signal sent to all matching processes",
        "timestamp": Utc::now(),
    }))
}

/// `GET /api/process/{id}/logs`
pub async fn logs(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>> {
    let lines = state.processes.logs(&id, None)?;
    Ok(Json(json!({
        "logs": { "stdout": lines, "stderr": Vec::<String>::new() },
        "processId": id,
        "timestamp": Utc::now(),
    })))
}

/// `GET /api/process/{id}/stream`
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, BrokerError> {
    let rx = state.processes.subscribe(&id)?;
    let info = state.processes.get(&id)?;
    let process_id = id.clone();
    let session_name = info.name.clone();

    Ok(sse_from_broadcast_mapped(rx, move |event| {
        let (frame_type, data, timestamp, status, exit_code) = match event {
            ProcessEvent::Stdout { line, timestamp } => ("stdout", line, timestamp, None, None),
            ProcessEvent::Stderr { line, timestamp } => ("stderr", line, timestamp, None, None),
            ProcessEvent::Exit { code, status, timestamp } => {
                ("complete", String::new(), timestamp, Some(status), Some(code))
            }
        };

        json!({
            "type": frame_type,
            "data": data,
            "processId": process_id.clone(),
            "sessionName": session_name.clone(),
            "timestamp": timestamp,
            "status": status,
            "exitCode": exit_code,
        })
    }))
}
