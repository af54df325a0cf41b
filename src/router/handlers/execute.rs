use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::Stream;

use crate::error::{BrokerError, Result};
use crate::router::handlers::resolve_session;
use crate::router::sse::sse_from_mpsc;
use crate::router::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub id: Option<String>,
    pub command: String,
}

/// `POST /api/execute`
pub async fn execute(State(state): State<AppState>, Json(body): Json<ExecuteRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.id.as_deref()).await?;
    let timeout_ms = state.config.command_timeout_ms;

    let result = session.exec(body.command.clone(), None, timeout_ms, false).await?;

    Ok(Json(json!({
        "command": body.command,
        "exitCode": result.exit_code,
        "stdout": String::from_utf8_lossy(&result.stdout),
        "stderr": String::from_utf8_lossy(&result.stderr),
        "success": result.exit_code == 0,
        "timestamp": Utc::now(),
    })))
}

/// `POST /api/execute/stream`
pub async fn execute_stream(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, BrokerError> {
    let session = resolve_session(&state, body.id.as_deref()).await?;
    let timeout_ms = state.config.command_timeout_ms;

    let rx = session.exec_stream(body.command, None, timeout_ms, false).await?;
    Ok(sse_from_mpsc(rx))
}
