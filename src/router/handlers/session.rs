use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::router::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub id: String,
    pub env: Option<HashMap<String, String>>,
    pub cwd: Option<String>,
    pub isolation: Option<bool>,
}

/// `POST /api/session/create`
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<serde_json::Value>> {
    state
        .sessions
        .create_session(Some(body.id.clone()), body.cwd, body.isolation.unwrap_or(true), body.env)
        .await?;

    Ok(Json(json!({
        "success": true,
        "id": body.id,
        "message": "session created",
    })))
}

/// `GET /api/session/list`
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.list_sessions();
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
        "timestamp": Utc::now(),
    }))
}
