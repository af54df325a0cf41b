use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::router::handlers::resolve_session;
use crate::router::state::AppState;
use crate::services::GitService;

const DEFAULT_TARGET_DIR: &str = "/workspace/repo";

#[derive(Debug, Deserialize)]
pub struct GitDirQuery {
    pub dir: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitCheckoutRequest {
    pub repo_url: String,
    pub branch: Option<String>,
    pub target_dir: Option<String>,
    pub session_id: Option<String>,
}

/// `POST /api/git/checkout`
pub async fn checkout(State(state): State<AppState>, Json(body): Json<GitCheckoutRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let target_dir = body.target_dir.clone().unwrap_or_else(|| DEFAULT_TARGET_DIR.to_string());

    let result = GitService::checkout(&session, &body.repo_url, &target_dir, body.branch.as_deref()).await?;

    Ok(Json(json!({
        "repoUrl": body.repo_url,
        "branch": body.branch,
        "targetDir": target_dir,
        "exitCode": result.exit_code,
        "stdout": String::from_utf8_lossy(&result.stdout),
        "stderr": String::from_utf8_lossy(&result.stderr),
        "success": result.exit_code == 0,
        "timestamp": Utc::now(),
    })))
}

/// `GET /api/git/branch`
pub async fn branch(State(state): State<AppState>, Query(query): Query<GitDirQuery>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, query.session_id.as_deref()).await?;
    let dir = query.dir.unwrap_or_else(|| DEFAULT_TARGET_DIR.to_string());
    let branch = GitService::current_branch(&session, &dir).await?;

    Ok(Json(json!({
        "dir": dir,
        "branch": branch,
        "timestamp": Utc::now(),
    })))
}

/// `GET /api/git/branches`
pub async fn branches(State(state): State<AppState>, Query(query): Query<GitDirQuery>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, query.session_id.as_deref()).await?;
    let dir = query.dir.unwrap_or_else(|| DEFAULT_TARGET_DIR.to_string());
    let branches = GitService::list_branches(&session, &dir).await?;

    Ok(Json(json!({
        "dir": dir,
        "branches": branches,
        "count": branches.len(),
        "timestamp": Utc::now(),
    })))
}
