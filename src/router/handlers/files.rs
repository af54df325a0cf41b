use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::router::handlers::resolve_session;
use crate::router::state::AppState;
use crate::services::FileService;

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
    pub recursive: Option<bool>,
    pub session_id: Option<String>,
}

pub async fn mkdir(State(state): State<AppState>, Json(body): Json<MkdirRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let recursive = body.recursive.unwrap_or(true);
    let result = FileService::mkdir(&session, &body.path, recursive).await?;

    Ok(Json(json!({
        "success": result.exit_code == 0,
        "exitCode": result.exit_code,
        "path": body.path,
        "recursive": recursive,
    })))
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
    pub encoding: Option<String>,
    pub session_id: Option<String>,
}

pub async fn write(State(state): State<AppState>, Json(body): Json<WriteRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let content = decode_content(&body.content, body.encoding.as_deref())?;
    let result = FileService::write(&session, &body.path, &content).await?;

    Ok(Json(json!({
        "success": result.exit_code == 0,
        "exitCode": result.exit_code,
        "path": body.path,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    pub path: String,
    pub encoding: Option<String>,
    pub session_id: Option<String>,
}

pub async fn read(State(state): State<AppState>, Json(body): Json<ReadRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let result = FileService::read(&session, &body.path).await?;
    let content = encode_content(&result.stdout, body.encoding.as_deref());

    Ok(Json(json!({
        "success": result.exit_code == 0,
        "exitCode": result.exit_code,
        "content": content,
        "path": body.path,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
    pub session_id: Option<String>,
}

pub async fn delete(State(state): State<AppState>, Json(body): Json<DeleteRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let result = FileService::delete(&session, &body.path).await?;

    Ok(Json(json!({
        "success": result.exit_code == 0,
        "exitCode": result.exit_code,
        "path": body.path,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
    pub session_id: Option<String>,
}

pub async fn rename(State(state): State<AppState>, Json(body): Json<RenameRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let result = FileService::rename(&session, &body.old_path, &body.new_path).await?;

    Ok(Json(json!({
        "success": result.exit_code == 0,
        "exitCode": result.exit_code,
        "oldPath": body.old_path,
        "newPath": body.new_path,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub source_path: String,
    pub destination_path: String,
    pub session_id: Option<String>,
}

pub async fn move_file(State(state): State<AppState>, Json(body): Json<MoveRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let result = FileService::move_path(&session, &body.source_path, &body.destination_path).await?;

    Ok(Json(json!({
        "success": result.exit_code == 0,
        "exitCode": result.exit_code,
        "sourcePath": body.source_path,
        "destinationPath": body.destination_path,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListFilesRequest {
    pub path: String,
    pub recursive: Option<bool>,
    pub include_hidden: Option<bool>,
    pub session_id: Option<String>,
}

pub async fn list_files(State(state): State<AppState>, Json(body): Json<ListFilesRequest>) -> Result<Json<serde_json::Value>> {
    let session = resolve_session(&state, body.session_id.as_deref()).await?;
    let files = FileService::list(
        &session,
        &body.path,
        body.recursive.unwrap_or(false),
        body.include_hidden.unwrap_or(false),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "exitCode": 0,
        "files": files,
        "path": body.path,
    })))
}

fn decode_content(content: &str, encoding: Option<&str>) -> Result<Vec<u8>> {
    match encoding {
        Some("base64") => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(content)
                .map_err(|e| crate::error::BrokerError::InvalidArgument(format!("invalid base64 content: {e}")))
        }
        _ => Ok(content.as_bytes().to_vec()),
    }
}

fn encode_content(bytes: &[u8], encoding: Option<&str>) -> String {
    match encoding {
        Some("base64") => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(bytes)
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
