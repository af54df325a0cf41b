use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::{BrokerError, Result};
use crate::proxy::{forward, rest_of_path};
use crate::router::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExposePortRequest {
    pub port: u32,
    pub name: Option<String>,
}

/// `POST /api/expose-port`
pub async fn expose(State(state): State<AppState>, Json(body): Json<ExposePortRequest>) -> Result<Json<serde_json::Value>> {
    let exposed = state.ports.expose(body.port, body.name)?;
    Ok(Json(json!({
        "port": exposed.port,
        "name": exposed.label,
        "exposedAt": exposed.exposed_at,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UnexposePortRequest {
    pub port: u16,
}

/// `DELETE /api/unexpose-port`
pub async fn unexpose(State(state): State<AppState>, Json(body): Json<UnexposePortRequest>) -> Result<Json<serde_json::Value>> {
    state.ports.unexpose(body.port)?;
    Ok(Json(json!({
        "success": true,
        "port": body.port,
    })))
}

/// `GET /api/exposed-ports`
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ports": state.ports.list() }))
}

/// `ANY /proxy/{port}/{rest…}`
pub async fn passthrough(
    State(state): State<AppState>,
    Path((port, _rest)): Path<(u16, String)>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> std::result::Result<Response, BrokerError> {
    proxy_to(&state, port, &uri, method, headers, body).await
}

/// `ANY /proxy/{port}` — the bare-prefix case with no trailing path.
pub async fn passthrough_root(
    State(state): State<AppState>,
    Path(port): Path<u16>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> std::result::Result<Response, BrokerError> {
    proxy_to(&state, port, &uri, method, headers, body).await
}

async fn proxy_to(
    state: &AppState,
    port: u16,
    uri: &Uri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, BrokerError> {
    if !state.ports.is_exposed(port) {
        return Ok((
            axum::http::StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("port {port} is not exposed") })),
        )
            .into_response());
    }

    let prefix = format!("/proxy/{port}");
    let path_and_query = rest_of_path(uri, &prefix);
    forward(&state.http_client, port, &path_and_query, method, headers, body).await
}
