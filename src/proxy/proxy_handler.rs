//! Transparent HTTP forwarding to `127.0.0.1:<port>`: method, headers,
//! body, and status all pass through unchanged; only `Host` is rewritten
//! to the upstream's own loopback address.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::error::BrokerError;

pub async fn forward(
    client: &reqwest::Client,
    port: u16,
    path_and_query: &str,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, BrokerError> {
    let url = format!("http://127.0.0.1:{port}{path_and_query}");
    let upstream_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|_| BrokerError::InvalidArgument(format!("unsupported method: {method}")))?;

    let mut request = client.request(upstream_method, &url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        request = request.header(name.as_str(), value.as_bytes());
    }
    request = request.body(body.to_vec());

    let upstream_response = request.send().await.map_err(|e| {
        BrokerError::Upstream(format!("proxying to 127.0.0.1:{port} failed: {e}"))
    })?;

    let status = StatusCode::from_u16(upstream_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers().iter() {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(name.as_str().as_bytes()),
            axum::http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response_headers.append(name, value);
        }
    }

    let body = upstream_response
        .bytes()
        .await
        .map_err(|e| BrokerError::Upstream(format!("reading upstream body: {e}")))?;

    Ok((status, response_headers, body).into_response())
}

/// Extracts the part of the incoming request path after `/proxy/{port}`,
/// preserving any query string.
pub fn rest_of_path(uri: &Uri, prefix: &str) -> String {
    let path = uri.path();
    let rest = path.strip_prefix(prefix).unwrap_or("");
    let rest = if rest.is_empty() { "/" } else { rest };
    match uri.query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_of_path_preserves_query() {
        let uri: Uri = "/proxy/8080/foo/bar?x=1".parse().unwrap();
        assert_eq!(rest_of_path(&uri, "/proxy/8080"), "/foo/bar?x=1");
    }

    #[test]
    fn rest_of_path_defaults_to_root() {
        let uri: Uri = "/proxy/8080".parse().unwrap();
        assert_eq!(rest_of_path(&uri, "/proxy/8080"), "/");
    }
}
