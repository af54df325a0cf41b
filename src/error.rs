//! Crate-wide error taxonomy and its HTTP representation.
//!
//! Every error that can reach the HTTP boundary is funneled into a
//! [`BrokerError`] with seven variants (invalid-argument, not-found,
//! conflict, timeout, upstream, internal, precondition), which renders as
//! `{error, code, details?}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            BrokerError::NotFound(_) => "NOT_FOUND",
            BrokerError::Conflict(_) => "CONFLICT",
            BrokerError::Timeout(_) => "TIMEOUT",
            BrokerError::Upstream(_) => "UPSTREAM_ERROR",
            BrokerError::Precondition(_) => "PRECONDITION_FAILED",
            BrokerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            BrokerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::Conflict(_) => StatusCode::CONFLICT,
            BrokerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BrokerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            // precondition (session not ready) is distinguished from plain
            // internal by its code, not its status.
            BrokerError::Precondition(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

impl From<crate::security::ValidationError> for BrokerError {
    fn from(e: crate::security::ValidationError) -> Self {
        BrokerError::InvalidArgument(e.to_string())
    }
}

impl From<crate::session::SessionError> for BrokerError {
    fn from(e: crate::session::SessionError) -> Self {
        match e {
            crate::session::SessionError::Busy => BrokerError::Conflict(e.to_string()),
            crate::session::SessionError::CwdNotAbsolute(_) => BrokerError::InvalidArgument(e.to_string()),
            crate::session::SessionError::Supervisor(_) => BrokerError::Internal(e.to_string()),
        }
    }
}

impl From<crate::manager::ManagerError> for BrokerError {
    fn from(e: crate::manager::ManagerError) -> Self {
        match e {
            crate::manager::ManagerError::NotFound(id) => BrokerError::NotFound(id),
            crate::manager::ManagerError::CwdNotAbsolute(_) => BrokerError::InvalidArgument(e.to_string()),
            crate::manager::ManagerError::Session(inner) => inner.into(),
        }
    }
}

impl From<crate::process_manager::ProcessManagerError> for BrokerError {
    fn from(e: crate::process_manager::ProcessManagerError) -> Self {
        match e {
            crate::process_manager::ProcessManagerError::NotFound(id) => BrokerError::NotFound(id),
            crate::process_manager::ProcessManagerError::Spawn(err) => BrokerError::Internal(err.to_string()),
            crate::process_manager::ProcessManagerError::NotRunning => BrokerError::Conflict(e.to_string()),
        }
    }
}

impl From<crate::proxy::PortRegistryError> for BrokerError {
    fn from(e: crate::proxy::PortRegistryError) -> Self {
        match e {
            crate::proxy::PortRegistryError::Validation(inner) => inner.into(),
            crate::proxy::PortRegistryError::NotExposed(_) => BrokerError::NotFound(e.to_string()),
            crate::proxy::PortRegistryError::AlreadyExposed(_) => BrokerError::Conflict(e.to_string()),
        }
    }
}
