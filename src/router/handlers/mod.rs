pub mod execute;
pub mod files;
pub mod git;
pub mod ping;
pub mod port;
pub mod process;
pub mod session;

use std::sync::Arc;

use crate::error::{BrokerError, Result};
use crate::router::state::AppState;
use crate::session::Session;

/// Resolves the session a request targets: the named session if given, or
/// the lazily-created default session otherwise.
pub async fn resolve_session(state: &AppState, session_id: Option<&str>) -> Result<Arc<Session>> {
    match session_id {
        Some(id) => state
            .sessions
            .get_session(id)
            .map_err(|_| BrokerError::NotFound(format!("unknown session: {id}"))),
        None => Ok(state.sessions.get_or_create_default().await?),
    }
}
