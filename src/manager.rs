//! Session manager: owns every session's lifecycle, including the
//! lazily-created default session that lets callers skip `session/create`
//! for simple one-off work.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::process_manager::ProcessManager;
use crate::session::{Session, SessionError, SessionInfo};
use crate::Configuration;

pub const DEFAULT_SESSION_ID: &str = "default";

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("cwd must be an absolute path: {0}")]
    CwdNotAbsolute(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Owns every live `Session`, keyed by id. Cloned cheaply (`Arc` inside)
/// and shared across the router's `AppState`.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    config: Arc<Configuration>,
    /// Guards default-session creation so concurrent callers racing
    /// `getOrCreateDefaultSession` can't spawn two default sessions.
    default_creation_lock: tokio::sync::Mutex<()>,
    order: Mutex<Vec<String>>,
    /// Swept whenever a session is destroyed or replaced, so its background
    /// jobs never outlive it.
    processes: Arc<ProcessManager>,
}

impl SessionManager {
    pub fn new(config: Arc<Configuration>, processes: Arc<ProcessManager>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            default_creation_lock: tokio::sync::Mutex::new(()),
            order: Mutex::new(Vec::new()),
            processes,
        }
    }

    /// Creates a new session. If `id` names an existing session, that
    /// session is torn down first and replaced — callers can re-create a
    /// named session (including `default`) without a separate delete call.
    pub async fn create_session(
        &self,
        id: Option<String>,
        cwd: Option<String>,
        isolation: bool,
        env: Option<HashMap<String, String>>,
    ) -> Result<SessionInfo, ManagerError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let cwd = cwd.unwrap_or_else(|| "/".to_string());
        if !cwd.starts_with('/') {
            return Err(ManagerError::CwdNotAbsolute(cwd));
        }

        if let Some((_, old)) = self.sessions.remove(&id) {
            info!(session_id = %id, "replacing existing session");
            old.shutdown().await;
            self.processes.kill_session_processes(&id).await;
            self.order.lock().retain(|existing| existing != &id);
        }

        let session = Session::create(id.clone(), cwd, isolation, &self.config.temp_dir, env.unwrap_or_default()).await?;
        let info = session.info();
        self.sessions.insert(id.clone(), Arc::new(session));
        self.order.lock().push(id);

        Ok(info)
    }

    pub fn get_session(&self, id: &str) -> Result<Arc<Session>, ManagerError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let order = self.order.lock().clone();
        order
            .into_iter()
            .filter_map(|id| self.sessions.get(&id).map(|s| s.info()))
            .collect()
    }

    /// Returns the default session, creating it on first use.
    pub async fn get_or_create_default(&self) -> Result<Arc<Session>, ManagerError> {
        if let Ok(session) = self.get_session(DEFAULT_SESSION_ID) {
            return Ok(session);
        }

        let _guard = self.default_creation_lock.lock().await;
        // Re-check: another caller may have created it while we waited.
        if let Ok(session) = self.get_session(DEFAULT_SESSION_ID) {
            return Ok(session);
        }

        self.create_session(Some(DEFAULT_SESSION_ID.to_string()), Some("/workspace".to_string()), true, None)
            .await?;
        self.get_session(DEFAULT_SESSION_ID)
    }

    /// Convenience wrapper used by callers that don't care which session
    /// runs their command — resolves (and lazily creates) the default
    /// session first.
    pub async fn exec_default(
        &self,
        command: String,
        timeout_ms: u64,
    ) -> Result<crate::session::ExecResult, ManagerError> {
        let session = self.get_or_create_default().await?;
        Ok(session.exec(command, None, timeout_ms, false).await?)
    }

    pub async fn destroy_session(&self, id: &str) -> Result<(), ManagerError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        self.order.lock().retain(|existing| existing != id);
        session.shutdown().await;
        self.processes.kill_session_processes(id).await;
        Ok(())
    }

    /// Fans out a graceful shutdown to every session (used at daemon
    /// shutdown). Each `Session::shutdown` already applies its own
    /// 500ms grace period before force-killing its supervisor.
    pub async fn destroy_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let sessions: Vec<Arc<Session>> = ids.iter().filter_map(|id| self.get_session(id).ok()).collect();

        let mut handles = Vec::with_capacity(sessions.len());
        for session in sessions {
            handles.push(tokio::spawn(async move { session.shutdown().await }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("session shutdown task panicked: {}", e);
            }
        }

        self.sessions.clear();
        self.order.lock().clear();
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }
}
