//! A single persistent shell session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::supervisor::protocol::StreamEvent;
use crate::supervisor::{Supervisor, SupervisorError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a command is already running in this session")]
    Busy,

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("cwd override must be an absolute path: {0}")]
    CwdNotAbsolute(String),
}

/// Result of a completed (non-streamed) `exec`.
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// Snapshot returned by `SessionManager::listSessions` and `session/create`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub cwd: String,
    pub isolation_effective: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// One isolated, persistent shell, backed by a control supervisor child
/// process. Only one `exec`/`execStream` may be in flight at a time; later
/// callers queue behind `locker` rather than racing the shared shell.
pub struct Session {
    id: String,
    /// The shell's actual current working directory, refreshed after every
    /// `exec`/`execStream` from the `$PWD` the supervisor reports back —
    /// not just the directory the session was created with.
    cwd: Arc<RwLock<String>>,
    isolation_effective: bool,
    env_overlay: HashMap<String, String>,
    created_at: DateTime<Utc>,
    last_active_at_epoch_ms: AtomicI64,
    supervisor: Supervisor,
    /// Enforces "one command in flight per session" at the application
    /// level, independent of whatever the underlying shell would
    /// otherwise allow.
    lock: Arc<Semaphore>,
}

impl Session {
    /// Creates a new session, spawning its control supervisor. Falls back
    /// to non-isolated execution when PID-namespace isolation was
    /// requested but unavailable on this host — same supervisor, same
    /// public contract, just without the `unshare` prefix.
    pub async fn create(
        id: String,
        cwd: String,
        isolation_requested: bool,
        temp_dir: &std::path::Path,
        env_overlay: HashMap<String, String>,
    ) -> Result<Self, SessionError> {
        let isolation_effective = isolation_requested && crate::isolation::isolation_available().await;

        let supervisor = Supervisor::spawn(&id, &cwd, isolation_effective, temp_dir, &env_overlay).await?;

        let now = Utc::now();
        Ok(Self {
            id,
            cwd: Arc::new(RwLock::new(cwd)),
            isolation_effective,
            env_overlay,
            created_at: now,
            last_active_at_epoch_ms: AtomicI64::new(now.timestamp_millis()),
            supervisor,
            lock: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The environment overlay this session's shell was started with,
    /// used as the base environment for its background processes.
    pub fn env_overlay(&self) -> &HashMap<String, String> {
        &self.env_overlay
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            cwd: self.cwd.read().clone(),
            isolation_effective: self.isolation_effective,
            created_at: self.created_at,
            last_active_at: DateTime::from_timestamp_millis(self.last_active_at_epoch_ms.load(Ordering::Relaxed))
                .unwrap_or(self.created_at),
        }
    }

    fn touch(&self) {
        self.last_active_at_epoch_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Runs `command` to completion, queuing behind any `exec`/`execStream`
    /// already in flight on this session rather than rejecting the call —
    /// callers that submit S1 then S2 see them applied in that order. `cwd`
    /// is a one-shot override for this call only, applied via a subshell so
    /// the session's persistent working directory never changes as a side
    /// effect of the override itself.
    pub async fn exec(
        &self,
        command: String,
        cwd: Option<String>,
        timeout_ms: u64,
        kill_on_timeout: bool,
    ) -> Result<ExecResult, SessionError> {
        if let Some(dir) = &cwd {
            if !dir.starts_with('/') {
                return Err(SessionError::CwdNotAbsolute(dir.clone()));
            }
        }

        let _permit = self.lock.clone().acquire_owned().await.map_err(|_| SessionError::Busy)?;

        self.touch();
        let id = Uuid::new_v4().to_string();
        let (stdout, stderr, exit_code, new_cwd) = self
            .supervisor
            .exec(id, command, cwd, timeout_ms, kill_on_timeout)
            .await?;
        *self.cwd.write() = new_cwd;

        Ok(ExecResult { stdout, stderr, exit_code })
    }

    /// Starts a streamed `execStream`, holding the session's exclusive
    /// lock until the stream reaches a terminal event.
    pub async fn exec_stream(
        &self,
        command: String,
        cwd: Option<String>,
        timeout_ms: u64,
        kill_on_timeout: bool,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, SessionError> {
        if let Some(dir) = &cwd {
            if !dir.starts_with('/') {
                return Err(SessionError::CwdNotAbsolute(dir.clone()));
            }
        }

        let permit = self.lock.clone().acquire_owned().await.map_err(|_| SessionError::Busy)?;
        self.touch();

        let id = Uuid::new_v4().to_string();
        let mut inner_rx = self
            .supervisor
            .exec_stream(id, command, cwd, timeout_ms, kill_on_timeout)
            .await?;

        // Re-forward through a channel owned by this call so the lock guard
        // can be held for the stream's lifetime without borrowing `self`.
        let (tx, rx) = mpsc::unbounded_channel();
        let session_cwd = self.cwd.clone();
        tokio::spawn(async move {
            let _permit = permit;
            while let Some(event) = inner_rx.recv().await {
                if let StreamEvent::Complete { cwd, .. } = &event {
                    *session_cwd.write() = cwd.clone();
                }
                let terminal = event.is_terminal();
                if tx.send(event).is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Gracefully tears down the supervisor, ahead of the manager's own
    /// grace period before the process is force-killed.
    pub async fn shutdown(&self) {
        if let Err(e) = self.supervisor.shutdown().await {
            tracing::warn!(session_id = %self.id, "error shutting down supervisor: {}", e);
        }
    }
}

/// Convenience alias used by session-aware services that need to share a
/// session across an `Arc`.
pub type SharedSession = Arc<Session>;
