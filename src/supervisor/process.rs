//! Parent-side handle to the control supervisor child process (component
//! B, parent half). Spawns the re-exec'd child, serializes requests onto
//! its stdin, and routes responses back to whoever is waiting on a given
//! command id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use super::protocol::{Request, Response, StreamEvent};
use super::{ENV_CWD, ENV_ENV_OVERLAY_JSON, ENV_ISOLATION, ENV_SESSION_ID, ENV_TEMP_DIR, SUPERVISOR_MODE_ARG};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn control supervisor: {0}")]
    Spawn(std::io::Error),

    #[error("control supervisor did not become ready")]
    NotReady,

    #[error("control supervisor process exited")]
    Exited,

    #[error("command {0} timed out")]
    Timeout(String),

    #[error("control supervisor reported an error: {0}")]
    Remote(String),

    #[error("io error talking to control supervisor: {0}")]
    Io(#[from] std::io::Error),
}

/// A single outstanding `exec` awaiting its `Response::Result`/`Error`.
enum Waiter {
    Single(oneshot::Sender<Result<(Vec<u8>, Vec<u8>, i32, String), String>>),
    Stream(mpsc::UnboundedSender<StreamEvent>),
}

/// Parent handle for one session's control supervisor child process.
pub struct Supervisor {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    waiters: Arc<DashMap<String, Waiter>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Supervisor {
    /// Spawns the supervisor child for a session, blocking until it reports
    /// `Ready` or the ready timeout elapses.
    pub async fn spawn(
        session_id: &str,
        cwd: &str,
        isolation: bool,
        temp_dir: &Path,
        env_overlay: &HashMap<String, String>,
    ) -> Result<Self, SupervisorError> {
        let current_exe = std::env::current_exe().map_err(SupervisorError::Spawn)?;

        let mut cmd = Command::new(current_exe);
        cmd.arg(SUPERVISOR_MODE_ARG);
        cmd.env(ENV_SESSION_ID, session_id);
        cmd.env(ENV_CWD, cwd);
        cmd.env(ENV_ISOLATION, if isolation { "1" } else { "0" });
        cmd.env(ENV_TEMP_DIR, temp_dir.to_string_lossy().as_ref());
        cmd.env(
            ENV_ENV_OVERLAY_JSON,
            serde_json::to_string(env_overlay).unwrap_or_else(|_| "{}".to_string()),
        );
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let waiters: Arc<DashMap<String, Waiter>> = Arc::new(DashMap::new());
        let (ready_tx, ready_rx) = oneshot::channel();

        let reader_waiters = waiters.clone();
        let reader_task = tokio::spawn(async move {
            read_responses(stdout, reader_waiters, ready_tx).await;
        });

        match tokio::time::timeout(std::time::Duration::from_secs(5), ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                reader_task.abort();
                return Err(SupervisorError::Exited);
            }
            Err(_) => {
                reader_task.abort();
                return Err(SupervisorError::NotReady);
            }
        }

        debug!(session_id, "control supervisor ready");

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            waiters,
            reader_task,
        })
    }

    /// Runs a command to completion, waiting for its single terminal
    /// response. The fourth element is the shell's working directory after
    /// the command ran.
    pub async fn exec(
        &self,
        id: String,
        command: String,
        cwd: Option<String>,
        timeout_ms: u64,
        kill_on_timeout: bool,
    ) -> Result<(Vec<u8>, Vec<u8>, i32, String), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.clone(), Waiter::Single(tx));

        let request = Request::Exec { id: id.clone(), command, cwd, timeout_ms, kill_on_timeout };
        self.send(&request).await?;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(SupervisorError::Remote(message)),
            Err(_) => Err(SupervisorError::Exited),
        }
    }

    /// Starts a streamed command, returning a channel of `StreamEvent`s
    /// terminated by `Complete`/`Error`.
    pub async fn exec_stream(
        &self,
        id: String,
        command: String,
        cwd: Option<String>,
        timeout_ms: u64,
        kill_on_timeout: bool,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, SupervisorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiters.insert(id.clone(), Waiter::Stream(tx));

        let request = Request::ExecStream { id, command, cwd, timeout_ms, kill_on_timeout };
        self.send(&request).await?;

        Ok(rx)
    }

    /// Requests a clean shutdown of the supervisor child; callers should
    /// race this with a grace-period timeout (see `SessionManager::destroy_session`).
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let _ = self.send(&Request::Exit).await;
        self.reader_task.abort();
        let mut child = self.child.lock().await;
        let _ = tokio::time::timeout(std::time::Duration::from_millis(500), child.wait()).await;
        let _ = child.start_kill();
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<(), SupervisorError> {
        let mut line = serde_json::to_string(request).map_err(|e| SupervisorError::Remote(e.to_string()))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

async fn read_responses(
    stdout: tokio::process::ChildStdout,
    waiters: Arc<DashMap<String, Waiter>>,
    ready_tx: oneshot::Sender<()>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut ready_tx = Some(ready_tx);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("error reading control supervisor stdout: {}", e);
                break;
            }
        };

        let response: Response = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("ignoring malformed supervisor response: {}", e);
                continue;
            }
        };

        match response {
            Response::Ready { .. } => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }
            Response::Result { id, stdout, stderr, exit_code, cwd } => {
                if let Some((_, Waiter::Single(tx))) = waiters.remove(&id) {
                    let _ = tx.send(Ok((stdout, stderr, exit_code, cwd)));
                }
            }
            Response::Error { id, error } => {
                match waiters.remove(&id) {
                    Some((_, Waiter::Single(tx))) => {
                        let _ = tx.send(Err(error));
                    }
                    Some((_, Waiter::Stream(tx))) => {
                        let _ = tx.send(StreamEvent::Error { message: error, timestamp: chrono::Utc::now() });
                    }
                    None => {}
                }
            }
            Response::StreamEvent { id, event } => {
                let terminal = event.is_terminal();
                if let Some(entry) = waiters.get(&id) {
                    if let Waiter::Stream(tx) = entry.value() {
                        let _ = tx.send(event);
                    }
                }
                if terminal {
                    waiters.remove(&id);
                }
            }
        }
    }

    // Reader loop ended: the supervisor's stdout closed, meaning the child
    // exited. Fail every still-outstanding waiter so callers don't hang.
    for entry in waiters.iter() {
        match entry.value() {
            Waiter::Stream(tx) => {
                let _ = tx.send(StreamEvent::Error {
                    message: "control supervisor exited".to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
            Waiter::Single(_) => {}
        }
    }
    waiters.clear();
    error!("control supervisor stdout closed");
}

#[cfg(test)]
mod tests {
    // Spawning the real supervisor child requires the compiled binary
    // itself (`current_exe`), so its happy-path behavior is covered by
    // `session`'s integration-style tests rather than here.
}
