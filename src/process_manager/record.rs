//! Background process records and the manager that owns them.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOG_BUFFER_LINES: usize = 2000;
const KILL_GRACE: Duration = Duration::from_millis(3000);
/// Applied before a background job's own environment so a cleared
/// environment can still resolve external binaries; an explicit `PATH` in
/// the job's env overrides it.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Error)]
pub enum ProcessManagerError {
    #[error("process not found: {0}")]
    NotFound(String),

    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),

    #[error("process is not running")]
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Exited,
    Killed,
    Failed,
}

/// One line of output or a lifecycle transition, fanned out to every SSE
/// subscriber of a process via `process/{id}/stream`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProcessEvent {
    Stdout { line: String, timestamp: DateTime<Utc> },
    Stderr { line: String, timestamp: DateTime<Utc> },
    Exit { code: i32, status: ProcessStatus, timestamp: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub command: String,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
}

struct ProcessRecord {
    id: String,
    session_id: String,
    name: String,
    command: String,
    pid: RwLock<Option<u32>>,
    status: RwLock<ProcessStatus>,
    exit_code: AtomicI32,
    has_exit_code: std::sync::atomic::AtomicBool,
    started_at: DateTime<Utc>,
    log_buffer: Mutex<VecDeque<String>>,
    events: broadcast::Sender<ProcessEvent>,
}

impl ProcessRecord {
    fn push_log(&self, line: String) {
        let mut buffer = self.log_buffer.lock();
        if buffer.len() >= LOG_BUFFER_LINES {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            name: self.name.clone(),
            command: self.command.clone(),
            pid: *self.pid.read(),
            status: *self.status.read(),
            exit_code: self.has_exit_code.load(Ordering::Relaxed).then(|| self.exit_code.load(Ordering::Relaxed)),
            started_at: self.started_at,
        }
    }
}

/// Owns every background process across every session.
pub struct ProcessManager {
    processes: DashMap<String, Arc<ProcessRecord>>,
    by_session: DashMap<String, Vec<String>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
            by_session: DashMap::new(),
        }
    }

    /// Starts a named background process under `session_id`, running in
    /// `cwd` with exactly `env` as its environment — not the broker's own —
    /// and, when `isolation` is set, in its own PID namespace like the
    /// session's shell. Spawns independently of the session's own shell so
    /// it runs truly in parallel.
    pub async fn start(
        &self,
        session_id: String,
        name: String,
        command: String,
        cwd: String,
        env: HashMap<String, String>,
        isolation: bool,
    ) -> Result<ProcessInfo, ProcessManagerError> {
        let id = Uuid::new_v4().to_string();

        let mut cmd = if isolation {
            let mut c = Command::new("unshare");
            c.args(["--pid", "--fork", "--mount-proc", "bash"]);
            c.arg("-c").arg(&command);
            c
        } else {
            let mut c = Command::new("bash");
            c.arg("-c").arg(&command);
            c
        };
        cmd.current_dir(&cwd);
        cmd.env_clear();
        cmd.env("PATH", DEFAULT_PATH);
        cmd.envs(&env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(false);

        let mut child = cmd.spawn().map_err(ProcessManagerError::Spawn)?;
        let pid = child.id();
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (events_tx, _events_rx) = broadcast::channel(1024);

        let record = Arc::new(ProcessRecord {
            id: id.clone(),
            session_id: session_id.clone(),
            name,
            command: command.clone(),
            pid: RwLock::new(pid),
            status: RwLock::new(ProcessStatus::Running),
            exit_code: AtomicI32::new(0),
            has_exit_code: std::sync::atomic::AtomicBool::new(false),
            started_at: Utc::now(),
            log_buffer: Mutex::new(VecDeque::with_capacity(LOG_BUFFER_LINES)),
            events: events_tx,
        });

        self.processes.insert(id.clone(), record.clone());
        self.by_session.entry(session_id).or_default().push(id.clone());

        tokio::spawn(monitor(record, child, stdout, stderr));

        Ok(self.processes.get(&id).unwrap().info())
    }

    pub fn get(&self, id: &str) -> Result<ProcessInfo, ProcessManagerError> {
        self.processes
            .get(id)
            .map(|p| p.info())
            .ok_or_else(|| ProcessManagerError::NotFound(id.to_string()))
    }

    pub fn list(&self, session_id: Option<&str>) -> Vec<ProcessInfo> {
        self.processes
            .iter()
            .map(|e| e.value().info())
            .filter(|p| session_id.map(|s| s == p.session_id).unwrap_or(true))
            .collect()
    }

    pub fn logs(&self, id: &str, tail: Option<usize>) -> Result<Vec<String>, ProcessManagerError> {
        let record = self
            .processes
            .get(id)
            .ok_or_else(|| ProcessManagerError::NotFound(id.to_string()))?;
        let buffer = record.log_buffer.lock();
        let lines: Vec<String> = buffer.iter().cloned().collect();
        match tail {
            Some(n) if n < lines.len() => Ok(lines[lines.len() - n..].to_vec()),
            _ => Ok(lines),
        }
    }

    pub fn subscribe(&self, id: &str) -> Result<broadcast::Receiver<ProcessEvent>, ProcessManagerError> {
        self.processes
            .get(id)
            .map(|p| p.events.subscribe())
            .ok_or_else(|| ProcessManagerError::NotFound(id.to_string()))
    }

    /// SIGTERM, then SIGKILL after a grace period if the process hasn't
    /// exited.
    pub async fn kill(&self, id: &str) -> Result<(), ProcessManagerError> {
        let record = self
            .processes
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ProcessManagerError::NotFound(id.to_string()))?;

        let pid = (*record.pid.read()).ok_or(ProcessManagerError::NotRunning)?;
        send_signal(pid, nix::sys::signal::Signal::SIGTERM);

        tokio::time::sleep(KILL_GRACE).await;

        if *record.status.read() == ProcessStatus::Running {
            send_signal(pid, nix::sys::signal::Signal::SIGKILL);
        }

        Ok(())
    }

    pub async fn kill_all(&self, session_id: Option<&str>) {
        let ids: Vec<String> = self.list(session_id).into_iter().map(|p| p.id).collect();
        for id in ids {
            if let Err(e) = self.kill(&id).await {
                debug!("kill_all: {} already gone: {}", id, e);
            }
        }
    }

    /// Kills every process belonging to a session, used when the session
    /// itself is destroyed so no orphaned background jobs survive it.
    pub async fn kill_session_processes(&self, session_id: &str) {
        self.kill_all(Some(session_id)).await;
        if let Some((_, ids)) = self.by_session.remove(session_id) {
            for id in ids {
                self.processes.remove(&id);
            }
        }
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::kill(pid, signal) {
        debug!("signal {:?} to pid {}: {}", signal, pid, e);
    }
}

async fn monitor(
    record: Arc<ProcessRecord>,
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
) {
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;

    loop {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => {
                match line {
                    Ok(Some(line)) => {
                        record.push_log(line.clone());
                        let _ = record.events.send(ProcessEvent::Stdout { line, timestamp: Utc::now() });
                    }
                    _ => out_done = true,
                }
            }
            line = err_lines.next_line(), if !err_done => {
                match line {
                    Ok(Some(line)) => {
                        record.push_log(line.clone());
                        let _ = record.events.send(ProcessEvent::Stderr { line, timestamp: Utc::now() });
                    }
                    _ => err_done = true,
                }
            }
            else => break,
        }
    }

    let status = child.wait().await;
    let (code, final_status) = match status {
        Ok(status) => {
            use std::os::unix::process::ExitStatusExt;
            let code = status.code().unwrap_or(-1);
            let final_status = if status.signal().is_some() {
                ProcessStatus::Killed
            } else if status.success() {
                ProcessStatus::Exited
            } else {
                ProcessStatus::Failed
            };
            (code, final_status)
        }
        Err(e) => {
            warn!("error waiting on process {}: {}", record.id, e);
            (-1, ProcessStatus::Failed)
        }
    };

    record.exit_code.store(code, Ordering::Relaxed);
    record.has_exit_code.store(true, Ordering::Relaxed);
    *record.status.write() = final_status;
    *record.pid.write() = None;

    info!(process_id = %record.id, code, "process exited");
    let _ = record.events.send(ProcessEvent::Exit { code, status: final_status, timestamp: Utc::now() });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_collect_output() {
        let manager = ProcessManager::new();
        let info = manager
            .start(
                "s1".into(),
                "echoer".into(),
                "echo hello; echo world >&2".into(),
                "/tmp".into(),
                HashMap::new(),
                false,
            )
            .await
            .unwrap();

        // Allow the monitor task to observe exit.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let fetched = manager.get(&info.id).unwrap();
        assert_eq!(fetched.status, ProcessStatus::Exited);

        let logs = manager.logs(&info.id, None).unwrap();
        assert!(logs.iter().any(|l| l.contains("hello")));
        assert!(logs.iter().any(|l| l.contains("world")));
    }

    #[tokio::test]
    async fn list_filters_by_session() {
        let manager = ProcessManager::new();
        manager.start("a".into(), "n".into(), "sleep 0.1".into(), "/tmp".into(), HashMap::new(), false).await.unwrap();
        manager.start("b".into(), "n".into(), "sleep 0.1".into(), "/tmp".into(), HashMap::new(), false).await.unwrap();

        assert_eq!(manager.list(Some("a")).len(), 1);
        assert_eq!(manager.list(None).len(), 2);
    }

    #[tokio::test]
    async fn not_found_errors() {
        let manager = ProcessManager::new();
        assert!(manager.get("missing").is_err());
        assert!(manager.kill("missing").await.is_err());
    }
}
