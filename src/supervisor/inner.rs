//! Child-side supervisor loop: what actually runs after `main` re-execs this
//! binary with `__supervisor` as argv[1].
//!
//! Owns exactly one `bash --norc` (optionally `unshare --pid --fork
//! --mount-proc`-prefixed). Every command is written to `cmd_<id>.sh` and
//! `source`d directly on that shell's own stdin — no enclosing subshell, no
//! backgrounding — so `cd`/`export`/function definitions a command makes
//! persist in the shell exactly as they would at an interactive prompt:
//!
//! ```text
//! source "cmd_<id>.sh" > "out_<id>" 2> "err_<id>"; echo $? > "exit_<id>"; echo DONE:<id>
//! ```
//!
//! `bash`'s own stdout never carries user output — only the `DONE:`/
//! `STREAM_DONE:` marker line, read by a single long-lived watcher task.
//! Real stdout/stderr lives in the `out_<id>`/`err_<id>` files. Because the
//! shell runs a command to completion before reading its next line of
//! input, a `kill_on_timeout` request can't rely on a job pid handed back
//! over that same stdin — the shell is busy and isn't reading. Instead the
//! supervisor keeps the shell's own OS pid (known from the moment it's
//! spawned) and, on timeout, signals that process's direct children
//! directly, rather than the shell itself.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use dashmap::DashMap;

use super::protocol::{Request, Response, StreamEvent, TempFileSet};
use super::{tempfiles, ENV_CWD, ENV_ENV_OVERLAY_JSON, ENV_ISOLATION, ENV_SESSION_ID, ENV_TEMP_DIR, STREAM_POLL_INTERVAL_MS};

/// Entry point called by `main` once it detects `__supervisor` in argv.
/// Never returns under normal operation — the process exits from inside
/// either the `Exit` request handler or the bash-crash handler.
pub async fn run() -> ! {
    let session_id = std::env::var(ENV_SESSION_ID).unwrap_or_else(|_| "unknown".to_string());
    let cwd = std::env::var(ENV_CWD).unwrap_or_else(|_| "/".to_string());
    let isolation = std::env::var(ENV_ISOLATION).map(|v| v == "1").unwrap_or(false);
    let temp_dir = std::env::var(ENV_TEMP_DIR).unwrap_or_else(|_| "/tmp".to_string());
    let env_overlay: HashMap<String, String> = std::env::var(ENV_ENV_OVERLAY_JSON)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    info!(session_id = %session_id, isolation, "control supervisor starting");

    let mut child = match spawn_shell(&cwd, isolation, &env_overlay) {
        Ok(child) => child,
        Err(e) => {
            error!("failed to spawn shell: {}", e);
            emit(&Response::Error {
                id: "init".into(),
                error: format!("failed to spawn shell: {e}"),
            })
            .await;
            std::process::exit(1);
        }
    };

    let shell_pid = child.id();

    let bash_stdin = child.stdin.take().expect("piped stdin");
    let bash_stdout = child.stdout.take().expect("piped stdout");

    let pending: Arc<DashMap<String, oneshot::Sender<String>>> = Arc::new(DashMap::new());
    let bash_stdin = Arc::new(Mutex::new(bash_stdin));

    let watcher_pending = pending.clone();
    let watcher = tokio::spawn(async move {
        let mut lines = BufReader::new(bash_stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => handle_marker_line(&line, &watcher_pending),
                Ok(None) => break,
                Err(e) => {
                    warn!("error reading shell marker stream: {}", e);
                    break;
                }
            }
        }
    });

    emit(&Response::Ready { id: "init".into() }).await;

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            biased;

            status = child.wait() => {
                let code = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
                error!("shell exited unexpectedly with code {}", code);
                fail_all_pending(&pending, "shell process exited unexpectedly").await;
                watcher.abort();
                std::process::exit(code);
            }

            line = stdin_lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("parent closed stdin; shutting down");
                        let _ = child.start_kill();
                        std::process::exit(0);
                    }
                    Err(e) => {
                        error!("error reading request stdin: {}", e);
                        std::process::exit(1);
                    }
                };

                let request: Request = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("ignoring malformed request: {}", e);
                        continue;
                    }
                };

                match request {
                    Request::Exit => {
                        let _ = bash_stdin.lock().await.shutdown().await;
                        let _ = child.start_kill();
                        watcher.abort();
                        std::process::exit(0);
                    }
                    Request::Exec { id, command, cwd, timeout_ms, kill_on_timeout } => {
                        tokio::spawn(handle_exec(
                            id, command, cwd, timeout_ms, kill_on_timeout,
                            temp_dir.clone(), bash_stdin.clone(), pending.clone(), shell_pid,
                        ));
                    }
                    Request::ExecStream { id, command, cwd, timeout_ms, kill_on_timeout } => {
                        tokio::spawn(handle_exec_stream(
                            id, command, cwd, timeout_ms, kill_on_timeout,
                            temp_dir.clone(), bash_stdin.clone(), pending.clone(), shell_pid,
                        ));
                    }
                }
            }
        }
    }
}

fn spawn_shell(cwd: &str, isolation: bool, env_overlay: &HashMap<String, String>) -> std::io::Result<Child> {
    let mut cmd = if isolation {
        let mut c = Command::new("unshare");
        c.args(["--pid", "--fork", "--mount-proc", "bash", "--norc"]);
        c
    } else {
        let mut c = Command::new("bash");
        c.arg("--norc");
        c
    };

    cmd.current_dir(cwd);
    cmd.envs(env_overlay);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(true);

    cmd.spawn()
}

/// Parses `DONE:<id>:<cwd>` / `STREAM_DONE:<id>:<cwd>` marker lines written
/// to bash's own stdout and routes them, `cwd` being the shell's working
/// directory right after the command finished.
fn handle_marker_line(line: &str, pending: &DashMap<String, oneshot::Sender<String>>) {
    let rest = line
        .strip_prefix("DONE:")
        .or_else(|| line.strip_prefix("STREAM_DONE:"));

    if let Some(rest) = rest {
        if let Some((id, cwd)) = rest.split_once(':') {
            if let Some((_, tx)) = pending.remove(id) {
                let _ = tx.send(cwd.to_string());
            }
        }
    }
}

async fn fail_all_pending(pending: &DashMap<String, oneshot::Sender<String>>, reason: &str) {
    let ids: Vec<String> = pending.iter().map(|e| e.key().clone()).collect();
    pending.clear();
    for id in ids {
        emit(&Response::Error { id, error: reason.to_string() }).await;
    }
}

/// Writes `cmd_<id>.sh`, wrapping in a one-shot `cd` subshell when a
/// per-call `cwd` override is given. A subshell avoids needing
/// `return`-outside-function handling and never leaks into the
/// persistent session's working directory.
async fn stage_command(
    temp_dir: &str,
    id: &str,
    command: &str,
    cwd: Option<&str>,
) -> std::io::Result<(TempFileSet, [std::path::PathBuf; 4])> {
    let (files, paths) = TempFileSet::new(std::path::Path::new(temp_dir), id);

    let body = match cwd {
        Some(dir) => format!("( cd {} && {} )", shell_quote(dir), command),
        None => command.to_string(),
    };
    tokio::fs::write(&paths[0], format!("{body}\n")).await?;

    Ok((files, paths))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Builds the line fed to the persistent shell's stdin. Runs in the
/// foreground, directly on that shell — no `(...)` subshell and no `&` — so
/// any `cd`, `export`, or function definition the command makes is still in
/// effect for the next command in this session. The marker line carries the
/// shell's `$PWD` after the command ran, so the parent can track `cd`s.
fn build_invocation(files: &TempFileSet, id: &str, stream: bool) -> String {
    let marker = if stream { "STREAM_DONE" } else { "DONE" };
    format!(
        "source {cmd} > {out} 2> {err}; echo $? > {exit}; printf '{marker}:{id}:%s\\n' \"$PWD\"\n",
        cmd = shell_quote(&files.cmd),
        out = shell_quote(&files.out),
        err = shell_quote(&files.err),
        exit = shell_quote(&files.exit),
    )
}

async fn handle_exec(
    id: String,
    command: String,
    cwd: Option<String>,
    timeout_ms: u64,
    kill_on_timeout: bool,
    temp_dir: String,
    bash_stdin: Arc<Mutex<tokio::process::ChildStdin>>,
    pending: Arc<DashMap<String, oneshot::Sender<String>>>,
    shell_pid: Option<u32>,
) {
    let (files, paths) = match stage_command(&temp_dir, &id, &command, cwd.as_deref()).await {
        Ok(v) => v,
        Err(e) => {
            emit(&Response::Error { id, error: format!("failed to stage command: {e}") }).await;
            return;
        }
    };

    let (tx, rx) = oneshot::channel();
    pending.insert(id.clone(), tx);

    let invocation = build_invocation(&files, &id, false);
    if let Err(e) = bash_stdin.lock().await.write_all(invocation.as_bytes()).await {
        pending.remove(&id);
        emit(&Response::Error { id, error: format!("failed to write to shell: {e}") }).await;
        return;
    }

    tokio::select! {
        marker = rx => {
            let Ok(cwd) = marker else {
                // Sender was dropped without firing: the shell died mid-command.
                // The crash handler on the main select! loop emits process-wide
                // errors and exits; nothing more to do here.
                return;
            };
            let exit_code = read_exit_code(&paths[3]).await;
            let stdout = tokio::fs::read(&paths[1]).await.unwrap_or_default();
            let stderr = tokio::fs::read(&paths[2]).await.unwrap_or_default();
            tempfiles::cleanup_command_files(std::path::Path::new(&temp_dir), &id).await;
            emit(&Response::Result { id, stdout, stderr, exit_code, cwd }).await;
        }
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
            pending.remove(&id);
            if kill_on_timeout {
                kill_job(shell_pid).await;
            }
            tempfiles::cleanup_command_files(std::path::Path::new(&temp_dir), &id).await;
            emit(&Response::Error { id, error: format!("command timed out after {timeout_ms}ms") }).await;
        }
    }
}

async fn handle_exec_stream(
    id: String,
    command: String,
    cwd: Option<String>,
    timeout_ms: u64,
    kill_on_timeout: bool,
    temp_dir: String,
    bash_stdin: Arc<Mutex<tokio::process::ChildStdin>>,
    pending: Arc<DashMap<String, oneshot::Sender<String>>>,
    shell_pid: Option<u32>,
) {
    let (files, paths) = match stage_command(&temp_dir, &id, &command, cwd.as_deref()).await {
        Ok(v) => v,
        Err(e) => {
            emit_stream(&id, StreamEvent::Error { message: format!("failed to stage command: {e}"), timestamp: chrono::Utc::now() }).await;
            return;
        }
    };

    let (tx, rx) = oneshot::channel();
    pending.insert(id.clone(), tx);

    emit_stream(&id, StreamEvent::Start { command: command.clone(), timestamp: chrono::Utc::now() }).await;

    let invocation = build_invocation(&files, &id, true);
    if let Err(e) = bash_stdin.lock().await.write_all(invocation.as_bytes()).await {
        pending.remove(&id);
        emit_stream(&id, StreamEvent::Error { message: format!("failed to write to shell: {e}"), timestamp: chrono::Utc::now() }).await;
        return;
    }

    tokio::pin! {
        let done = rx;
    }
    let mut out_pos: u64 = 0;
    let mut err_pos: u64 = 0;
    let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_millis(STREAM_POLL_INTERVAL_MS));

    enum Outcome { Completed(String), TimedOut, Crashed }

    let outcome = loop {
        tokio::select! {
            marker = &mut done => break match marker {
                Ok(cwd) => Outcome::Completed(cwd),
                Err(_) => Outcome::Crashed,
            },
            _ = &mut deadline => break Outcome::TimedOut,
            _ = ticker.tick() => {
                poll_and_emit(&id, &paths[1], &mut out_pos, true).await;
                poll_and_emit(&id, &paths[2], &mut err_pos, false).await;
            }
        }
    };

    if matches!(outcome, Outcome::Crashed) {
        // The process-wide crash handler already reported this id.
        return;
    }

    poll_and_emit(&id, &paths[1], &mut out_pos, true).await;
    poll_and_emit(&id, &paths[2], &mut err_pos, false).await;

    if matches!(outcome, Outcome::TimedOut) {
        pending.remove(&id);
        if kill_on_timeout {
            kill_job(shell_pid).await;
        }
        tempfiles::cleanup_command_files(std::path::Path::new(&temp_dir), &id).await;
        emit_stream(&id, StreamEvent::Error { message: format!("command timed out after {timeout_ms}ms"), timestamp: chrono::Utc::now() }).await;
        return;
    }

    let Outcome::Completed(cwd) = outcome else { unreachable!() };
    let exit_code = read_exit_code(&paths[3]).await;
    tempfiles::cleanup_command_files(std::path::Path::new(&temp_dir), &id).await;
    emit_stream(&id, StreamEvent::Complete { exit_code, success: exit_code == 0, timestamp: chrono::Utc::now(), cwd }).await;
}

async fn poll_and_emit(id: &str, path: &std::path::Path, pos: &mut u64, is_stdout: bool) {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let Ok(mut file) = tokio::fs::File::open(path).await else { return };
    if file.seek(std::io::SeekFrom::Start(*pos)).await.is_err() {
        return;
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).await.is_err() || buf.is_empty() {
        return;
    }
    *pos += buf.len() as u64;

    let event = if is_stdout {
        StreamEvent::Stdout { data: buf, timestamp: chrono::Utc::now() }
    } else {
        StreamEvent::Stderr { data: buf, timestamp: chrono::Utc::now() }
    };
    emit_stream(id, event).await;
}

/// Signals whatever the persistent shell is currently running. The shell is
/// busy executing the timed-out command synchronously and isn't reading its
/// stdin, so there's no way to ask it to do the killing; instead this signals
/// the shell's direct child processes directly, leaving the shell itself
/// alive for the next command.
async fn kill_job(shell_pid: Option<u32>) {
    let Some(shell_pid) = shell_pid else { return };
    for child_pid in direct_children(shell_pid) {
        if let Err(e) = nix::sys::signal::kill(nix::unistd::Pid::from_raw(child_pid as i32), nix::sys::signal::Signal::SIGTERM) {
            debug!("kill_job: SIGTERM to {}: {}", child_pid, e);
        }
    }
}

/// Reads the immediate child pids of `pid` from procfs. Best-effort: an
/// unreadable or missing children file (process already exited, or the
/// kernel lacks `CONFIG_PROC_CHILDREN`) just yields nothing to signal.
fn direct_children(pid: u32) -> Vec<u32> {
    let path = format!("/proc/{pid}/task/{pid}/children");
    std::fs::read_to_string(path)
        .map(|contents| contents.split_whitespace().filter_map(|p| p.parse().ok()).collect())
        .unwrap_or_default()
}

async fn read_exit_code(path: &std::path::Path) -> i32 {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(-1)
}

async fn emit(response: &Response) {
    let line = serde_json::to_string(response).unwrap_or_else(|_| "{}".to_string());
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.write_all(b"\n").await;
    let _ = stdout.flush().await;
}

async fn emit_stream(id: &str, event: StreamEvent) {
    emit(&Response::StreamEvent { id: id.to_string(), event }).await;
}
