//! Wire protocol between a Session and its control supervisor child
//! process. Frames are newline-delimited JSON — one object per
//! line — so a line can never straddle a partial read of binary command
//! output: binary bytes never touch this channel directly, only references
//! to the on-disk `out_<id>`/`err_<id>` files the supervisor already read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request the parent (Session) sends to the supervisor's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Exec {
        id: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        timeout_ms: u64,
        /// Whether a timed-out command is left running in the background
        /// (`false`, the default) or actively killed (`true`). Callers opt
        /// in per request via the exec body's `killOnTimeout` field.
        kill_on_timeout: bool,
    },
    ExecStream {
        id: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        timeout_ms: u64,
        kill_on_timeout: bool,
    },
    Exit,
}

/// A response the supervisor emits on its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Sent once at startup, with id "init".
    Ready { id: String },
    Result {
        id: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: i32,
        /// The shell's working directory after the command ran, so the
        /// parent `Session` can track `cd`s made through `exec`.
        cwd: String,
    },
    Error { id: String, error: String },
    StreamEvent { id: String, event: StreamEvent },
}

/// One frame of a command's output on the SSE channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        command: String,
        timestamp: DateTime<Utc>,
    },
    Stdout {
        data: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
    Stderr {
        data: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
    Complete {
        exit_code: i32,
        success: bool,
        timestamp: DateTime<Utc>,
        cwd: String,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// Temp-file set naming for one pending command id.
pub struct TempFileSet {
    pub cmd: String,
    pub out: String,
    pub err: String,
    pub exit: String,
}

impl TempFileSet {
    pub fn new(temp_dir: &std::path::Path, id: &str) -> (Self, [std::path::PathBuf; 4]) {
        let cmd = temp_dir.join(format!("cmd_{id}.sh"));
        let out = temp_dir.join(format!("out_{id}"));
        let err = temp_dir.join(format!("err_{id}"));
        let exit = temp_dir.join(format!("exit_{id}"));
        let paths = [cmd.clone(), out.clone(), err.clone(), exit.clone()];
        (
            Self {
                cmd: cmd.to_string_lossy().into_owned(),
                out: out.to_string_lossy().into_owned(),
                err: err.to_string_lossy().into_owned(),
                exit: exit.to_string_lossy().into_owned(),
            },
            paths,
        )
    }
}

/// Parses the `{cmd,out,err,exit}_<id>` naming scheme back out of a file
/// name, used by the sweeper to decide whether an id is still active.
pub fn id_from_temp_file_name(name: &str) -> Option<String> {
    for prefix in ["cmd_", "out_", "err_", "exit_"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            let id = rest.strip_suffix(".sh").unwrap_or(rest);
            return Some(id.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_each_temp_file_kind() {
        assert_eq!(id_from_temp_file_name("cmd_abc.sh").as_deref(), Some("abc"));
        assert_eq!(id_from_temp_file_name("out_abc").as_deref(), Some("abc"));
        assert_eq!(id_from_temp_file_name("err_abc").as_deref(), Some("abc"));
        assert_eq!(id_from_temp_file_name("exit_abc").as_deref(), Some("abc"));
        assert_eq!(id_from_temp_file_name("unrelated.txt"), None);
    }

    #[test]
    fn request_roundtrips_through_json() {
        let req = Request::Exec {
            id: "1".into(),
            command: "echo hi".into(),
            cwd: Some("/tmp".into()),
            timeout_ms: 30_000,
            kill_on_timeout: false,
        };
        let line = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&line).unwrap();
        match back {
            Request::Exec { id, command, cwd, .. } => {
                assert_eq!(id, "1");
                assert_eq!(command, "echo hi");
                assert_eq!(cwd.as_deref(), Some("/tmp"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
