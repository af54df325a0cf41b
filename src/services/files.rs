//! File operations: `mkdir`, `write`, `read`, `delete`, `rename`, `move`,
//! `list-files`.
//!
//! These are thin shell-command builders that run through a session's
//! `exec`, exactly like git — not direct filesystem calls — so a write
//! made through one route and a read made through another always see the
//! same view the session's own shell would, and so every op inherits the
//! session's cwd/env for relative-path resolution.

use serde::Serialize;

use crate::error::{BrokerError, Result};
use crate::security;
use crate::session::{ExecResult, Session};

const FILE_OP_TIMEOUT_MS: u64 = 30_000;
const HEREDOC_TAG: &str = "SANDBOX_EOF";

#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub absolute_path: String,
    pub relative_path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_string: String,
    pub mode: String,
    pub permissions: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

pub struct FileService;

impl FileService {
    pub async fn mkdir(session: &Session, path: &str, recursive: bool) -> Result<ExecResult> {
        security::require_absolute_path(path)?;
        let path_q = security::shell_single_quote_escape(path);
        let flag = if recursive { "-p " } else { "" };
        run(session, &format!("mkdir {flag}{path_q}")).await
    }

    /// `content` is arbitrary bytes, so it's base64-encoded before it ever
    /// becomes part of the command text handed to the session's shell — the
    /// heredoc itself only ever carries plain base64 characters, and
    /// `base64 -d` on the shell side reconstructs the original bytes
    /// exactly, including any `\0`/invalid-UTF-8 content a plain heredoc of
    /// the raw bytes couldn't carry as a Rust/JSON string in the first place.
    pub async fn write(session: &Session, path: &str, content: &[u8]) -> Result<ExecResult> {
        security::require_absolute_path(path)?;
        security::validate_content_size(content)?;

        let path_q = security::shell_single_quote_escape(path);
        let dir_expr = format!("$(dirname {path_q})");
        let encoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(content)
        };
        let command = format!(
            "mkdir -p {dir_expr} && base64 -d > {path_q} <<'{HEREDOC_TAG}'\n{encoded}\n{HEREDOC_TAG}"
        );
        run(session, &command).await
    }

    pub async fn read(session: &Session, path: &str) -> Result<ExecResult> {
        security::require_absolute_path(path)?;
        let path_q = security::shell_single_quote_escape(path);
        run(session, &format!("cat {path_q}")).await
    }

    pub async fn delete(session: &Session, path: &str) -> Result<ExecResult> {
        security::require_absolute_path(path)?;
        let path_q = security::shell_single_quote_escape(path);
        run(session, &format!("rm -rf {path_q}")).await
    }

    pub async fn rename(session: &Session, old_path: &str, new_path: &str) -> Result<ExecResult> {
        security::require_absolute_path(old_path)?;
        security::require_absolute_path(new_path)?;
        let old_q = security::shell_single_quote_escape(old_path);
        let new_q = security::shell_single_quote_escape(new_path);
        run(session, &format!("mv {old_q} {new_q}")).await
    }

    pub async fn move_path(session: &Session, source_path: &str, destination_path: &str) -> Result<ExecResult> {
        Self::rename(session, source_path, destination_path).await
    }

    pub async fn list(session: &Session, path: &str, recursive: bool, include_hidden: bool) -> Result<Vec<DirEntryInfo>> {
        security::require_absolute_path(path)?;
        let path_q = security::shell_single_quote_escape(path);
        let flags = match (recursive, include_hidden) {
            (true, true) => "-laR",
            (true, false) => "-lR",
            (false, true) => "-la",
            (false, false) => "-l",
        };
        let result = run(session, &format!("ls {flags} {path_q}")).await?;
        let stdout = String::from_utf8_lossy(&result.stdout);
        Ok(parse_ls_output(&stdout, path))
    }
}

async fn run(session: &Session, command: &str) -> Result<ExecResult> {
    Ok(session.exec(command.to_string(), None, FILE_OP_TIMEOUT_MS, false).await?)
}

/// Parses `ls -la`/`ls -lR` output into structured entries. Handles the
/// common coreutils format: `perms links owner group size
/// month day time-or-year name`. `ls -lR` output is split into per-
/// directory sections headed by a `<dir>:` line, which becomes the prefix
/// for `relative_path`/`absolute_path`.
fn parse_ls_output(stdout: &str, root: &str) -> Vec<DirEntryInfo> {
    let mut entries = Vec::new();
    let mut current_dir = root.to_string();

    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("total ") {
            continue;
        }
        if let Some(dir) = line.strip_suffix(':') {
            current_dir = dir.to_string();
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }

        let mode = fields[0].to_string();
        let kind = match mode.chars().next() {
            Some('d') => EntryKind::Directory,
            Some('l') => EntryKind::Symlink,
            Some('-') => EntryKind::File,
            _ => EntryKind::Other,
        };
        let size: u64 = fields[4].parse().unwrap_or(0);
        let mtime_string = format!("{} {} {}", fields[5], fields[6], fields[7]);
        let name_field = fields[8..].join(" ");
        let name = name_field.split(" -> ").next().unwrap_or(&name_field).to_string();
        if name == "." || name == ".." {
            continue;
        }

        let absolute_path = format!("{}/{}", current_dir.trim_end_matches('/'), name);
        let relative_path = absolute_path.trim_start_matches(root).trim_start_matches('/').to_string();

        entries.push(DirEntryInfo {
            name,
            absolute_path,
            relative_path,
            kind,
            size,
            mtime_string,
            permissions: mode[1..].to_string(),
            mode,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_ls_la_output() {
        let stdout = "total 8\n\
                       drwxr-xr-x 2 root root 4096 Jan  1 00:00 sub\n\
                       -rw-r--r-- 1 root root   12 Jan  1 00:00 note.txt\n";
        let entries = parse_ls_output(stdout, "/workspace");

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "sub" && matches!(e.kind, EntryKind::Directory)));
        let file = entries.iter().find(|e| e.name == "note.txt").unwrap();
        assert_eq!(file.size, 12);
        assert_eq!(file.absolute_path, "/workspace/note.txt");
    }

    #[test]
    fn skips_dot_entries_and_total_line() {
        let stdout = "total 0\ndrwxr-xr-x 2 root root 4096 Jan 1 00:00 .\ndrwxr-xr-x 2 root root 4096 Jan 1 00:00 ..\n";
        let entries = parse_ls_output(stdout, "/workspace");
        assert!(entries.is_empty());
    }
}
