//! Temp-file lifecycle helpers for the control supervisor's `{cmd,out,err,
//! exit}_<id>` files.
//!
//! Deletion of a completed command's own four files happens inline, right
//! where the command finishes (see `supervisor::inner`). This module is the
//! periodic sweeper: every `cleanup_interval`, it scans the shared temp
//! directory for files whose id is not currently active anywhere in the
//! process and unlinks any older than `max_age`.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::protocol::id_from_temp_file_name;

/// Best-effort removal of the four files belonging to one command id.
/// Errors are logged and otherwise ignored — by the time this runs the
/// files may already be gone (normal completion) or never existed
/// (spawn failure before the script was written).
pub async fn cleanup_command_files(temp_dir: &Path, id: &str) {
    for name in [
        format!("cmd_{id}.sh"),
        format!("out_{id}"),
        format!("err_{id}"),
        format!("exit_{id}"),
    ] {
        let path = temp_dir.join(name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove temp file {}: {}", path.display(), e);
            }
        }
    }
}

/// Scans `temp_dir` once, removing any `{cmd,out,err,exit}_<id>` file whose
/// id is not in `active_ids` and whose modification time is older than
/// `max_age`. Returns the number of files removed.
pub async fn sweep_once(temp_dir: &Path, max_age: Duration, active_ids: &HashSet<String>) -> usize {
    let mut removed = 0;

    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("temp-file sweeper: cannot read {}: {}", temp_dir.display(), e);
            return 0;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("temp-file sweeper: error iterating {}: {}", temp_dir.display(), e);
                break;
            }
        };

        let name = entry.file_name();
        let name = name.to_string_lossy();

        let Some(id) = id_from_temp_file_name(&name) else {
            continue;
        };
        if active_ids.contains(&id) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();

        if age >= max_age {
            let path = entry.path();
            if tokio::fs::remove_file(&path).await.is_ok() {
                debug!("swept stale temp file {}", path.display());
                removed += 1;
            }
        }
    }

    removed
}

/// Spawns the periodic sweeper task; stops when `shutdown` is cancelled.
pub fn spawn_sweeper(
    temp_dir: std::path::PathBuf,
    interval: Duration,
    max_age: Duration,
    active_ids: impl Fn() -> HashSet<String> + Send + Sync + 'static,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("temp-file sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let active = active_ids();
                    let n = sweep_once(&temp_dir, max_age, &active).await;
                    if n > 0 {
                        debug!("temp-file sweeper removed {} stale file(s)", n);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sweeps_only_inactive_and_old_files() {
        let dir = TempDir::new().unwrap();

        tokio::fs::write(dir.path().join("out_old"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("out_active"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("unrelated.txt"), b"x").await.unwrap();

        let mut active = HashSet::new();
        active.insert("active".to_string());

        // max_age=0 so the freshly-written "old" file is immediately eligible.
        let removed = sweep_once(dir.path(), Duration::from_millis(0), &active).await;
        assert_eq!(removed, 1);

        assert!(!dir.path().join("out_old").exists());
        assert!(dir.path().join("out_active").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn cleanup_command_files_ignores_missing() {
        let dir = TempDir::new().unwrap();
        // None of these exist; must not error or panic.
        cleanup_command_files(dir.path(), "nope").await;
    }
}
