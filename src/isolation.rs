//! Isolation probe.
//!
//! A one-time, memoized check for whether PID-namespace isolation via
//! `unshare --pid --fork --mount-proc` is usable in this environment. The
//! result is the only input that alters how the control supervisor spawns
//! its shell (see `supervisor::process`).

use std::sync::OnceLock;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

static PROBE_RESULT: OnceLock<bool> = OnceLock::new();

/// Returns whether PID-namespace isolation is usable, probing at most once
/// per process lifetime.
pub async fn isolation_available() -> bool {
    if let Some(result) = PROBE_RESULT.get() {
        return *result;
    }

    let result = probe().await;
    // Another task may have raced us; OnceLock keeps only the first value,
    // which is fine since the probe is deterministic for a given host.
    let _ = PROBE_RESULT.set(result);
    result
}

async fn probe() -> bool {
    let mut cmd = Command::new("unshare");
    cmd.args(["--pid", "--fork", "--mount-proc", "true"]);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let spawned = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("isolation probe: failed to spawn unshare: {}", e);
            return false;
        }
    };

    match tokio::time::timeout(Duration::from_secs(1), spawned.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => {
            debug!("isolation probe succeeded: PID-namespace isolation available");
            true
        }
        Ok(Ok(output)) => {
            debug!("isolation probe: unshare exited with {:?}", output.status.code());
            false
        }
        Ok(Err(e)) => {
            warn!("isolation probe: error waiting on unshare: {}", e);
            false
        }
        Err(_) => {
            warn!("isolation probe: timed out after 1s");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_is_memoized() {
        // Calling twice must not panic and must return a stable value,
        // regardless of whether `unshare` is actually present on the host
        // this test runs on.
        let first = isolation_available().await;
        let second = isolation_available().await;
        assert_eq!(first, second);
    }
}
