//! Control supervisor.
//!
//! The supervisor is a genuine second OS process: the same binary,
//! re-exec'd with `__supervisor` as its first argument, that owns one
//! `bash --norc` (optionally `unshare`d) and speaks newline-delimited JSON
//! on its own stdin/stdout to the parent `Session`. This is what gives the
//! design its "two-process" shape and keeps user command execution out of
//! the broker's own process tree.

pub mod inner;
pub mod process;
pub mod protocol;
pub mod tempfiles;

pub use process::{Supervisor, SupervisorError};
pub use protocol::StreamEvent;

/// Argument that re-invokes this binary in supervisor mode. Checked first
/// thing in `main`.
pub const SUPERVISOR_MODE_ARG: &str = "__supervisor";

pub const ENV_SESSION_ID: &str = "SANDBOX_SESSION_ID";
pub const ENV_CWD: &str = "SANDBOX_CWD";
pub const ENV_ISOLATION: &str = "SANDBOX_ISOLATION";
pub const ENV_TEMP_DIR: &str = "SANDBOX_TEMP_DIR";
/// JSON object of extra environment variables the session's shell should
/// start with, set by the parent on the child's own environment (not sent
/// over the protocol channel, since it's fixed for the shell's lifetime).
pub const ENV_ENV_OVERLAY_JSON: &str = "SANDBOX_ENV_OVERLAY_JSON";

/// Interval between marker-file-free stdout polls while streaming a
/// command's output.
pub const STREAM_POLL_INTERVAL_MS: u64 = 50;
