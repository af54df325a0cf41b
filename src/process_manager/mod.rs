//! Process manager: named background jobs, one or more per session, that
//! run as genuine child processes independent of the
//! session's own serialized shell — unlike `exec`, these run truly in
//! parallel with each other and with whatever the session's shell is
//! doing.

mod record;

pub use record::{ProcessEvent, ProcessInfo, ProcessManager, ProcessManagerError, ProcessStatus};
