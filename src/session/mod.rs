//! Session engine: one isolated, persistent shell per session, addressable
//! as a unit by the HTTP router and its session-aware services.

mod session;

pub use session::{ExecResult, Session, SessionError, SessionInfo};
