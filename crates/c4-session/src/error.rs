//! Error types for the session layer.

use crate::SessionState;

/// Errors that can occur while driving a session's state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A state transition assumed the session held one state but found
    /// another. A session's single reader task means this should never
    /// happen; surfacing it as an error rather than silently
    /// overwriting the state lets callers treat it as the "internal
    /// assertion" category of spec §7 instead of corrupting the state
    /// machine.
    #[error("expected session state {expected:?}, found {found:?}")]
    UnexpectedState {
        expected: SessionState,
        found: SessionState,
    },
}
