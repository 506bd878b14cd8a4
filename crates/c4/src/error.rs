//! Unified error type for the `c4` meta crate.

use c4_transport::TransportError;

/// Top-level error for the server's startup path.
///
/// Per-message and per-session errors (framing violations, protocol
/// violations, transient game errors) are absorbed at the session
/// boundary and converted into `ServerMessage`s plus local teardown —
/// they never reach this type. `ServerError` exists only for the
/// things that can fail before the accept loop is even running: a bad
/// bind address, a listen failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or listening on the configured port failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: ServerError = TransportError::Shutdown.into();
        assert!(matches!(err, ServerError::Transport(_)));
    }
}
