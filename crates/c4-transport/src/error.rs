use std::io;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection (clean or abrupt).
    #[error("peer closed the connection")]
    Disconnected,

    /// A frame violated the wire format (bad protocol id, oversized
    /// length, non-UTF8 payload).
    #[error("framing error: {0}")]
    Framing(String),

    /// Binding, accepting, or socket I/O failed for a reason other than
    /// the peer closing the connection.
    #[error("io error: {0}")]
    Io(#[source] io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::Disconnected,
            _ => TransportError::Io(e),
        }
    }
}
