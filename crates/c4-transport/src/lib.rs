//! Framed TCP transport for the Connect Four lobby server.
//!
//! Every message on the wire has the exact form
//! `<ProtocolId><Len4><Payload><Term>`, where `Len4` is a zero-padded
//! four-digit decimal length and `<Term>` is a single trailing byte
//! consumed and discarded on receive. [`Transport`] and [`Connection`]
//! abstract over that framing so the session layer never touches a raw
//! socket.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;
use std::sync::atomic::AtomicBool;

/// Protocol identifier every frame must be prefixed with.
pub const PROTOCOL_ID: &str = "silhavyj";

/// Total frame size (protocol id + length header + payload + terminator)
/// a single message must not exceed.
pub const BUF_SIZE: usize = 128;

/// Largest payload that still fits in [`BUF_SIZE`] alongside the header
/// and terminator byte.
pub const MAX_PAYLOAD_LEN: usize = BUF_SIZE - PROTOCOL_ID.len() - 4 - 1;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of a single receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvEvent {
    /// A complete, framed payload arrived.
    Frame(String),
    /// The peer closed the connection.
    Disconnected,
    /// No frame arrived before the caller's `alive` flag flipped false.
    Cancelled,
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that exchanges whole frames with a remote peer.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Encodes `payload` as a single frame and writes it to the peer.
    ///
    /// Best-effort: a write failure marks the connection dead but is
    /// never treated as a process-fatal error by the caller.
    async fn send_frame(&self, payload: &str) -> Result<(), Self::Error>;

    /// Waits for the next frame, polling in short intervals so the
    /// caller can observe `alive` flipping to `false` without blocking
    /// forever on an idle socket.
    async fn recv_frame(&self, alive: &AtomicBool) -> Result<RecvEvent, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the peer's address, formatted for logging.
    fn remote_addr(&self) -> String;
}
