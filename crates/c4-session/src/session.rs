//! The per-connection `Session`: the server's record of one client from
//! accept to teardown.
//!
//! Mirrors `Client` in the original C++ server — socket, nick, state,
//! and the ping-seen flag all live on one object — but holds a generic
//! [`Connection`] instead of a raw file descriptor, and exposes no
//! back-reference to the server: callers push outbound
//! [`ServerMessage`](c4_protocol::ServerMessage)s through [`Session::send`]
//! and read/write state through the accessors below.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use c4_protocol::ServerMessage;
use c4_transport::Connection;

use crate::SessionError;

/// A session's place in the per-connection state machine (spec §3/§4.7).
///
/// The discriminant order is part of the wire protocol: `/STATE`
/// replies with this enum's ordinal (spec §9 Open Questions), so the
/// order below must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    AwaitNick = 0,
    Lobby = 1,
    SentInvite = 2,
    ReceivedInvite = 3,
    InGame = 4,
    Terminating = 5,
}

impl SessionState {
    /// The integer the client sees in reply to `/STATE`.
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// One accepted connection, from acceptance to teardown.
///
/// `nick` is `None` until `NICK <nick>` succeeds; once set it never
/// changes for the lifetime of the session (a session that wants a
/// different nick reconnects as a new one). `alive` is the universal
/// cancellation signal (spec §5): every timer tied to this session
/// checks it each tick and exits once it flips false.
pub struct Session<C: Connection> {
    conn: C,
    remote_addr: String,
    nick: Mutex<Option<String>>,
    state: Mutex<SessionState>,
    alive: AtomicBool,
    ping_seen: AtomicBool,
}

impl<C: Connection> Session<C> {
    /// Wraps a freshly-accepted connection in `AwaitNick` state.
    pub fn new(conn: C) -> Self {
        let remote_addr = conn.remote_addr();
        Self {
            conn,
            remote_addr,
            nick: Mutex::new(None),
            state: Mutex::new(SessionState::AwaitNick),
            alive: AtomicBool::new(true),
            ping_seen: AtomicBool::new(false),
        }
    }

    /// The underlying connection, for the reader loop's `recv_frame`.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// The peer address, for logging only.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// The session's nick, if `NICK` has succeeded.
    pub fn nick(&self) -> Option<String> {
        self.nick.lock().clone()
    }

    /// Claims a nick. Callers must have already checked uniqueness
    /// against the registry — this only records the local choice.
    pub fn set_nick(&self, nick: impl Into<String>) {
        *self.nick.lock() = Some(nick.into());
    }

    /// The session's current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Unconditionally sets the state. Used for transitions that don't
    /// need the invariant check in [`Self::transition`] (e.g. the
    /// initial `AwaitNick -> Lobby` move, or forcing `Terminating`
    /// during teardown).
    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Moves the state from `expected` to `next`, or reports the
    /// mismatch rather than silently overwriting it (spec §7's
    /// "internal assertion" error category).
    pub fn transition(&self, expected: SessionState, next: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if *state != expected {
            return Err(SessionError::UnexpectedState { expected, found: *state });
        }
        *state = next;
        Ok(())
    }

    /// Whether the session's reader loop and timers should keep running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// The raw cancellation flag, for passing into
    /// [`Connection::recv_frame`]'s poll loop directly.
    pub fn alive_flag(&self) -> &AtomicBool {
        &self.alive
    }

    /// The universal cancellation signal (spec §5): flips `alive` to
    /// false so every timer and the reader loop exit at their next
    /// checkpoint.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Records that a `PING` frame just arrived.
    pub fn mark_ping_seen(&self) {
        self.ping_seen.store(true, Ordering::Release);
    }

    /// Clears and returns whether a `PING` arrived since the last call
    /// — the ping timer's per-tick check.
    pub fn take_ping_seen(&self) -> bool {
        self.ping_seen.swap(false, Ordering::AcqRel)
    }

    /// Sends `msg`, best-effort (spec §4.1): a write failure marks the
    /// session dead rather than propagating, since a single
    /// misbehaving socket must never affect any other client.
    pub async fn send(&self, msg: &ServerMessage) {
        if let Err(err) = self.conn.send_frame(&msg.encode()).await {
            tracing::debug!(
                addr = %self.remote_addr,
                error = %err,
                "send failed, marking session dead"
            );
            self.mark_dead();
        }
    }
}
