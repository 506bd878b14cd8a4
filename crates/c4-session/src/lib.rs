//! Per-connection session state for the Connect Four lobby server.
//!
//! A [`Session`] is the server's record of one accepted connection:
//! its socket, its nick once claimed, its place in the state machine,
//! and the liveness flags the reader loop and timers all check. The
//! registry above this crate owns the *tables* that index sessions by
//! nick; this crate owns what a single session *is*.
//!
//! ```text
//! Registry (above)  ← indexes sessions by nick, enforces invariants
//!     ↕
//! Session layer (this crate)  ← one connection's state + liveness timers
//!     ↕
//! Transport layer (below)  ← framed socket I/O
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod session;
mod timers;

pub use error::SessionError;
pub use session::{Session, SessionState};
pub use timers::{
    run_nick_entry_timer, run_ping_timer, NICK_ENTRY_TIMEOUT_SECS, PING_TIMEOUT_SECS,
};
