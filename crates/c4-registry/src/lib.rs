//! The process-wide registry: the four locked tables that arbitrate
//! nicks, invitations, game rooms, and reconnect waiters across every
//! connected session (spec §4.6).
//!
//! ```text
//! c4 (acceptor + dispatcher)
//!     ↕
//! Registry (this crate)  ← Sessions, GameRooms, Invitations, ReconnectWaiters
//!     ↕
//! c4-session / c4-room    ← what's stored in each table
//! ```

mod lock_order;
mod registry;

pub use registry::Registry;
