//! The Connect Four game engine and the game room that drives it.
//!
//! `logic` is a pure value type — no sockets, no sessions, no
//! back-reference to anything that sends messages. `room` wraps one
//! engine with the two participants' nicks and the turn-inactivity
//! watchdog, and reports outcomes as data for the caller to deliver.

mod logic;
mod room;

pub use logic::{Coord, DropOutcome, Engine, Player, COLS, ROWS};
pub use room::{GameRoom, PlayOutcome, TurnTimerTick, TURN_TIMEOUT_SECS};
