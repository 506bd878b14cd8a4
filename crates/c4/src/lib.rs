//! The acceptor and dispatcher: the crate that ties every other layer
//! of the Connect Four lobby server together.
//!
//! ```text
//! c4-transport  -> framed TCP sockets
//! c4-protocol   -> command table / wire vocabulary
//! c4-session    -> per-connection state + liveness timers
//! c4-room       -> game engine + turn watchdog
//! c4-registry   -> the four locked tables
//! c4-tick       -> the 1 Hz scheduler every timer above builds on
//!     ↕
//! c4 (this crate) -> accept loop, per-session task, state machine
//!                    dispatch, reconnect subsystem (spec §4.7/§4.8)
//! ```
//!
//! Nothing outside this crate knows how to run a whole server; `c4-cli`
//! only parses flags, sets up logging, and calls [`Server::run`].

mod error;
mod handler;
mod server;

pub use error::ServerError;
pub use server::{Server, ServerConfig};
