//! The command table and the server's outbound message vocabulary.
//!
//! This crate defines the "language" client and server speak once a
//! [`c4_transport::Connection`] frame has been stripped down to its
//! payload. Nothing here touches a socket or owns any session state —
//! it only knows how to parse a line into a [`Command`] and how to
//! render a [`ServerMessage`] back into one.
//!
//! ```text
//! Transport (framed bytes) -> Protocol (Command / ServerMessage) -> Session
//! ```

mod types;

pub use types::{is_valid_nick, Command, Outcome, ServerMessage, UNDEFINED_NICK};
