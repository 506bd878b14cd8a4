//! The command table and the server's outbound message vocabulary.
//!
//! Everything here operates on plain ASCII strings — the payload a
//! [`c4_transport::Connection`] frame carries, already stripped of its
//! protocol id, length header, and terminator. Nothing in this crate
//! touches a socket.

use std::fmt;

/// Reserved nick that marks a session which hasn't picked one yet.
/// A client may never claim this nick.
pub const UNDEFINED_NICK: &str = "UNDEFINED_NICK";

// ---------------------------------------------------------------------------
// Command table (client -> server)
// ---------------------------------------------------------------------------

/// A parsed client command.
///
/// [`Command::parse`] is the command table from the specification: a
/// static mapping from the first whitespace-separated token to a kind,
/// with each variant's own arity and value validation. Anything that
/// doesn't match — wrong token count, unknown keyword, a bad enum
/// value, or an empty line — parses to [`Command::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Ping,
    Help,
    ReadNick,
    ReadState,
    ListNicks,
    SetNick(String),
    Invite(String),
    CancelInvite(String),
    ReplyInvite { sender: String, accept: bool },
    CancelGame,
    Play(u8),
    Unknown,
}

impl Command {
    /// Parses one already-decoded frame payload into a [`Command`].
    pub fn parse(payload: &str) -> Command {
        let tokens: Vec<&str> = payload.split(' ').filter(|t| !t.is_empty()).collect();
        match tokens.as_slice() {
            ["EXIT"] => Command::Exit,
            ["PING"] => Command::Ping,
            ["/HELP"] => Command::Help,
            ["/NICK"] => Command::ReadNick,
            ["/STATE"] => Command::ReadState,
            ["/ALL_CLIENTS"] => Command::ListNicks,
            ["NICK", nick] => Command::SetNick(nick.to_string()),
            ["RQ", nick] => Command::Invite(nick.to_string()),
            ["RQ_CANCELED", nick] => Command::CancelInvite(nick.to_string()),
            ["RPL", nick, "YES"] => Command::ReplyInvite { sender: nick.to_string(), accept: true },
            ["RPL", nick, "NO"] => Command::ReplyInvite { sender: nick.to_string(), accept: false },
            ["GAME_CANCELED"] => Command::CancelGame,
            ["GAME_PLAY", col] => match col.parse::<u8>() {
                Ok(c) if c <= 6 => Command::Play(c),
                _ => Command::Unknown,
            },
            _ => Command::Unknown,
        }
    }
}

/// A nick is valid if it is a single whitespace-free token, non-empty,
/// and not the reserved sentinel.
pub fn is_valid_nick(nick: &str) -> bool {
    !nick.is_empty() && nick != UNDEFINED_NICK && !nick.chars().any(char::is_whitespace)
}

// ---------------------------------------------------------------------------
// Server -> client vocabulary
// ---------------------------------------------------------------------------

/// Outcome reported in a `GAME_RESULT` message, from the recipient's
/// point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    Draw,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Won => write!(f, "You won"),
            Outcome::Lost => write!(f, "You lost"),
            Outcome::Draw => write!(f, "draw"),
        }
    }
}

/// Every message the server can send to a client, independent of the
/// framing that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Bare acknowledgement.
    Ok,
    /// Acknowledgement carrying a query answer (`/NICK`, `/STATE`,
    /// `/ALL_CLIENTS`, `/HELP` all reply `OK <answer>`).
    OkWith(String),
    InvalidProtocol(String),
    AddClient(String),
    RemoveClient(String),
    Rq(String),
    RqCanceled(String),
    GameStart(String),
    GamePlay { nick: String, row: u8, col: u8 },
    GameMsg(String),
    GameCanceled(String),
    GameResult(Outcome),
    GameWinningTails([(u8, u8); 4]),
    GameRecovery(String),
    GamePlayerState { nick: String, online: bool },
}

impl ServerMessage {
    /// Renders the message as the space-separated ASCII payload that
    /// goes out over the wire (everything after the frame header).
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::Ok => "OK".to_string(),
            ServerMessage::OkWith(rest) => format!("OK {rest}"),
            ServerMessage::InvalidProtocol(reason) => format!("INVALID_PROTOCOL {reason}"),
            ServerMessage::AddClient(nick) => format!("ADD_CLIENT {nick}"),
            ServerMessage::RemoveClient(nick) => format!("REMOVE_CLIENT {nick}"),
            ServerMessage::Rq(sender) => format!("RQ {sender}"),
            ServerMessage::RqCanceled(peer) => format!("RQ_CANCELED {peer}"),
            ServerMessage::GameStart(opponent) => format!("GAME_START {opponent}"),
            ServerMessage::GamePlay { nick, row, col } => format!("GAME_PLAY {nick} {row} {col}"),
            ServerMessage::GameMsg(text) => format!("GAME_MSG {text}"),
            ServerMessage::GameCanceled(text) => format!("GAME_CANCELED {text}"),
            ServerMessage::GameResult(outcome) => format!("GAME_RESULT {outcome}"),
            ServerMessage::GameWinningTails(cells) => {
                let mut out = String::from("GAME_WINNING_TAILS");
                for (r, c) in cells {
                    out.push_str(&format!(" {r} {c}"));
                }
                out
            }
            ServerMessage::GameRecovery(board) => format!("GAME_RECOVERY {board}"),
            ServerMessage::GamePlayerState { nick, online } => {
                format!("GAME_PLAYER_STATE {nick} {}", if *online { "ON" } else { "OFF" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_universal_verbs() {
        assert_eq!(Command::parse("EXIT"), Command::Exit);
        assert_eq!(Command::parse("PING"), Command::Ping);
        assert_eq!(Command::parse("/HELP"), Command::Help);
        assert_eq!(Command::parse("/NICK"), Command::ReadNick);
        assert_eq!(Command::parse("/STATE"), Command::ReadState);
        assert_eq!(Command::parse("/ALL_CLIENTS"), Command::ListNicks);
    }

    #[test]
    fn test_parse_set_nick() {
        assert_eq!(Command::parse("NICK alice"), Command::SetNick("alice".into()));
    }

    #[test]
    fn test_parse_invite_flow() {
        assert_eq!(Command::parse("RQ bob"), Command::Invite("bob".into()));
        assert_eq!(Command::parse("RQ_CANCELED bob"), Command::CancelInvite("bob".into()));
        assert_eq!(
            Command::parse("RPL bob YES"),
            Command::ReplyInvite { sender: "bob".into(), accept: true }
        );
        assert_eq!(
            Command::parse("RPL bob NO"),
            Command::ReplyInvite { sender: "bob".into(), accept: false }
        );
    }

    #[test]
    fn test_parse_rpl_rejects_bad_enum_value() {
        assert_eq!(Command::parse("RPL bob MAYBE"), Command::Unknown);
    }

    #[test]
    fn test_parse_game_play_validates_column_range() {
        assert_eq!(Command::parse("GAME_PLAY 0"), Command::Play(0));
        assert_eq!(Command::parse("GAME_PLAY 6"), Command::Play(6));
        assert_eq!(Command::parse("GAME_PLAY 7"), Command::Unknown);
        assert_eq!(Command::parse("GAME_PLAY -1"), Command::Unknown);
        assert_eq!(Command::parse("GAME_PLAY banana"), Command::Unknown);
    }

    #[test]
    fn test_parse_wrong_arity_is_unknown() {
        assert_eq!(Command::parse("NICK"), Command::Unknown);
        assert_eq!(Command::parse("NICK alice bob"), Command::Unknown);
        assert_eq!(Command::parse("EXIT now"), Command::Unknown);
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert_eq!(Command::parse(""), Command::Unknown);
        assert_eq!(Command::parse("   "), Command::Unknown);
        assert_eq!(Command::parse("FROBNICATE"), Command::Unknown);
    }

    #[test]
    fn test_is_valid_nick() {
        assert!(is_valid_nick("alice"));
        assert!(!is_valid_nick(""));
        assert!(!is_valid_nick(UNDEFINED_NICK));
        assert!(!is_valid_nick("al ice"));
    }

    #[test]
    fn test_encode_game_result_matches_exact_wording() {
        assert_eq!(ServerMessage::GameResult(Outcome::Won).encode(), "GAME_RESULT You won");
        assert_eq!(ServerMessage::GameResult(Outcome::Lost).encode(), "GAME_RESULT You lost");
        assert_eq!(ServerMessage::GameResult(Outcome::Draw).encode(), "GAME_RESULT draw");
    }

    #[test]
    fn test_encode_game_winning_tails_keyword_spelling() {
        let msg = ServerMessage::GameWinningTails([(5, 3), (4, 3), (3, 3), (2, 3)]);
        assert_eq!(msg.encode(), "GAME_WINNING_TAILS 5 3 4 3 3 3 2 3");
    }

    #[test]
    fn test_encode_game_player_state() {
        let on = ServerMessage::GamePlayerState { nick: "alice".into(), online: true };
        let off = ServerMessage::GamePlayerState { nick: "alice".into(), online: false };
        assert_eq!(on.encode(), "GAME_PLAYER_STATE alice ON");
        assert_eq!(off.encode(), "GAME_PLAYER_STATE alice OFF");
    }

    #[test]
    fn test_encode_ok_variants() {
        assert_eq!(ServerMessage::Ok.encode(), "OK");
        assert_eq!(ServerMessage::OkWith("3".into()).encode(), "OK 3");
    }
}
