//! A game room: the pairing of two players with one [`Engine`] and a
//! turn-inactivity watchdog.
//!
//! `GameRoom` itself does no I/O and spawns no tasks. `apply_move` and
//! `tick_turn_timer` both return the outbound messages the caller
//! (the registry, which owns the sessions needed to actually deliver
//! them) must send — this is the outbound-event-sink redesign called
//! for in the spec, replacing the teacher's `Connect4 *game` holding a
//! raw `Server*` back-reference.

use c4_protocol::{Outcome, ServerMessage};

use crate::logic::{DropOutcome, Engine, Player};

/// Seconds of to-move inactivity before the turn watchdog cancels the
/// game (spec §4.4, `Connect4::SECONDS_WAITING_FOR_CLIENT_TO_PLAY`).
pub const TURN_TIMEOUT_SECS: u32 = 30;

/// Result of [`GameRoom::apply_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The game continues — a move broadcast, or a transient error
    /// (wrong turn, full column) sent only to the caller.
    Ongoing(Vec<(String, ServerMessage)>),
    /// The game just ended (win or draw). The caller must dissolve the
    /// room after delivering these messages.
    Terminal(Vec<(String, ServerMessage)>),
}

/// Result of one [`GameRoom::tick_turn_timer`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTimerTick {
    /// Nothing to announce yet.
    Continue,
    /// 30 ticks of inactivity elapsed. The caller must dissolve the
    /// room and move both players back to `LOBBY` after delivering
    /// these messages.
    Timeout(Vec<(String, ServerMessage)>),
}

/// Two players, a board, and the bookkeeping the turn watchdog needs.
pub struct GameRoom {
    player_a: String,
    player_b: String,
    engine: Engine,
    paused: bool,
    just_played: bool,
    idle_ticks: u32,
}

impl GameRoom {
    /// Creates a fresh room. `player_a` moves first.
    pub fn new(player_a: impl Into<String>, player_b: impl Into<String>) -> Self {
        Self {
            player_a: player_a.into(),
            player_b: player_b.into(),
            engine: Engine::new(),
            paused: false,
            just_played: false,
            idle_ticks: 0,
        }
    }

    /// The two participants, in `(a, b)` order.
    pub fn players(&self) -> (&str, &str) {
        (&self.player_a, &self.player_b)
    }

    /// The other participant's nick, or `None` if `nick` isn't in this
    /// room.
    pub fn opponent_of(&self, nick: &str) -> Option<&str> {
        if nick == self.player_a {
            Some(&self.player_b)
        } else if nick == self.player_b {
            Some(&self.player_a)
        } else {
            None
        }
    }

    /// The nick of whoever is currently to move.
    pub fn nick_to_move(&self) -> &str {
        match self.engine.to_move() {
            Player::A => &self.player_a,
            Player::B => &self.player_b,
        }
    }

    /// Freezes (`true`) or resumes (`false`) the turn watchdog — used
    /// while the room waits out a disconnected participant's grace
    /// window.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The board, serialized for `GAME_RECOVERY`.
    pub fn serialize_for_recovery(&self) -> String {
        self.engine.serialize_for_recovery()
    }

    /// Applies `nick`'s attempt to drop a piece into `col`.
    pub fn apply_move(&mut self, nick: &str, col: u8) -> PlayOutcome {
        if nick != self.nick_to_move() {
            return PlayOutcome::Ongoing(vec![(
                nick.to_string(),
                ServerMessage::GameMsg("it is not your turn".into()),
            )]);
        }

        match self.engine.drop_piece(col) {
            DropOutcome::ColumnFull => PlayOutcome::Ongoing(vec![(
                nick.to_string(),
                ServerMessage::GameMsg("this column is full. Choose another one".into()),
            )]),
            DropOutcome::Continue { row, col } => {
                self.just_played = true;
                PlayOutcome::Ongoing(self.broadcast_play(nick, row, col))
            }
            DropOutcome::Draw { row, col } => {
                let mut events = self.broadcast_play(nick, row, col);
                events.push((self.player_a.clone(), ServerMessage::GameResult(Outcome::Draw)));
                events.push((self.player_b.clone(), ServerMessage::GameResult(Outcome::Draw)));
                PlayOutcome::Terminal(events)
            }
            DropOutcome::Win { row, col, winner, winning_cells } => {
                let mut events = self.broadcast_play(nick, row, col);
                let winner_nick = match winner {
                    Player::A => &self.player_a,
                    Player::B => &self.player_b,
                };
                let loser_nick = self.opponent_of(winner_nick).unwrap_or(winner_nick).to_string();
                events.push((winner_nick.clone(), ServerMessage::GameResult(Outcome::Won)));
                events.push((loser_nick, ServerMessage::GameResult(Outcome::Lost)));
                events.push((
                    self.player_a.clone(),
                    ServerMessage::GameWinningTails(winning_cells),
                ));
                events.push((
                    self.player_b.clone(),
                    ServerMessage::GameWinningTails(winning_cells),
                ));
                PlayOutcome::Terminal(events)
            }
        }
    }

    fn broadcast_play(&self, nick: &str, row: u8, col: u8) -> Vec<(String, ServerMessage)> {
        let msg = ServerMessage::GamePlay { nick: nick.to_string(), row, col };
        vec![(self.player_a.clone(), msg.clone()), (self.player_b.clone(), msg)]
    }

    /// Advances the turn watchdog by one second.
    ///
    /// Mirrors `Connect4::waitingPlayerToPlayHandler`: if the room is
    /// paused (an opponent is mid-reconnect) the counter resets; if a
    /// move landed since the previous tick, the counter resets and the
    /// flag is cleared; otherwise the counter increments, and on
    /// reaching [`TURN_TIMEOUT_SECS`] the game is cancelled.
    pub fn tick_turn_timer(&mut self) -> TurnTimerTick {
        if self.paused {
            self.idle_ticks = 0;
            return TurnTimerTick::Continue;
        }
        if self.just_played {
            self.just_played = false;
            self.idle_ticks = 0;
            return TurnTimerTick::Continue;
        }
        self.idle_ticks += 1;
        if self.idle_ticks < TURN_TIMEOUT_SECS {
            return TurnTimerTick::Continue;
        }

        let to_move = self.nick_to_move().to_string();
        let opponent = self.opponent_of(&to_move).unwrap_or(&to_move).to_string();
        TurnTimerTick::Timeout(vec![
            (
                to_move,
                ServerMessage::GameCanceled(
                    "the game has been terminated due to you not playing".into(),
                ),
            ),
            (
                opponent,
                ServerMessage::GameCanceled(format!(
                    "your opponent hasn't played for {TURN_TIMEOUT_SECS}s"
                )),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_turn_is_transient() {
        let mut room = GameRoom::new("alice", "bob");
        let outcome = room.apply_move("bob", 0);
        assert_eq!(
            outcome,
            PlayOutcome::Ongoing(vec![(
                "bob".to_string(),
                ServerMessage::GameMsg("it is not your turn".into())
            )])
        );
    }

    #[test]
    fn test_move_broadcasts_to_both_players() {
        let mut room = GameRoom::new("alice", "bob");
        match room.apply_move("alice", 3) {
            PlayOutcome::Ongoing(events) => {
                assert_eq!(events.len(), 2);
                assert!(events.iter().any(|(n, _)| n == "alice"));
                assert!(events.iter().any(|(n, _)| n == "bob"));
            }
            other => panic!("expected ongoing play, got {other:?}"),
        }
    }

    #[test]
    fn test_full_game_ends_terminal_with_result_and_tails() {
        let mut room = GameRoom::new("alice", "bob");
        for (who, col) in
            [("alice", 3), ("bob", 4), ("alice", 3), ("bob", 4), ("alice", 3), ("bob", 4)]
        {
            assert!(matches!(room.apply_move(who, col), PlayOutcome::Ongoing(_)));
        }
        match room.apply_move("alice", 3) {
            PlayOutcome::Terminal(events) => {
                assert!(events.contains(&(
                    "alice".to_string(),
                    ServerMessage::GameResult(Outcome::Won)
                )));
                assert!(events.contains(&(
                    "bob".to_string(),
                    ServerMessage::GameResult(Outcome::Lost)
                )));
                assert!(events.iter().any(|(_, m)| matches!(m, ServerMessage::GameWinningTails(_))));
            }
            other => panic!("expected terminal outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_turn_timer_resets_on_recent_play() {
        let mut room = GameRoom::new("alice", "bob");
        room.apply_move("alice", 0);
        for _ in 0..TURN_TIMEOUT_SECS {
            assert_eq!(room.tick_turn_timer(), TurnTimerTick::Continue);
        }
    }

    #[test]
    fn test_turn_timer_expires_after_30_idle_ticks() {
        let mut room = GameRoom::new("alice", "bob");
        for _ in 0..(TURN_TIMEOUT_SECS - 1) {
            assert_eq!(room.tick_turn_timer(), TurnTimerTick::Continue);
        }
        match room.tick_turn_timer() {
            TurnTimerTick::Timeout(events) => {
                assert!(events.iter().any(|(n, m)| n == "bob"
                    && matches!(m, ServerMessage::GameCanceled(text) if text.contains("30s"))));
                assert!(events.iter().any(|(n, m)| n == "alice"
                    && matches!(m, ServerMessage::GameCanceled(text) if text.contains("not playing"))));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_turn_timer_paused_never_expires() {
        let mut room = GameRoom::new("alice", "bob");
        room.set_paused(true);
        for _ in 0..1000 {
            assert_eq!(room.tick_turn_timer(), TurnTimerTick::Continue);
        }
    }
}
