//! Per-connection dispatch: the session's state machine (spec §4.7),
//! invitation and turn timers, and the reconnect subsystem (spec §4.8).
//!
//! Grounded on `Server::handleClient`'s dispatch chain in the original
//! server (universal verbs checked ahead of the per-state `switch`),
//! but all teardown paths funnel through one [`teardown`] instead of
//! being repeated at every `removeClient(client); return;` call site.

use std::sync::Arc;

use c4_protocol::{is_valid_nick, Command, ServerMessage, UNDEFINED_NICK};
use c4_registry::Registry;
use c4_room::{GameRoom, PlayOutcome, TurnTimerTick};
use c4_session::{run_nick_entry_timer, run_ping_timer, Session, SessionState};
use c4_tick::TickScheduler;
use c4_transport::{Connection, RecvEvent};

/// Seconds a pending invitation waits for a reply before both parties
/// are returned to `LOBBY` (spec §3 Invitation lifecycle: "30s expiry").
pub const INVITE_REPLY_TIMEOUT_SECS: u32 = 30;

/// Seconds a mid-game disconnect's opponent waits before the room is
/// dissolved (spec §4.8, `SECONDS_WAITING_FOR_DISCONNECTED_PLAYER`).
pub const RECONNECT_GRACE_SECS: u32 = 60;

/// Static help text for `/HELP`, mirroring the command table in §4.2
/// rather than the original's map-iteration order.
const HELP_TEXT: &str = "EXIT leaves the server; PING keepalive; /HELP this text; \
/NICK your nick; /STATE your session state; /ALL_CLIENTS online nicks; \
NICK <nick> claim a nick; RQ <nick> invite a lobby client; \
RQ_CANCELED <nick> cancel your pending invite; RPL <nick> YES|NO reply to an invite; \
GAME_CANCELED cancel the game you're in; GAME_PLAY <col> drop a piece in column 0-6";

/// Why a session's reader loop stopped — decides how [`teardown`]
/// treats an in-progress game (spec §4.8's "any reason other than
/// clean EXIT" distinction between immediate dissolve and reconnect
/// grace).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownReason {
    Exit,
    ProtocolViolation,
    Disconnected,
}

/// Outcome of [`dispatch`]: keep reading, or stop for `reason`.
enum DispatchOutcome {
    Continue,
    Stop(TeardownReason),
}

/// Drives one accepted connection from acceptance to teardown.
pub async fn handle_connection<C: Connection>(conn: C, registry: Arc<Registry<C>>) {
    let session = Arc::new(Session::new(conn));
    let addr = session.remote_addr().to_string();
    tracing::info!(%addr, "client connected");

    let nick_timer = tokio::spawn(run_nick_entry_timer(Arc::clone(&session)));
    let ping_timer = tokio::spawn(run_ping_timer(Arc::clone(&session)));

    let reason = reader_loop(&session, &registry).await;
    teardown(&session, &registry, reason).await;

    session.set_state(SessionState::Terminating);
    session.mark_dead();
    let _ = session.connection().close().await;
    let _ = nick_timer.await;
    let _ = ping_timer.await;
    tracing::info!(%addr, "client disconnected");
}

/// The protocol loop (spec §4.5 "Reader"): parse one frame at a time
/// and dispatch, until the session dies for any reason.
async fn reader_loop<C: Connection>(session: &Arc<Session<C>>, registry: &Arc<Registry<C>>) -> TeardownReason {
    loop {
        if !session.is_alive() {
            return TeardownReason::Disconnected;
        }
        match session.connection().recv_frame(session.alive_flag()).await {
            Ok(RecvEvent::Frame(payload)) => {
                let cmd = Command::parse(&payload);
                match dispatch(cmd, session, registry).await {
                    DispatchOutcome::Continue => continue,
                    DispatchOutcome::Stop(reason) => return reason,
                }
            }
            Ok(RecvEvent::Disconnected) | Ok(RecvEvent::Cancelled) => return TeardownReason::Disconnected,
            Err(err) => {
                tracing::debug!(addr = %session.remote_addr(), error = %err, "recv error, disconnecting");
                return TeardownReason::Disconnected;
            }
        }
    }
}

/// Universal verbs are checked ahead of per-state dispatch in every
/// state, including `AWAIT_NICK` — grounded on the original's
/// `if (msg == UNKNOWN) ... else if (msg == I_EXIT) ... else if
/// (msg == I_PING) ...` chain, which runs entirely before the
/// per-state `switch`.
async fn dispatch<C: Connection>(
    cmd: Command,
    session: &Arc<Session<C>>,
    registry: &Arc<Registry<C>>,
) -> DispatchOutcome {
    if matches!(cmd, Command::Unknown) {
        session.send(&ServerMessage::InvalidProtocol("unknown message".into())).await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    }

    match cmd {
        Command::Exit => {
            session.send(&ServerMessage::Ok).await;
            return DispatchOutcome::Stop(TeardownReason::Exit);
        }
        Command::Ping => {
            session.mark_ping_seen();
            session.send(&ServerMessage::Ok).await;
            return DispatchOutcome::Continue;
        }
        Command::ReadState => {
            session.send(&ServerMessage::OkWith(session.state().ordinal().to_string())).await;
            return DispatchOutcome::Continue;
        }
        Command::ReadNick => {
            let nick = session.nick().unwrap_or_else(|| UNDEFINED_NICK.to_string());
            session.send(&ServerMessage::OkWith(nick)).await;
            return DispatchOutcome::Continue;
        }
        Command::ListNicks => {
            session.send(&ServerMessage::OkWith(registry.online_nicks().join(" "))).await;
            return DispatchOutcome::Continue;
        }
        Command::Help => {
            session.send(&ServerMessage::OkWith(HELP_TEXT.to_string())).await;
            return DispatchOutcome::Continue;
        }
        _ => {}
    }

    match session.state() {
        SessionState::AwaitNick => handle_await_nick(cmd, session, registry).await,
        SessionState::Lobby => handle_lobby(cmd, session, registry).await,
        SessionState::SentInvite => handle_sent_invite(cmd, session, registry).await,
        SessionState::ReceivedInvite => handle_received_invite(cmd, session, registry).await,
        SessionState::InGame => handle_in_game(cmd, session, registry).await,
        SessionState::Terminating => DispatchOutcome::Stop(TeardownReason::Disconnected),
    }
}

async fn handle_await_nick<C: Connection>(
    cmd: Command,
    session: &Arc<Session<C>>,
    registry: &Arc<Registry<C>>,
) -> DispatchOutcome {
    let Command::SetNick(nick) = cmd else {
        session.send(&ServerMessage::InvalidProtocol("you are supposed to set your nick first".into())).await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };

    if !is_valid_nick(&nick) {
        session.send(&ServerMessage::InvalidProtocol("invalid nick".into())).await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    }

    if !registry.add_session(&nick, Arc::clone(session)) {
        tracing::info!(addr = %session.remote_addr(), %nick, "duplicate nick, closing silently");
        return DispatchOutcome::Stop(TeardownReason::Disconnected);
    }

    session.set_nick(&nick);
    session.set_state(SessionState::Lobby);
    session.send(&ServerMessage::Ok).await;

    for other in registry.online_nicks() {
        if other != nick {
            session.send(&ServerMessage::AddClient(other)).await;
        }
    }
    for busy in registry.busy_nicks() {
        if busy != nick {
            session.send(&ServerMessage::GamePlayerState { nick: busy, online: false }).await;
        }
    }

    registry.broadcast_except(&nick, ServerMessage::AddClient(nick.clone())).await;

    if registry.is_reconnect_waiter(&nick) {
        complete_reconnect(&nick, session, registry).await;
    }

    DispatchOutcome::Continue
}

async fn handle_lobby<C: Connection>(
    cmd: Command,
    session: &Arc<Session<C>>,
    registry: &Arc<Registry<C>>,
) -> DispatchOutcome {
    let nick = session.nick().expect("lobby session always has a claimed nick");

    let Command::Invite(target) = cmd else {
        session.send(&ServerMessage::InvalidProtocol(
            "in the lobby, you're supposed to send a game request to another player".into(),
        )).await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };

    let Some(target_session) = registry.get_session(&target) else {
        session
            .send(&ServerMessage::InvalidProtocol(format!("there is no client with nick '{target}'")))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };
    if target == nick {
        session
            .send(&ServerMessage::InvalidProtocol("you cannot send a game request to yourself".into()))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    }
    if target_session.state() != SessionState::Lobby {
        session
            .send(&ServerMessage::InvalidProtocol(
                "you cannot send a game request to a client that is already playing a game".into(),
            ))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    }

    session.set_state(SessionState::SentInvite);
    target_session.set_state(SessionState::ReceivedInvite);
    session.send(&ServerMessage::Ok).await;
    target_session.send(&ServerMessage::Rq(nick.clone())).await;

    registry.broadcast_except(&nick, ServerMessage::GamePlayerState { nick: nick.clone(), online: false }).await;
    registry
        .broadcast_except(&target, ServerMessage::GamePlayerState { nick: target.clone(), online: false })
        .await;

    let generation = registry.add_invitation(&nick, &target);
    tokio::spawn(run_invite_reply_timer(nick, target, generation, Arc::clone(registry)));

    DispatchOutcome::Continue
}

async fn handle_sent_invite<C: Connection>(
    cmd: Command,
    session: &Arc<Session<C>>,
    registry: &Arc<Registry<C>>,
) -> DispatchOutcome {
    let nick = session.nick().expect("sent-invite session always has a claimed nick");

    let Command::CancelInvite(target) = cmd else {
        session
            .send(&ServerMessage::InvalidProtocol(
                "you can either cancel the request or wait for a reply from the other player".into(),
            ))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };

    let Some(receiver) = registry.invitation_receiver(&nick) else {
        session
            .send(&ServerMessage::InvalidProtocol("there is no pending game request".into()))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };
    if target != receiver {
        session
            .send(&ServerMessage::InvalidProtocol("you can only cancel your own game request".into()))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    }

    registry.remove_invitation(&nick, &receiver);
    session.set_state(SessionState::Lobby);
    if let Some(s) = registry.get_session(&receiver) {
        s.set_state(SessionState::Lobby);
    }
    session.send(&ServerMessage::Ok).await;
    registry.send_to(&receiver, ServerMessage::RqCanceled(nick.clone())).await;
    registry.broadcast_except(&nick, ServerMessage::GamePlayerState { nick: nick.clone(), online: true }).await;
    registry
        .broadcast_except(&receiver, ServerMessage::GamePlayerState { nick: receiver.clone(), online: true })
        .await;

    DispatchOutcome::Continue
}

async fn handle_received_invite<C: Connection>(
    cmd: Command,
    session: &Arc<Session<C>>,
    registry: &Arc<Registry<C>>,
) -> DispatchOutcome {
    let nick = session.nick().expect("received-invite session always has a claimed nick");

    let Command::ReplyInvite { sender, accept } = cmd else {
        session
            .send(&ServerMessage::InvalidProtocol("you're supposed to reply to the game request".into()))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };

    let Some(recorded_sender) = registry.invitation_sender(&nick) else {
        session
            .send(&ServerMessage::InvalidProtocol("you're supposed to reply to the game request".into()))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };
    if sender != recorded_sender {
        session
            .send(&ServerMessage::InvalidProtocol(format!("client '{sender}' did not send you the game request")))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    }
    let Some(sender_session) = registry.get_session(&sender) else {
        session
            .send(&ServerMessage::InvalidProtocol(format!("there is no client with nick '{sender}'")))
            .await;
        return DispatchOutcome::Stop(TeardownReason::ProtocolViolation);
    };

    registry.remove_invitation(&sender, &nick);

    if accept {
        session.set_state(SessionState::InGame);
        sender_session.set_state(SessionState::InGame);
        session.send(&ServerMessage::GameStart(sender.clone())).await;
        sender_session.send(&ServerMessage::GameStart(nick.clone())).await;
        registry.create_room(&sender, &nick);
        tokio::spawn(run_turn_timer(sender, nick, Arc::clone(registry)));
    } else {
        session.set_state(SessionState::Lobby);
        sender_session.set_state(SessionState::Lobby);
        session.send(&ServerMessage::Ok).await;
        sender_session.send(&ServerMessage::RqCanceled(nick.clone())).await;
        registry.broadcast_except(&nick, ServerMessage::GamePlayerState { nick: nick.clone(), online: true }).await;
        registry
            .broadcast_except(&sender, ServerMessage::GamePlayerState { nick: sender.clone(), online: true })
            .await;
    }

    DispatchOutcome::Continue
}

async fn handle_in_game<C: Connection>(
    cmd: Command,
    session: &Arc<Session<C>>,
    registry: &Arc<Registry<C>>,
) -> DispatchOutcome {
    let nick = session.nick().expect("in-game session always has a claimed nick");

    match cmd {
        Command::Play(col) => {
            let Some(room) = registry.room_for(&nick) else {
                return DispatchOutcome::Continue;
            };
            let outcome = room.lock().apply_move(&nick, col);
            match outcome {
                PlayOutcome::Ongoing(events) => {
                    deliver(registry, events).await;
                }
                PlayOutcome::Terminal(events) => {
                    let (player_a, player_b) = {
                        let guard = room.lock();
                        let (a, b) = guard.players();
                        (a.to_string(), b.to_string())
                    };
                    registry.dissolve_room(&player_a, &player_b);
                    deliver(registry, events).await;
                    set_lobby_and_notify(registry, &player_a).await;
                    set_lobby_and_notify(registry, &player_b).await;
                }
            }
            DispatchOutcome::Continue
        }
        Command::CancelGame => {
            let Some(room) = registry.room_for(&nick) else {
                return DispatchOutcome::Continue;
            };
            let opponent = room.lock().opponent_of(&nick).map(str::to_string);
            let Some(opponent) = opponent else {
                return DispatchOutcome::Continue;
            };
            registry.dissolve_room(&nick, &opponent);
            session.set_state(SessionState::Lobby);
            session.send(&ServerMessage::GameCanceled("you just canceled the game".into())).await;
            registry.send_to(&opponent, ServerMessage::GameCanceled("your opponent canceled the game".into())).await;
            set_lobby_and_notify(registry, &nick).await;
            set_lobby_and_notify(registry, &opponent).await;
            DispatchOutcome::Continue
        }
        _ => {
            session
                .send(&ServerMessage::InvalidProtocol(
                    "when you're playing a game, you're supposed to either play or cancel it".into(),
                ))
                .await;
            DispatchOutcome::Stop(TeardownReason::ProtocolViolation)
        }
    }
}

/// Delivers a batch of `(recipient, message)` events from [`GameRoom`]
/// through the registry — the outbound-sink side of the redesign in
/// spec §9 that keeps the engine itself free of any send capability.
async fn deliver<C: Connection>(registry: &Arc<Registry<C>>, events: Vec<(String, ServerMessage)>) {
    for (nick, msg) in events {
        registry.send_to(&nick, msg).await;
    }
}

/// Moves `nick`'s session back to `LOBBY` (if it still exists) and
/// broadcasts its renewed availability.
async fn set_lobby_and_notify<C: Connection>(registry: &Arc<Registry<C>>, nick: &str) {
    if let Some(s) = registry.get_session(nick) {
        s.set_state(SessionState::Lobby);
    }
    registry
        .broadcast_except(nick, ServerMessage::GamePlayerState { nick: nick.to_string(), online: true })
        .await;
}

/// Final cleanup for a session whose reader loop has exited, keyed off
/// the state it was in and why it stopped (spec §3 Lifecycles, §4.7's
/// per-state teardown clauses, §4.8's reconnect trigger).
async fn teardown<C: Connection>(session: &Arc<Session<C>>, registry: &Arc<Registry<C>>, reason: TeardownReason) {
    let Some(nick) = session.nick() else {
        return;
    };

    match session.state() {
        SessionState::SentInvite => {
            if let Some(receiver) = registry.invitation_receiver(&nick) {
                registry.remove_invitation(&nick, &receiver);
                if let Some(s) = registry.get_session(&receiver) {
                    s.set_state(SessionState::Lobby);
                }
                registry.send_to(&receiver, ServerMessage::RqCanceled(nick.clone())).await;
                registry
                    .broadcast_except(&receiver, ServerMessage::GamePlayerState { nick: receiver.clone(), online: true })
                    .await;
            }
        }
        SessionState::ReceivedInvite => {
            if let Some(sender) = registry.invitation_sender(&nick) {
                registry.remove_invitation(&sender, &nick);
                if let Some(s) = registry.get_session(&sender) {
                    s.set_state(SessionState::Lobby);
                }
                registry.send_to(&sender, ServerMessage::RqCanceled(nick.clone())).await;
                registry
                    .broadcast_except(&sender, ServerMessage::GamePlayerState { nick: sender.clone(), online: true })
                    .await;
            }
        }
        SessionState::InGame => match reason {
            TeardownReason::Disconnected => start_reconnect_subsystem(&nick, registry).await,
            TeardownReason::Exit => {
                dissolve_room_with_message(&nick, registry, "your opponent has suddenly left the server (on purpose)")
                    .await;
            }
            TeardownReason::ProtocolViolation => {
                dissolve_room_with_message(
                    &nick,
                    registry,
                    "your opponent was not following the protocol and was kicked out of the server",
                )
                .await;
            }
        },
        SessionState::AwaitNick | SessionState::Lobby | SessionState::Terminating => {}
    }

    registry.remove_session(&nick);
    registry.broadcast_except(&nick, ServerMessage::RemoveClient(nick.clone())).await;
}

/// Dissolves `nick`'s room immediately (no reconnect grace), notifying
/// the opponent with `message` if they're still actively in the room,
/// or simply dropping the stale reconnect-waiter entry if the opponent
/// had already disconnected first.
async fn dissolve_room_with_message<C: Connection>(nick: &str, registry: &Arc<Registry<C>>, message: &str) {
    let Some(room) = registry.remove_room_entry(nick) else {
        return;
    };
    let opponent = room.lock().opponent_of(nick).map(str::to_string);
    let Some(opponent) = opponent else {
        return;
    };

    if registry.room_for(&opponent).is_some() {
        registry.remove_room_entry(&opponent);
        if let Some(s) = registry.get_session(&opponent) {
            s.set_state(SessionState::Lobby);
        }
        registry.send_to(&opponent, ServerMessage::GameCanceled(message.to_string())).await;
        registry
            .broadcast_except(&opponent, ServerMessage::GamePlayerState { nick: opponent.clone(), online: true })
            .await;
    } else {
        registry.remove_reconnect_waiter(&opponent);
    }
}

/// Pauses the room and starts the 60-second grace timer (spec §4.8
/// steps 1-3) when a mid-game participant disappears for any reason
/// other than a clean `EXIT`.
async fn start_reconnect_subsystem<C: Connection>(nick: &str, registry: &Arc<Registry<C>>) {
    let Some(room) = registry.remove_room_entry(nick) else {
        return;
    };
    let opponent = room.lock().opponent_of(nick).map(str::to_string);
    let Some(opponent) = opponent else {
        return;
    };

    if registry.room_for(&opponent).is_none() {
        registry.remove_reconnect_waiter(&opponent);
        return;
    }

    room.lock().set_paused(true);
    registry
        .send_to(
            &opponent,
            ServerMessage::GameMsg(format!(
                "other player lost their connection. Waiting for him {RECONNECT_GRACE_SECS}s"
            )),
        )
        .await;
    let generation = registry.add_reconnect_waiter(nick, &opponent);

    tokio::spawn(run_reconnect_grace_timer(nick.to_string(), opponent, generation, Arc::clone(registry)));
}

/// Rebinds a reconnecting player back into their game room (spec §4.8
/// step 4), called once `NICK` succeeds with a nick still on the
/// reconnect-waiters table.
async fn complete_reconnect<C: Connection>(nick: &str, session: &Arc<Session<C>>, registry: &Arc<Registry<C>>) {
    let Some(opponent) = registry.remove_reconnect_waiter(nick) else {
        return;
    };
    let Some(room) = registry.room_for(&opponent) else {
        return;
    };

    registry.rebind_room_entry(nick, Arc::clone(&room));
    session.set_state(SessionState::InGame);
    let board = {
        let mut guard = room.lock();
        guard.set_paused(false);
        guard.serialize_for_recovery()
    };

    session.send(&ServerMessage::GameStart(opponent.clone())).await;
    session
        .send(&ServerMessage::GameMsg(format!("you've been successfully added back to the game against {opponent}")))
        .await;
    session.send(&ServerMessage::GameRecovery(board)).await;
    registry.send_to(&opponent, ServerMessage::GameMsg("your opponent is back in the game".into())).await;
    registry
        .broadcast_except(nick, ServerMessage::GamePlayerState { nick: nick.to_string(), online: false })
        .await;
}

/// Ticks once a second while a pending invitation exists; expires it
/// (spec §3 "30s expiry") unless it was already resolved elsewhere
/// (accept/reject/cancel, or removed during the sender's or
/// receiver's own teardown). `generation` identifies the exact
/// invitation this timer was spawned for, so a cancel immediately
/// followed by a fresh re-invite between the same two nicks can never
/// be cut short by this timer's stale final check.
async fn run_invite_reply_timer<C: Connection>(
    sender: String,
    receiver: String,
    generation: u64,
    registry: Arc<Registry<C>>,
) {
    let mut ticks = TickScheduler::with_rate(1);
    for _ in 0..INVITE_REPLY_TIMEOUT_SECS {
        ticks.wait_for_tick().await;
        if !registry.invitation_is_current(&sender, &receiver, generation) {
            return;
        }
    }
    if !registry.invitation_is_current(&sender, &receiver, generation) {
        return;
    }

    registry.remove_invitation(&sender, &receiver);
    if let Some(s) = registry.get_session(&sender) {
        s.set_state(SessionState::Lobby);
    }
    if let Some(s) = registry.get_session(&receiver) {
        s.set_state(SessionState::Lobby);
    }
    registry.send_to(&sender, ServerMessage::RqCanceled(receiver.clone())).await;
    registry.send_to(&receiver, ServerMessage::RqCanceled(sender.clone())).await;
    registry.broadcast_except(&sender, ServerMessage::GamePlayerState { nick: sender.clone(), online: true }).await;
    registry
        .broadcast_except(&receiver, ServerMessage::GamePlayerState { nick: receiver.clone(), online: true })
        .await;
}

/// Ticks once a second while the grace window for a disconnected
/// mid-game player is open (spec §4.8 step 3): exits early if the
/// opponent also left or the reconnect already completed, otherwise
/// dissolves the room at expiry (step 5). `generation` identifies the
/// exact reconnect window this timer was spawned for, so a completed
/// reconnect followed by a fresh disconnect between the same two nicks
/// can never be cut short by this timer's stale final check.
async fn run_reconnect_grace_timer<C: Connection>(
    disconnected: String,
    opponent: String,
    generation: u64,
    registry: Arc<Registry<C>>,
) {
    let mut ticks = TickScheduler::with_rate(1);
    for _ in 0..RECONNECT_GRACE_SECS {
        ticks.wait_for_tick().await;
        if registry.room_for(&opponent).is_none()
            || !registry.reconnect_waiter_is_current(&disconnected, &opponent, generation)
        {
            return;
        }
    }
    if registry.room_for(&opponent).is_none()
        || !registry.reconnect_waiter_is_current(&disconnected, &opponent, generation)
    {
        return;
    }

    registry.remove_reconnect_waiter(&disconnected);
    registry.remove_room_entry(&opponent);
    if let Some(s) = registry.get_session(&opponent) {
        s.set_state(SessionState::Lobby);
    }
    registry
        .send_to(
            &opponent,
            ServerMessage::GameCanceled(format!(
                "the other player has not been connected back to the server within {RECONNECT_GRACE_SECS}s"
            )),
        )
        .await;
    registry
        .broadcast_except(&opponent, ServerMessage::GamePlayerState { nick: opponent.clone(), online: true })
        .await;
}

/// Drives a game room's 30-second turn-inactivity watchdog (spec
/// §4.4) until the room is dissolved, by any path: a normal
/// win/draw/cancel, a protocol-violation kick, or this timer's own
/// timeout.
async fn run_turn_timer<C: Connection>(player_a: String, player_b: String, registry: Arc<Registry<C>>) {
    let mut ticks = TickScheduler::with_rate(1);
    loop {
        ticks.wait_for_tick().await;
        let Some(room) = registry.room_for(&player_a).or_else(|| registry.room_for(&player_b)) else {
            return;
        };
        let tick = room.lock().tick_turn_timer();
        match tick {
            TurnTimerTick::Continue => {}
            TurnTimerTick::Timeout(events) => {
                registry.dissolve_room(&player_a, &player_b);
                deliver(&registry, events).await;
                set_lobby_and_notify(&registry, &player_a).await;
                set_lobby_and_notify(&registry, &player_b).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c4_transport::{ConnectionId, TransportError};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Mutex as StdMutex;
    use tokio::time::{self, Duration};

    struct FakeConn {
        sent: StdMutex<Vec<String>>,
        inbox: StdMutex<Vec<RecvEvent>>,
        addr: String,
    }

    impl FakeConn {
        fn new(addr: &str) -> Self {
            Self { sent: StdMutex::new(Vec::new()), inbox: StdMutex::new(Vec::new()), addr: addr.to_string() }
        }

        fn push_frame(&self, payload: &str) {
            self.inbox.lock().unwrap().insert(0, RecvEvent::Frame(payload.to_string()));
        }

        fn sent_messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Connection for FakeConn {
        type Error = TransportError;

        async fn send_frame(&self, payload: &str) -> Result<(), Self::Error> {
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }

        async fn recv_frame(&self, _alive: &AtomicBool) -> Result<RecvEvent, Self::Error> {
            match self.inbox.lock().unwrap().pop() {
                Some(event) => Ok(event),
                None => Ok(RecvEvent::Disconnected),
            }
        }

        async fn close(&self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            ConnectionId::new(1)
        }

        fn remote_addr(&self) -> String {
            self.addr.clone()
        }
    }

    #[tokio::test]
    async fn test_set_nick_moves_to_lobby_and_acknowledges() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let session = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));

        let outcome = handle_await_nick(Command::SetNick("alice".into()), &session, &registry).await;
        assert!(matches!(outcome, DispatchOutcome::Continue));
        assert_eq!(session.state(), SessionState::Lobby);
        assert_eq!(session.nick(), Some("alice".to_string()));
        assert!(registry.contains_session("alice"));
    }

    #[tokio::test]
    async fn test_duplicate_nick_closes_without_ok() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        registry.add_session("alice", Arc::new(Session::new(FakeConn::new("1.1.1.1:1"))));

        let session = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        let outcome = handle_await_nick(Command::SetNick("alice".into()), &session, &registry).await;
        assert!(matches!(outcome, DispatchOutcome::Stop(TeardownReason::Disconnected)));
        assert!(session.connection().sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_nick_is_rejected_with_invalid_protocol() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let session = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));

        let outcome = handle_await_nick(Command::SetNick(UNDEFINED_NICK.into()), &session, &registry).await;
        assert!(matches!(outcome, DispatchOutcome::Stop(TeardownReason::ProtocolViolation)));
        assert_eq!(session.connection().sent_messages(), vec!["INVALID_PROTOCOL invalid nick".to_string()]);
    }

    #[tokio::test]
    async fn test_lobby_invite_moves_both_sessions_and_records_invitation() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::Lobby);
        registry.add_session("alice", Arc::clone(&alice));

        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::Lobby);
        registry.add_session("bob", Arc::clone(&bob));

        let outcome = handle_lobby(Command::Invite("bob".into()), &alice, &registry).await;
        assert!(matches!(outcome, DispatchOutcome::Continue));
        assert_eq!(alice.state(), SessionState::SentInvite);
        assert_eq!(bob.state(), SessionState::ReceivedInvite);
        assert_eq!(registry.invitation_receiver("alice"), Some("bob".to_string()));
        assert!(bob.connection().sent_messages().contains(&"RQ alice".to_string()));
    }

    #[tokio::test]
    async fn test_invite_to_unknown_nick_is_a_protocol_violation() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::Lobby);

        let outcome = handle_lobby(Command::Invite("ghost".into()), &alice, &registry).await;
        assert!(matches!(outcome, DispatchOutcome::Stop(TeardownReason::ProtocolViolation)));
    }

    #[tokio::test]
    async fn test_received_invite_accept_starts_game_and_spawns_turn_timer() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::SentInvite);
        registry.add_session("alice", Arc::clone(&alice));

        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::ReceivedInvite);
        registry.add_session("bob", Arc::clone(&bob));
        registry.add_invitation("alice", "bob");

        let outcome = handle_received_invite(
            Command::ReplyInvite { sender: "alice".into(), accept: true },
            &bob,
            &registry,
        )
        .await;
        assert!(matches!(outcome, DispatchOutcome::Continue));
        assert_eq!(alice.state(), SessionState::InGame);
        assert_eq!(bob.state(), SessionState::InGame);
        assert!(registry.room_for("alice").is_some());
        assert!(registry.room_for("bob").is_some());
    }

    #[tokio::test]
    async fn test_in_game_play_broadcasts_to_both_players() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::InGame);
        registry.add_session("alice", Arc::clone(&alice));

        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::InGame);
        registry.add_session("bob", Arc::clone(&bob));

        registry.create_room("alice", "bob");

        let outcome = handle_in_game(Command::Play(3), &alice, &registry).await;
        assert!(matches!(outcome, DispatchOutcome::Continue));
        assert!(alice.connection().sent_messages().iter().any(|m| m.starts_with("GAME_PLAY alice")));
        assert!(bob.connection().sent_messages().iter().any(|m| m.starts_with("GAME_PLAY alice")));
    }

    #[tokio::test]
    async fn test_teardown_exit_dissolves_game_room_and_notifies_opponent() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::InGame);
        registry.add_session("alice", Arc::clone(&alice));

        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::InGame);
        registry.add_session("bob", Arc::clone(&bob));
        registry.create_room("alice", "bob");

        teardown(&alice, &registry, TeardownReason::Exit).await;

        assert!(registry.room_for("bob").is_none());
        assert_eq!(bob.state(), SessionState::Lobby);
        assert!(bob
            .connection()
            .sent_messages()
            .iter()
            .any(|m| m == "GAME_CANCELED your opponent has suddenly left the server (on purpose)"));
        assert!(!registry.contains_session("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_disconnect_pauses_room_and_starts_reconnect_grace() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::InGame);
        registry.add_session("alice", Arc::clone(&alice));

        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::InGame);
        registry.add_session("bob", Arc::clone(&bob));
        registry.create_room("alice", "bob");

        teardown(&alice, &registry, TeardownReason::Disconnected).await;

        assert!(registry.is_reconnect_waiter("alice"));
        assert!(registry.room_for("bob").is_some());
        assert!(registry.room_for("bob").unwrap().lock().is_paused());
        assert!(bob
            .connection()
            .sent_messages()
            .iter()
            .any(|m| m.starts_with("GAME_MSG other player lost their connection")));

        time::advance(Duration::from_secs(RECONNECT_GRACE_SECS as u64 + 1)).await;
    }

    #[tokio::test]
    async fn test_invite_reply_timer_expires_a_still_pending_invitation() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::SentInvite);
        registry.add_session("alice", Arc::clone(&alice));
        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::ReceivedInvite);
        registry.add_session("bob", Arc::clone(&bob));
        let generation = registry.add_invitation("alice", "bob");

        registry.remove_invitation("alice", "bob");
        run_invite_reply_timer("alice".to_string(), "bob".to_string(), generation, Arc::clone(&registry)).await;

        assert_eq!(alice.state(), SessionState::SentInvite);
    }

    #[tokio::test]
    async fn test_invite_reply_timer_ignores_stale_generation_after_reinvite() {
        let registry: Arc<Registry<FakeConn>> = Arc::new(Registry::new());
        let alice = Arc::new(Session::new(FakeConn::new("1.1.1.1:1")));
        alice.set_nick("alice");
        alice.set_state(SessionState::SentInvite);
        registry.add_session("alice", Arc::clone(&alice));
        let bob = Arc::new(Session::new(FakeConn::new("2.2.2.2:2")));
        bob.set_nick("bob");
        bob.set_state(SessionState::ReceivedInvite);
        registry.add_session("bob", Arc::clone(&bob));

        // First invitation resolves (cancel) and a fresh one is made
        // between the same two nicks before the stale timer expires.
        let stale_generation = registry.add_invitation("alice", "bob");
        registry.remove_invitation("alice", "bob");
        let fresh_generation = registry.add_invitation("alice", "bob");
        assert_ne!(stale_generation, fresh_generation);

        run_invite_reply_timer("alice".to_string(), "bob".to_string(), stale_generation, Arc::clone(&registry)).await;

        // The stale timer must not have touched the fresh invitation.
        assert!(registry.invitation_is_current("alice", "bob", fresh_generation));
        assert_eq!(alice.state(), SessionState::SentInvite);
        assert_eq!(bob.state(), SessionState::ReceivedInvite);
    }

    #[test]
    fn test_fake_conn_push_and_pop_order() {
        let conn = FakeConn::new("x");
        conn.push_frame("one");
        conn.push_frame("two");
        let _ = AtomicOrdering::Relaxed;
    }
}
