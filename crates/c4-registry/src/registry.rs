//! The four process-wide tables (spec §4.6): sessions by nick, pending
//! invitations, game rooms, and reconnect waiters.
//!
//! Each table has its own lock; the fixed acquisition order enforced
//! by [`lock_order::OrderGuard`] is `Sessions -> GameRooms ->
//! Invitations -> ReconnectWaiters`. No method here ever holds a lock
//! across an `.await` — I/O (sending to a socket) always happens after
//! snapshotting the recipients and releasing every lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use c4_protocol::ServerMessage;
use c4_room::GameRoom;
use c4_session::{Session, SessionState};
use c4_transport::Connection;

use crate::lock_order::{LockRank, OrderGuard};

/// Receiver -> sender and sender -> receiver indices for pending
/// invitations, kept in one struct behind one lock (spec §4.6: four
/// tables total, one lock each). Each entry carries the generation it
/// was created with, so a timer spawned for one invitation can tell it
/// apart from a later invitation between the same two nicks.
#[derive(Default)]
struct Invitations {
    receiver_to_sender: HashMap<String, (String, u64)>,
    sender_to_receiver: HashMap<String, (String, u64)>,
    next_generation: u64,
}

/// Nicks waiting for their opponent to reconnect, each tagged with the
/// generation its reconnect window was opened under.
#[derive(Default)]
struct ReconnectWaiters {
    waiters: HashMap<String, (String, u64)>,
    next_generation: u64,
}

/// The registry of a single running server.
pub struct Registry<C: Connection> {
    sessions: Mutex<HashMap<String, Arc<Session<C>>>>,
    rooms: Mutex<HashMap<String, Arc<Mutex<GameRoom>>>>,
    invitations: Mutex<Invitations>,
    reconnect: Mutex<ReconnectWaiters>,
}

impl<C: Connection> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Registry<C> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            invitations: Mutex::new(Invitations::default()),
            reconnect: Mutex::new(ReconnectWaiters::default()),
        }
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Claims `nick` for `session`. Returns `false` without modifying
    /// anything if the nick is already taken (spec §3 Invariant 1).
    pub fn add_session(&self, nick: &str, session: Arc<Session<C>>) -> bool {
        let _g = OrderGuard::enter(LockRank::Sessions);
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(nick) {
            return false;
        }
        sessions.insert(nick.to_string(), session);
        true
    }

    /// Removes `nick` from the table, returning its session if present.
    pub fn remove_session(&self, nick: &str) -> Option<Arc<Session<C>>> {
        let _g = OrderGuard::enter(LockRank::Sessions);
        self.sessions.lock().remove(nick)
    }

    pub fn get_session(&self, nick: &str) -> Option<Arc<Session<C>>> {
        let _g = OrderGuard::enter(LockRank::Sessions);
        self.sessions.lock().get(nick).cloned()
    }

    pub fn contains_session(&self, nick: &str) -> bool {
        let _g = OrderGuard::enter(LockRank::Sessions);
        self.sessions.lock().contains_key(nick)
    }

    /// All online nicks (anyone in the Sessions table, i.e. everyone
    /// past `AwaitNick`, per spec §3 Invariant 2).
    pub fn online_nicks(&self) -> Vec<String> {
        let _g = OrderGuard::enter(LockRank::Sessions);
        self.sessions.lock().keys().cloned().collect()
    }

    /// Nicks currently unavailable for a new invitation: mid-handshake
    /// or mid-game.
    pub fn busy_nicks(&self) -> Vec<String> {
        let _g = OrderGuard::enter(LockRank::Sessions);
        self.sessions
            .lock()
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s.state(),
                    SessionState::SentInvite | SessionState::ReceivedInvite | SessionState::InGame
                )
            })
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Sends `msg` to `nick` if they're currently online. Snapshots the
    /// session handle under the lock and sends after releasing it.
    pub async fn send_to(&self, nick: &str, msg: ServerMessage) {
        let session = self.get_session(nick);
        if let Some(session) = session {
            session.send(&msg).await;
        }
    }

    /// Sends `msg` to every online nick except `sender`.
    pub async fn broadcast_except(&self, sender: &str, msg: ServerMessage) {
        let targets: Vec<Arc<Session<C>>> = {
            let _g = OrderGuard::enter(LockRank::Sessions);
            self.sessions
                .lock()
                .iter()
                .filter(|(n, _)| n.as_str() != sender)
                .map(|(_, s)| Arc::clone(s))
                .collect()
        };
        for target in targets {
            target.send(&msg).await;
        }
    }

    // -----------------------------------------------------------------
    // Invitations
    // -----------------------------------------------------------------

    /// Records a pending invitation from `sender` to `receiver` in
    /// both directions (spec §4.7 LOBBY: "record invitation both
    /// directions"). Returns the generation assigned to this
    /// invitation, so a caller spawning an expiry timer can later tell
    /// whether the invitation it was spawned for is still the current
    /// one between these two nicks.
    pub fn add_invitation(&self, sender: &str, receiver: &str) -> u64 {
        let _g = OrderGuard::enter(LockRank::Invitations);
        let mut inv = self.invitations.lock();
        let generation = inv.next_generation;
        inv.next_generation += 1;
        inv.receiver_to_sender.insert(receiver.to_string(), (sender.to_string(), generation));
        inv.sender_to_receiver.insert(sender.to_string(), (receiver.to_string(), generation));
        generation
    }

    /// The sender of the pending invitation addressed to `receiver`.
    pub fn invitation_sender(&self, receiver: &str) -> Option<String> {
        let _g = OrderGuard::enter(LockRank::Invitations);
        self.invitations.lock().receiver_to_sender.get(receiver).map(|(s, _)| s.clone())
    }

    /// The receiver of the pending invitation sent by `sender`.
    pub fn invitation_receiver(&self, sender: &str) -> Option<String> {
        let _g = OrderGuard::enter(LockRank::Invitations);
        self.invitations.lock().sender_to_receiver.get(sender).map(|(r, _)| r.clone())
    }

    /// True if `sender`'s pending invitation to `receiver` is still the
    /// exact instance tagged `generation` — false if it was already
    /// resolved (accept/reject/cancel/teardown) or superseded by a new
    /// invitation between the same two nicks. Used by the invite-reply
    /// timer so a stale timer never expires a fresher invitation.
    pub fn invitation_is_current(&self, sender: &str, receiver: &str, generation: u64) -> bool {
        let _g = OrderGuard::enter(LockRank::Invitations);
        matches!(
            self.invitations.lock().sender_to_receiver.get(sender),
            Some((r, g)) if r == receiver && *g == generation
        )
    }

    /// Removes the invitation between `sender` and `receiver`
    /// (whichever direction is known), if any.
    pub fn remove_invitation(&self, sender: &str, receiver: &str) {
        let _g = OrderGuard::enter(LockRank::Invitations);
        let mut inv = self.invitations.lock();
        inv.receiver_to_sender.remove(receiver);
        inv.sender_to_receiver.remove(sender);
    }

    // -----------------------------------------------------------------
    // Game rooms
    // -----------------------------------------------------------------

    /// Creates a new room for `a` and `b`, inserting both nicks as
    /// keys pointing to the same room (spec §3 Invariant 3).
    pub fn create_room(&self, a: &str, b: &str) -> Arc<Mutex<GameRoom>> {
        let room = Arc::new(Mutex::new(GameRoom::new(a, b)));
        let _g = OrderGuard::enter(LockRank::GameRooms);
        let mut rooms = self.rooms.lock();
        rooms.insert(a.to_string(), Arc::clone(&room));
        rooms.insert(b.to_string(), Arc::clone(&room));
        room
    }

    pub fn room_for(&self, nick: &str) -> Option<Arc<Mutex<GameRoom>>> {
        let _g = OrderGuard::enter(LockRank::GameRooms);
        self.rooms.lock().get(nick).cloned()
    }

    /// Removes just `nick`'s entry, leaving the opponent's entry (and
    /// the room itself, kept alive by their `Arc`) intact. Used when a
    /// participant disconnects mid-game (spec §4.8 step 1-2).
    pub fn remove_room_entry(&self, nick: &str) -> Option<Arc<Mutex<GameRoom>>> {
        let _g = OrderGuard::enter(LockRank::GameRooms);
        self.rooms.lock().remove(nick)
    }

    /// Re-adds `nick` pointing at `room` (spec §4.8 step 4: rebinding
    /// the second entry on a successful reconnect).
    pub fn rebind_room_entry(&self, nick: &str, room: Arc<Mutex<GameRoom>>) {
        let _g = OrderGuard::enter(LockRank::GameRooms);
        self.rooms.lock().insert(nick.to_string(), room);
    }

    /// Removes both participants' entries, fully dissolving the room.
    pub fn dissolve_room(&self, a: &str, b: &str) {
        let _g = OrderGuard::enter(LockRank::GameRooms);
        let mut rooms = self.rooms.lock();
        rooms.remove(a);
        rooms.remove(b);
    }

    /// Spec §3 Invariant 6: a session is `InGame` iff its nick keys a
    /// game room or a reconnect waiter.
    pub fn is_in_game(&self, nick: &str) -> bool {
        let in_rooms = {
            let _g = OrderGuard::enter(LockRank::GameRooms);
            self.rooms.lock().contains_key(nick)
        };
        in_rooms || self.is_reconnect_waiter(nick)
    }

    // -----------------------------------------------------------------
    // Reconnect waiters
    // -----------------------------------------------------------------

    /// Opens a reconnect window for `disconnected`'s opponent `opponent`.
    /// Returns the generation assigned to this window, for the same
    /// stale-timer reason as [`Self::add_invitation`]'s return value.
    pub fn add_reconnect_waiter(&self, disconnected: &str, opponent: &str) -> u64 {
        let _g = OrderGuard::enter(LockRank::ReconnectWaiters);
        let mut waiters = self.reconnect.lock();
        let generation = waiters.next_generation;
        waiters.next_generation += 1;
        waiters.waiters.insert(disconnected.to_string(), (opponent.to_string(), generation));
        generation
    }

    pub fn reconnect_opponent(&self, disconnected: &str) -> Option<String> {
        let _g = OrderGuard::enter(LockRank::ReconnectWaiters);
        self.reconnect.lock().waiters.get(disconnected).map(|(o, _)| o.clone())
    }

    pub fn remove_reconnect_waiter(&self, disconnected: &str) -> Option<String> {
        let _g = OrderGuard::enter(LockRank::ReconnectWaiters);
        self.reconnect.lock().waiters.remove(disconnected).map(|(o, _)| o)
    }

    pub fn is_reconnect_waiter(&self, disconnected: &str) -> bool {
        let _g = OrderGuard::enter(LockRank::ReconnectWaiters);
        self.reconnect.lock().waiters.contains_key(disconnected)
    }

    /// True if `disconnected`'s reconnect window against `opponent` is
    /// still the exact instance tagged `generation` — false if it was
    /// already completed (reconnect) or dissolved, or superseded by a
    /// new window for the same nick. Used by the reconnect-grace timer
    /// so a stale timer never dissolves a fresher window.
    pub fn reconnect_waiter_is_current(&self, disconnected: &str, opponent: &str, generation: u64) -> bool {
        let _g = OrderGuard::enter(LockRank::ReconnectWaiters);
        matches!(
            self.reconnect.lock().waiters.get(disconnected),
            Some((o, g)) if o == opponent && *g == generation
        )
    }
}
