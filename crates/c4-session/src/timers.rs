//! Liveness timers: the nick-entry deadline and the rolling ping
//! watchdog, both built on the shared 1 Hz [`c4_tick::TickScheduler`]
//! rather than independent `sleep` loops (spec §9 REDESIGN FLAGS).

use std::sync::Arc;

use c4_tick::TickScheduler;
use c4_transport::Connection;

use crate::{Session, SessionState};

/// Seconds a freshly-accepted session has to set a nick before it is
/// killed (spec §4.5, §3 Invariant lifecycle).
pub const NICK_ENTRY_TIMEOUT_SECS: u32 = 10;

/// Consecutive missed-ping ticks before a session is considered dead
/// (spec §4.5).
pub const PING_TIMEOUT_SECS: u32 = 6;

/// Counts down [`NICK_ENTRY_TIMEOUT_SECS`] one-second ticks. Exits
/// early once the session leaves `AwaitNick` or stops being alive;
/// otherwise marks the session dead once the deadline is reached.
pub async fn run_nick_entry_timer<C: Connection>(session: Arc<Session<C>>) {
    let mut ticks = TickScheduler::with_rate(1);
    for _ in 0..NICK_ENTRY_TIMEOUT_SECS {
        if !session.is_alive() || session.state() != SessionState::AwaitNick {
            return;
        }
        ticks.wait_for_tick().await;
    }
    if session.is_alive() && session.state() == SessionState::AwaitNick {
        tracing::debug!(addr = %session.remote_addr(), "nick entry timed out");
        session.mark_dead();
    }
}

/// Rolling keepalive watchdog (spec §4.5): each tick, if a `PING`
/// arrived since the previous tick the miss counter resets; otherwise
/// it increments, and at [`PING_TIMEOUT_SECS`] consecutive misses the
/// session is marked dead.
pub async fn run_ping_timer<C: Connection>(session: Arc<Session<C>>) {
    let mut ticks = TickScheduler::with_rate(1);
    let mut misses = 0u32;
    loop {
        ticks.wait_for_tick().await;
        if !session.is_alive() || session.state() == SessionState::Terminating {
            return;
        }
        if session.take_ping_seen() {
            misses = 0;
        } else {
            misses += 1;
            if misses >= PING_TIMEOUT_SECS {
                tracing::debug!(addr = %session.remote_addr(), "ping timed out");
                session.mark_dead();
                return;
            }
        }
    }
}
