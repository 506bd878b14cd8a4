//! Debug-only enforcement of the registry's fixed lock acquisition
//! order (spec §4.6/§5): `Sessions -> GameRooms -> Invitations ->
//! ReconnectWaiters`. Compiled out entirely in release builds.

use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum LockRank {
    Sessions = 0,
    GameRooms = 1,
    Invitations = 2,
    ReconnectWaiters = 3,
}

thread_local! {
    static HELD_RANK: Cell<Option<LockRank>> = const { Cell::new(None) };
}

/// Records that the calling thread is about to acquire the table lock
/// of the given rank. Panics in debug builds if a lock of equal or
/// lower rank is already held (i.e. the caller is trying to acquire
/// locks out of the fixed order). Restores the previous rank on drop
/// so nested, properly-ordered acquisitions compose.
pub(crate) struct OrderGuard {
    previous: Option<LockRank>,
}

impl OrderGuard {
    pub(crate) fn enter(rank: LockRank) -> Self {
        let previous = HELD_RANK.with(|h| h.get());
        if cfg!(debug_assertions) {
            if let Some(held) = previous {
                assert!(
                    rank > held,
                    "lock order violation: tried to acquire {rank:?} while holding {held:?}"
                );
            }
        }
        HELD_RANK.with(|h| h.set(Some(rank)));
        Self { previous }
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        HELD_RANK.with(|h| h.set(self.previous));
    }
}
