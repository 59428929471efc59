//! Engine-wide counters.
//!
//! Every component bumps relaxed atomics on a shared [`EngineCounters`];
//! [`EngineCounters::snapshot`] turns them into a plain [`EngineStats`] for
//! reporting. Counters are monotonic for the life of the engine.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineCounters {
    pub(crate) published: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) enqueued: AtomicU64,
    pub(crate) conflated: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) stale_skipped: AtomicU64,
    pub(crate) callback_panics: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineCounters {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            published: self.published.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            conflated: self.conflated.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Rates accepted by `on_price`.
    pub published: u64,
    /// Dispatch requests processed by distributors.
    pub dispatched: u64,
    /// Tasks that became pending on a delivery channel.
    pub enqueued: u64,
    /// Enqueue attempts absorbed by an already pending task.
    pub conflated: u64,
    /// Subscriber callbacks invoked.
    pub delivered: u64,
    /// Drained tasks dropped because their version was already delivered.
    pub stale_skipped: u64,
    /// Subscriber callbacks that panicked.
    pub callback_panics: u64,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "published={} dispatched={} enqueued={} conflated={} delivered={} stale={} panics={}",
            self.published,
            self.dispatched,
            self.enqueued,
            self.conflated,
            self.delivered,
            self.stale_skipped,
            self.callback_panics,
        )
    }
}
