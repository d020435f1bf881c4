//! Lock-free per-rule alarm bookkeeping

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// `last_dispatch` value before the first dispatch
const NEVER: u64 = u64::MAX;

/// Result of trying to open a dispatch window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the dispatch for the current window
    Won,
    /// Still inside the cooldown of the previous dispatch
    CoolingDown,
    /// Another caller claimed the window first
    Lost,
}

/// Counter and cooldown stamp of one (pool, rule kind) pair
///
/// At most one caller can win a claim per cooldown window: the claim is a
/// compare-and-swap of `last_dispatch` from the value the caller observed.
#[derive(Debug)]
pub struct AlarmState {
    count: AtomicU64,
    last_dispatch: AtomicU64,
    dispatched: AtomicU64,
}

impl Default for AlarmState {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmState {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            last_dispatch: AtomicU64::new(NEVER),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Count one event, returning the new count
    pub fn record(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Events counted since the last winning claim
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Milliseconds of the last winning claim, if any
    pub fn last_dispatch(&self) -> Option<u64> {
        match self.last_dispatch.load(Ordering::Acquire) {
            NEVER => None,
            at => Some(at),
        }
    }

    /// Number of winning claims so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }

    /// Try to open a dispatch window at `now` (engine clock millis)
    ///
    /// The winner resets the event count.
    pub fn try_claim(&self, now: u64, cooldown: Duration) -> Claim {
        let observed = self.last_dispatch.load(Ordering::Acquire);
        if observed != NEVER && now.saturating_sub(observed) < cooldown.as_millis() as u64 {
            return Claim::CoolingDown;
        }

        match self.last_dispatch.compare_exchange(
            observed,
            now,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.count.store(0, Ordering::Release);
                self.dispatched.fetch_add(1, Ordering::AcqRel);
                Claim::Won
            }
            Err(_) => Claim::Lost,
        }
    }
}
