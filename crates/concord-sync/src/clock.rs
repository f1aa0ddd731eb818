//! Time source for the engine.
//!
//! Every timestamp the engine writes (request times, sync times, lock
//! expiry) comes from a [`Clock`], so tests can drive time by hand.

use chrono::Utc;
use concord_core::Millis;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> Millis;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests and simulations.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        ManualClock {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves time forward and returns the new time.
    pub fn advance(&self, by: Millis) -> Millis {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();

        assert_eq!(clock.advance(500), 1_500);
        assert_eq!(other.now_millis(), 1_500);

        other.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_system_clock_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
