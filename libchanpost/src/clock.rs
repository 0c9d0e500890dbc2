//! Clock abstraction so scheduling logic can run against fake time in tests.

use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    /// Current Unix timestamp in seconds.
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock. Available outside tests so integration tests
/// can drive scheduler cycles deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now(), 1000);

        clock.advance(60);
        assert_eq!(clock.now(), 1060);

        clock.set(5000);
        assert_eq!(clock.now(), 5000);
    }

    #[test]
    fn test_system_clock_is_plausible() {
        let now = SystemClock.now();
        assert!(now > 1_600_000_000);
    }
}
