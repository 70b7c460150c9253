//! Clock abstractions used by quota epochs, grant expiry, and the sweeper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// Quota epochs are calendar years and grant expiry is a wall-clock deadline,
/// so the clock reports unix-epoch milliseconds rather than a monotonic
/// reading.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Settable clock for tests.
///
/// Cloning shares the underlying instant, so a test can hold one handle and
/// advance time for every component the clock was injected into.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock fixed at the given unix-epoch millisecond.
    pub fn at(millis: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(millis)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: std::time::Duration) {
        self.millis.fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn system_clock_is_past_2020() {
        let clock = SystemClock;
        // 2020-01-01T00:00:00Z
        assert!(clock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_advances_and_sets() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.now_millis(), 1_000);

        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);

        clock.set(500);
        assert_eq!(clock.now_millis(), 500);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::at(0);
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now_millis(), 250);
    }
}
