// ── Failure backoff ──
//
// Three-tier delay schedule keyed by consecutive failure count.
// `Backoff` is a pure function of (count, last failure); `StatefulBackoff`
// owns the counter and timestamp for callers that retry in a loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delay tiers: `initial` for the first `initial_failures` failures,
/// `repeated` for the next `repeated_failures`, `final_delay` after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial: Duration,
    pub repeated: Duration,
    pub final_delay: Duration,
    pub initial_failures: u32,
    pub repeated_failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            repeated: Duration::from_secs(15 * 60),
            final_delay: Duration::from_secs(24 * 60 * 60),
            initial_failures: 3,
            repeated_failures: 3,
        }
    }
}

impl Backoff {
    pub fn new(
        initial: Duration,
        repeated: Duration,
        final_delay: Duration,
        initial_failures: u32,
        repeated_failures: u32,
    ) -> Self {
        Self {
            initial,
            repeated,
            final_delay,
            initial_failures,
            repeated_failures,
        }
    }

    /// Delay that applies after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures <= self.initial_failures {
            self.initial
        } else if failures - self.initial_failures <= self.repeated_failures {
            self.repeated
        } else {
            self.final_delay
        }
    }

    /// Whether the caller should still hold off, measured against `now`.
    ///
    /// Without a recorded failure there is nothing to back off from.
    pub fn should_back_off_at(
        &self,
        last_failure: Option<DateTime<Utc>>,
        failures: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(last) = last_failure else {
            return false;
        };
        let Ok(delay) = chrono::Duration::from_std(self.delay(failures)) else {
            return true;
        };
        last + delay > now
    }

    pub fn should_back_off(&self, last_failure: Option<DateTime<Utc>>, failures: u32) -> bool {
        self.should_back_off_at(last_failure, failures, Utc::now())
    }
}

/// A [`Backoff`] with its own failure counter and last-failure time.
#[derive(Debug, Default)]
pub struct StatefulBackoff {
    backoff: Backoff,
    failures: AtomicU32,
    last_failure: Mutex<Option<DateTime<Utc>>>,
}

impl StatefulBackoff {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            failures: AtomicU32::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next(&self) -> Duration {
        let failures = self.fail();
        self.backoff.delay(failures)
    }

    /// Record a failure; returns the new failure count.
    pub fn fail(&self) -> u32 {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn should_back_off(&self) -> bool {
        self.backoff
            .should_back_off(self.last_failure(), self.failures())
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> Backoff {
        Backoff::new(
            Duration::from_secs(5),
            Duration::from_secs(15 * 60),
            Duration::from_secs(24 * 60 * 60),
            3,
            3,
        )
    }

    #[test]
    fn delay_tiers() {
        let b = tiers();
        assert_eq!(b.delay(0), Duration::from_secs(5));
        assert_eq!(b.delay(1), Duration::from_secs(5));
        assert_eq!(b.delay(3), Duration::from_secs(5));
        assert_eq!(b.delay(4), Duration::from_secs(15 * 60));
        assert_eq!(b.delay(6), Duration::from_secs(15 * 60));
        assert_eq!(b.delay(7), Duration::from_secs(24 * 60 * 60));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn delay_never_decreases() {
        let b = tiers();
        let delays: Vec<Duration> = (0..20).map(|n| b.delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn should_back_off_window() {
        let b = tiers();
        let now = Utc::now();

        assert!(b.should_back_off_at(Some(now - chrono::Duration::seconds(3)), 1, now));
        assert!(!b.should_back_off_at(Some(now - chrono::Duration::seconds(8)), 1, now));
        assert!(!b.should_back_off_at(None, 1, now));
        assert!(!b.should_back_off_at(None, 100, now));
    }

    #[test]
    fn stateful_counts_and_resets() {
        let s = StatefulBackoff::new(tiers());
        assert!(!s.should_back_off());

        for _ in 0..3 {
            assert_eq!(s.next(), Duration::from_secs(5));
        }
        assert_eq!(s.next(), Duration::from_secs(15 * 60));
        assert_eq!(s.failures(), 4);
        assert!(s.should_back_off());

        s.reset();
        assert_eq!(s.failures(), 0);
        assert!(s.last_failure().is_none());
        assert!(!s.should_back_off());
    }
}
