//! Wall-clock and randomness sources.
//!
//! Both tiers read time and draw random numbers through these traits so tests
//! can pin the sale window and the throttles to known values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Abstraction over the system clock for dependency injection.
///
/// The default implementation ([`SystemClock`]) delegates to
/// `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now_millis(&self) -> u64;

    /// Returns the current time as whole seconds since Unix epoch.
    #[allow(clippy::cast_possible_wrap)]
    fn now_secs(&self) -> i64 {
        (self.now_millis() / 1000) as i64
    }
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Creates a clock positioned at `secs` epoch seconds.
    #[must_use]
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs * 1000)
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Source of uniform draws in `[0.0, 1.0)` for the probabilistic throttles.
pub trait Dice: Send + Sync {
    fn roll(&self) -> f64;
}

/// Draws from the thread-local RNG.
#[derive(Debug, Clone, Default)]
pub struct ThreadDice;

impl Dice for ThreadDice {
    fn roll(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Always returns the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedDice(pub f64);

impl Dice for FixedDice {
    fn roll(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_secs(10);
        assert_eq!(clock.now_millis(), 10_000);
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now_millis(), 11_500);
        assert_eq!(clock.now_secs(), 11);
        clock.set_millis(0);
        assert_eq!(clock.now_secs(), 0);
    }

    #[test]
    fn thread_dice_stays_in_unit_interval() {
        let dice = ThreadDice;
        for _ in 0..1_000 {
            let v = dice.roll();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
