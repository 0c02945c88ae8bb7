//! Pluggable time source used by every time-dependent operation in this crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of time used by the rate limiter and request pacer.
///
/// Unlike the monotonic, process-start-anchored clocks used for simple
/// hot-path counters, window boundaries in this crate are aligned to the
/// UNIX epoch (`window_start = floor(t / duration) * duration`), so time
/// here is expressed in **fractional seconds since `UNIX_EPOCH`**, not an
/// arbitrary monotonic origin.
///
/// Every public operation on [`RateLimiter`](crate::RateLimiter) and
/// [`RequestPacer`](crate::RequestPacer) also accepts an explicit `now`
/// parameter; the `Clock` is only consulted by the `_now` convenience
/// methods and is otherwise a pure caller convenience, never a hidden
/// source of truth the engine depends on.
pub trait Clock: Send + Sync {
    /// Returns the current time, in seconds since `UNIX_EPOCH`.
    fn now(&self) -> f64;
}

/// Wall-clock [`Clock`] backed by [`SystemTime`].
///
/// Used as the default clock for every builder in this crate unless a
/// caller supplies its own (tests supply [`test_util::MockClock`] instead).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Deterministic clock test double, exposed behind the `test-util` feature
/// so downstream crates embedding this library can write equally
/// deterministic tests of their own, not just this crate's own suite.
#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::Clock;
    use std::sync::Mutex;

    /// A [`Clock`] that only moves when told to.
    ///
    /// Starts at `initial_secs` (seconds since the UNIX epoch) and advances
    /// solely through [`MockClock::advance`] / [`MockClock::set`], making
    /// window rollover and backoff escalation reproducible in tests.
    #[derive(Debug)]
    pub struct MockClock {
        current: Mutex<f64>,
    }

    impl MockClock {
        pub fn new(initial_secs: f64) -> Self {
            Self { current: Mutex::new(initial_secs) }
        }

        /// Moves the clock forward by `seconds`.
        pub fn advance(&self, seconds: f64) {
            *self.current.lock().unwrap() += seconds;
        }

        /// Jumps the clock to an absolute time.
        pub fn set(&self, secs: f64) {
            *self.current.lock().unwrap() = secs;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> f64 {
            *self.current.lock().unwrap()
        }
    }
}
