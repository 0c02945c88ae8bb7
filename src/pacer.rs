//! Per-key request pacing: spacing scheduled times to a target rate,
//! optionally composed with a [`RateLimiter`] for a hard cap.
//!
//! Grounded on the teacher's `TokenBucketRateLimiter`: its constructor
//! precomputes a per-second scaled refill rate once rather than
//! recomputing it on every call. `RequestPacer` does the same with
//! `min_spacing = 1 / target_rate`.

use std::hash::Hash;
use std::sync::Arc;

use crate::bounded_map::BoundedMap;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::limiter::{Decision, RateLimiter};

/// Per-key pacer bookkeeping.
#[derive(Debug, Clone, Copy)]
struct PacerState {
    last_scheduled_time: Option<f64>,
    request_count: u64,
}

impl PacerState {
    fn fresh() -> Self {
        Self { last_scheduled_time: None, request_count: 0 }
    }
}

/// The outcome of a `scheduleRequest`.
#[derive(Debug, Clone)]
pub struct Schedule<K> {
    /// `false` iff the composed rate limiter denied the request.
    pub allowed: bool,
    /// The time (seconds since the UNIX epoch) the caller should treat
    /// this request as scheduled for.
    pub scheduled_time: f64,
    /// `max(0, scheduled_time - t)`.
    pub delay: f64,
    /// The composed rate limiter's decision, if a limiter is configured.
    pub rate_limit_decision: Option<Decision>,
    _key: std::marker::PhantomData<K>,
}

/// A per-key scheduler that spaces scheduled request times to enforce
/// `1 / target_rate`, optionally consulting a composed [`RateLimiter`]
/// for a hard cap before pacing.
///
/// Construct with [`RequestPacer::builder`].
pub struct RequestPacer<K> {
    min_spacing: f64,
    allow_catch_up: bool,
    rate_limiter: Option<Arc<RateLimiter<K>>>,
    state: BoundedMap<K, PacerState>,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> RequestPacer<K> {
    /// Starts a new builder.
    pub fn builder() -> RequestPacerBuilder<K> {
        RequestPacerBuilder::default()
    }

    /// Computes the next scheduled time for `key` at `t`.
    ///
    /// If a rate limiter is configured, its `check_limit`/`record_attempt`
    /// pair runs under the limiter's own serialization via
    /// [`RateLimiter::check_then_record`] — a deny short-circuits pacing
    /// entirely with `scheduled_time = t, delay = 0`.
    pub fn schedule_request(&self, key: &K, t: f64) -> Schedule<K> {
        if let Some(limiter) = &self.rate_limiter {
            let decision = limiter.check_then_record(key, t);
            if !decision.allowed {
                return Schedule {
                    allowed: false,
                    scheduled_time: t,
                    delay: 0.0,
                    rate_limit_decision: Some(decision),
                    _key: std::marker::PhantomData,
                };
            }

            let scheduled_time = self.next_scheduled_time(key, t);
            return Schedule {
                allowed: true,
                scheduled_time,
                delay: (scheduled_time - t).max(0.0),
                rate_limit_decision: Some(decision),
                _key: std::marker::PhantomData,
            };
        }

        let scheduled_time = self.next_scheduled_time(key, t);
        Schedule {
            allowed: true,
            scheduled_time,
            delay: (scheduled_time - t).max(0.0),
            rate_limit_decision: None,
            _key: std::marker::PhantomData,
        }
    }

    /// Convenience form of [`RequestPacer::schedule_request`] using this
    /// pacer's configured [`Clock`].
    pub fn schedule_request_now(&self, key: &K) -> Schedule<K> {
        let now = self.clock.now();
        self.schedule_request(key, now)
    }

    /// Removes `key`'s pacer state. Does not touch a composed rate
    /// limiter's state — call its `reset` separately if desired.
    pub fn reset(&self, key: &K) {
        self.state.remove(key);
    }

    /// Removes every key's pacer state.
    pub fn reset_all(&self) {
        self.state.retain(|_, _| false);
    }

    /// Number of requests scheduled for `key` so far, or 0 if untouched.
    pub fn get_request_count(&self, key: &K) -> u64 {
        self.state.get(key).map(|s| s.request_count).unwrap_or(0)
    }

    fn next_scheduled_time(&self, key: &K, t: f64) -> f64 {
        self.state.with_entry(
            key,
            PacerState::fresh,
            |state| {
                let scheduled_time = match state.last_scheduled_time {
                    None => t,
                    Some(last) if self.allow_catch_up => {
                        (t).max(last + self.min_spacing)
                    }
                    Some(last) => last + self.min_spacing,
                };
                state.last_scheduled_time = Some(scheduled_time);
                state.request_count += 1;
                scheduled_time
            },
        )
    }
}

/// Builder for [`RequestPacer`].
pub struct RequestPacerBuilder<K> {
    target_rate: Option<f64>,
    allow_catch_up: bool,
    max_cache_size: usize,
    rate_limiter: Option<Arc<RateLimiter<K>>>,
    clock: Arc<dyn Clock>,
}

impl<K> Default for RequestPacerBuilder<K> {
    fn default() -> Self {
        Self {
            target_rate: None,
            allow_catch_up: false,
            max_cache_size: 10_000,
            rate_limiter: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> RequestPacerBuilder<K> {
    /// Sets the target rate in requests per second. Required, must be
    /// positive and finite.
    pub fn target_rate(mut self, target_rate: f64) -> Self {
        self.target_rate = Some(target_rate);
        self
    }

    /// Enables catch-up mode: scheduled times snap forward to the
    /// current time when the caller is behind schedule. Default `false`
    /// (strict mode).
    pub fn allow_catch_up(mut self, allow_catch_up: bool) -> Self {
        self.allow_catch_up = allow_catch_up;
        self
    }

    /// Sets the `BoundedMap` capacity backing this pacer's own state.
    /// Default 10 000. Independent of any composed `RateLimiter`'s cache.
    pub fn max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    /// Composes a [`RateLimiter`] for a hard cap consulted before pacing.
    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter<K>>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Overrides the default [`SystemClock`], primarily for tests.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validates configuration and builds the pacer.
    pub fn build(self) -> Result<RequestPacer<K>, ConfigError> {
        let target_rate = self.target_rate.ok_or(ConfigError::InvalidTargetRate)?;
        if !target_rate.is_finite() || target_rate <= 0.0 {
            return Err(ConfigError::InvalidTargetRate);
        }

        Ok(RequestPacer {
            min_spacing: 1.0 / target_rate,
            allow_catch_up: self.allow_catch_up,
            rate_limiter: self.rate_limiter,
            state: BoundedMap::new(self.max_cache_size)?,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_missing_target_rate() {
        let err = RequestPacer::<&str>::builder().build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidTargetRate);
    }

    #[test]
    fn construction_rejects_non_positive_target_rate() {
        let err = RequestPacer::<&str>::builder()
            .target_rate(0.0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidTargetRate);

        let err = RequestPacer::<&str>::builder()
            .target_rate(-1.0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidTargetRate);
    }

    /// S6: pacer strict mode, fixed spacing from the first call's instant.
    #[test]
    fn s6_pacer_strict() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .build()
            .unwrap();

        let delays: Vec<f64> = (0..4)
            .map(|_| pacer.schedule_request(&"k", 1000.0).delay)
            .collect();

        for (i, delay) in delays.iter().enumerate() {
            assert!((delay - i as f64 * 0.1).abs() < 1e-3, "delay[{i}] = {delay}");
        }
    }

    /// S7: pacer catch-up mode snaps forward when the caller is behind.
    #[test]
    fn s7_pacer_catch_up() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(5.0)
            .allow_catch_up(true)
            .build()
            .unwrap();

        let first = pacer.schedule_request(&"k", 1000.0);
        assert_eq!(first.scheduled_time, 1000.0);

        let second = pacer.schedule_request(&"k", 1001.0);
        assert_eq!(second.scheduled_time, 1001.0);
        assert_eq!(second.delay, 0.0);
    }

    #[test]
    fn strict_mode_permits_scheduled_times_in_the_past() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(1.0)
            .build()
            .unwrap();

        let first = pacer.schedule_request(&"k", 0.0);
        assert_eq!(first.scheduled_time, 0.0);

        // Caller is much faster than the target rate — strict mode still
        // queues deterministically instead of snapping to `t`.
        let second = pacer.schedule_request(&"k", 0.01);
        assert_eq!(second.scheduled_time, 1.0);
        assert!((second.delay - 0.99).abs() < 1e-9);
    }

    #[test]
    fn request_count_increments_per_schedule() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .build()
            .unwrap();

        assert_eq!(pacer.get_request_count(&"k"), 0);
        pacer.schedule_request(&"k", 0.0);
        pacer.schedule_request(&"k", 0.0);
        assert_eq!(pacer.get_request_count(&"k"), 2);
    }

    #[test]
    fn reset_clears_pacer_state_only() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .build()
            .unwrap();

        pacer.schedule_request(&"k", 0.0);
        pacer.reset(&"k");
        assert_eq!(pacer.get_request_count(&"k"), 0);

        let after_reset = pacer.schedule_request(&"k", 5.0);
        assert_eq!(after_reset.scheduled_time, 5.0);
    }

    #[test]
    fn reset_all_clears_every_key() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .build()
            .unwrap();

        pacer.schedule_request(&"a", 0.0);
        pacer.schedule_request(&"b", 0.0);
        pacer.reset_all();

        assert_eq!(pacer.get_request_count(&"a"), 0);
        assert_eq!(pacer.get_request_count(&"b"), 0);
    }

    #[test]
    fn composed_rate_limiter_denies_before_pacing() {
        let limiter = Arc::new(RateLimiter::builder().window(60.0, 1).build().unwrap());
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .rate_limiter(limiter)
            .build()
            .unwrap();

        let first = pacer.schedule_request(&"k", 0.0);
        assert!(first.allowed);

        let second = pacer.schedule_request(&"k", 0.0);
        assert!(!second.allowed);
        assert_eq!(second.scheduled_time, 0.0);
        assert_eq!(second.delay, 0.0);
        assert!(second.rate_limit_decision.is_some());
    }

    #[test]
    fn composed_rate_limiter_paces_admitted_requests() {
        let limiter = Arc::new(RateLimiter::builder().window(60.0, 100).build().unwrap());
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .rate_limiter(limiter)
            .build()
            .unwrap();

        let first = pacer.schedule_request(&"k", 1000.0);
        let second = pacer.schedule_request(&"k", 1000.0);
        assert!(first.allowed && second.allowed);
        assert!((second.scheduled_time - first.scheduled_time - 0.1).abs() < 1e-9);
    }
}
