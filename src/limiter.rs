//! The multi-window, consecutive-failure-aware rate limiter.
//!
//! `RateLimiter` generalizes the teacher crate's single-window,
//! `u64`-keyed algorithms (fixed window, sliding window, token bucket,
//! GCRA) into one generic-key limiter that layers several fixed windows
//! and gates admission behind an exponential backoff once consecutive
//! failures have been reported.
//!
//! ## Algorithm
//!
//! Every operation is driven by a caller-supplied `now` rather than an
//! internally-read clock, so window boundaries are fully reproducible in
//! tests. A key's state is lazily synthesized on first access and rolled
//! forward to `now` on every access: any window whose `window_start` has
//! passed is reset to zero attempts, while `consecutive_failures` — kept
//! as a single per-key scalar rather than replicated per window — survives
//! rollover untouched.
//!
//! `checkLimit` never mutates `attempts`; only `recordAttempt` does, and
//! the crate-internal `check_then_record` (used by [`crate::RequestPacer`])
//! performs both under one lock acquisition so pacer-admitted requests
//! cannot race a concurrent caller between the check and the increment.

use std::hash::Hash;
use std::sync::Arc;

use crate::bounded_map::BoundedMap;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::window::{KeyState, WindowSpec};

#[cfg(feature = "tracing")]
use tracing::trace;

/// One week, in seconds — the saturation ceiling for the exponential
/// backoff formula. Without a ceiling, `multiplier.powi(failures)` for a
/// sustained attacker would overflow to infinity; the spec calls for
/// saturating at "one finite large value" instead.
const MAX_BACKOFF_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// A sink invoked with `(key, decision)` after every `checkLimit`.
///
/// Modeled as a boxed trait-object closure the way the teacher crate's
/// `volga` error handling wraps user callbacks in `Arc<dyn Trait + Send + Sync>`.
/// Invoked outside the limiter's internal lock, so it may safely call back
/// into the limiter from a different logical call chain (but re-entering
/// on the same chain that produced the decision being reported will
/// deadlock on the map's mutex).
pub type MetricsCallback<K> = Arc<dyn Fn(&K, &Decision) + Send + Sync>;

/// The outcome of a `checkLimit` (or `scheduleRequest`-internal) decision.
///
/// `current_attempts` and `remaining_attempts` always describe the
/// *primary* (shortest) window, regardless of which window — if any —
/// caused a block. `next_allowed_attempt` and `backoff_interval` are only
/// populated when the decision is blocked.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Attempts recorded in the primary window so far.
    pub current_attempts: u32,
    /// Attempts still available in the primary window (`>= 0`).
    pub remaining_attempts: u32,
    /// Instant (seconds since the UNIX epoch) at which the window that
    /// caused the block rolls over. Present iff blocked.
    pub next_allowed_attempt: Option<f64>,
    /// Additive backoff delay in seconds. Present iff blocked and
    /// consecutive failures are non-zero.
    pub backoff_interval: Option<f64>,
}

/// A per-key, multi-window fixed-window rate limiter with consecutive-
/// failure backoff.
///
/// Construct with [`RateLimiterBuilder`]. Generic over any key type with
/// equality, hashing, and safe cross-thread sharing, per the spec's data
/// model — unlike the teacher crate's algorithms, which are fixed to
/// `u64` partition keys.
pub struct RateLimiter<K> {
    windows: Vec<WindowSpec>,
    max_duration_secs: u64,
    backoff_multiplier: f64,
    metrics_callback: Option<MetricsCallback<K>>,
    state: BoundedMap<K, KeyState>,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> RateLimiter<K> {
    /// Starts a new builder.
    pub fn builder() -> RateLimiterBuilder<K> {
        RateLimiterBuilder::default()
    }

    /// Checks whether a request for `key` is allowed at `t`, without
    /// consuming any budget. Read-mostly; repeated calls without an
    /// intervening `record_attempt`/`record_*` return identical results
    /// (module window rollover as `t` advances).
    pub fn check_limit(&self, key: &K, t: f64) -> Decision {
        self.decide(key, t, false)
    }

    /// Convenience form of [`RateLimiter::check_limit`] using this
    /// limiter's configured [`Clock`].
    pub fn check_limit_now(&self, key: &K) -> Decision {
        let now = self.clock.now();
        self.check_limit(key, now)
    }

    /// Increments `attempts` in every configured window for `key`.
    ///
    /// One attempt consumes budget against all layered windows
    /// simultaneously, regardless of what `check_limit` most recently
    /// reported — callers that want check-then-record atomicity should
    /// compose through [`crate::RequestPacer::schedule_request`] instead
    /// of calling `check_limit` followed by `record_attempt` themselves.
    pub fn record_attempt(&self, key: &K, t: f64) {
        let now = to_epoch_secs(t);
        self.state.with_entry(
            key,
            || KeyState::fresh(&self.windows, now),
            |state| {
                state.roll(&self.windows, now);
                for window in state.windows.iter_mut() {
                    window.attempts += 1;
                }
                state.last_touched = now;
            },
        );
    }

    /// Convenience form of [`RateLimiter::record_attempt`] using this
    /// limiter's configured [`Clock`].
    pub fn record_attempt_now(&self, key: &K) {
        let now = self.clock.now();
        self.record_attempt(key, now);
    }

    /// Increments `key`'s consecutive-failure counter. Silent no-op if
    /// `key` has no recorded state yet.
    pub fn record_failure(&self, key: &K) {
        self.state.update_if_present(key, |state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        });
    }

    /// Resets `key`'s consecutive-failure counter to zero. Silent no-op
    /// if `key` has no recorded state yet.
    pub fn record_success(&self, key: &K) {
        self.state.update_if_present(key, |state| {
            state.consecutive_failures = 0;
        });
    }

    /// Removes `key`'s state entirely.
    pub fn reset(&self, key: &K) {
        self.state.remove(key);
    }

    /// Number of keys currently tracked (bounded by `max_cache_size`).
    pub fn tracked_keys(&self) -> usize {
        self.state.len()
    }

    /// Configured windows, ascending by duration.
    pub fn windows(&self) -> &[WindowSpec] {
        &self.windows
    }

    /// Performs `check_limit` and, if allowed, `record_attempt` under a
    /// single acquisition of the per-key lock. Crate-internal: this is
    /// the atomic primitive `RequestPacer::schedule_request` is built on;
    /// it is deliberately not exposed publicly since the spec only
    /// promises this atomicity through the pacer.
    pub(crate) fn check_then_record(&self, key: &K, t: f64) -> Decision {
        self.decide(key, t, true)
    }

    fn decide(&self, key: &K, t: f64, increment_on_allow: bool) -> Decision {
        let now = to_epoch_secs(t);
        let windows = &self.windows;
        let backoff_multiplier = self.backoff_multiplier;
        let max_duration_secs = self.max_duration_secs;

        let decision = self.state.with_entry(
            key,
            || KeyState::fresh(windows, now),
            |state| {
                // Lazy staleness eviction: regenerate (rather than merely
                // roll) entries that haven't been touched within the
                // longest configured window, mirroring the teacher's
                // `FixedWindowRateLimiter::check` lazy eviction block —
                // folded into this same `with_entry` critical section so
                // the staleness check and the decision it feeds are
                // atomic with respect to concurrent callers.
                if now.saturating_sub(state.last_touched) > max_duration_secs {
                    *state = KeyState::fresh(windows, now);
                }

                state.roll(windows, now);

                let primary = windows[0];
                let primary_window = state.windows[0];
                let failures = state.consecutive_failures;

                let current_attempts = primary_window.attempts;
                let remaining_attempts =
                    primary.max_attempts().saturating_sub(current_attempts);

                let mut decision = if failures > 0
                    && primary_window.attempts >= primary.max_attempts()
                {
                    Decision {
                        allowed: false,
                        current_attempts,
                        remaining_attempts,
                        next_allowed_attempt: Some(
                            (primary_window.window_start + primary.duration_secs()) as f64,
                        ),
                        backoff_interval: Some(backoff_seconds(
                            backoff_multiplier,
                            failures,
                            primary.duration_secs() as f64,
                        )),
                    }
                } else if let Some((spec, win)) = windows
                    .iter()
                    .zip(state.windows.iter())
                    .find(|(spec, win)| win.attempts >= spec.max_attempts())
                {
                    Decision {
                        allowed: false,
                        current_attempts,
                        remaining_attempts,
                        next_allowed_attempt: Some(
                            (win.window_start + spec.duration_secs()) as f64,
                        ),
                        backoff_interval: if failures > 0 {
                            Some(backoff_seconds(
                                backoff_multiplier,
                                failures,
                                primary.duration_secs() as f64,
                            ))
                        } else {
                            None
                        },
                    }
                } else {
                    Decision {
                        allowed: true,
                        current_attempts,
                        remaining_attempts,
                        next_allowed_attempt: None,
                        backoff_interval: None,
                    }
                };

                if increment_on_allow && decision.allowed {
                    for window in state.windows.iter_mut() {
                        window.attempts += 1;
                    }
                    state.last_touched = now;
                    decision.current_attempts = state.windows[0].attempts;
                    decision.remaining_attempts =
                        primary.max_attempts().saturating_sub(decision.current_attempts);
                }

                decision
            },
        );

        #[cfg(feature = "tracing")]
        if !decision.allowed {
            trace!(blocked = true, backoff = ?decision.backoff_interval, "rate limit decision");
        }

        if let Some(callback) = &self.metrics_callback {
            callback(key, &decision);
        }

        decision
    }
}

#[inline]
fn to_epoch_secs(t: f64) -> u64 {
    t.max(0.0) as u64
}

fn backoff_seconds(multiplier: f64, failures: u32, primary_duration_secs: f64) -> f64 {
    let factor = multiplier.powi(failures as i32);
    if !factor.is_finite() {
        return MAX_BACKOFF_SECS;
    }
    (factor * primary_duration_secs).min(MAX_BACKOFF_SECS)
}

/// Builder for [`RateLimiter`].
///
/// Mirrors the teacher crate's `new` vs. `with_time_source` constructor
/// pair, generalized into a fluent builder since this limiter has
/// considerably more configuration surface than a single-algorithm,
/// single-window limiter.
pub struct RateLimiterBuilder<K> {
    windows: Vec<(f64, u32)>,
    max_cache_size: usize,
    backoff_multiplier: f64,
    metrics_callback: Option<MetricsCallback<K>>,
    clock: Arc<dyn Clock>,
}

impl<K> Default for RateLimiterBuilder<K> {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            max_cache_size: 10_000,
            backoff_multiplier: 2.0,
            metrics_callback: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> RateLimiterBuilder<K> {
    /// Adds a window of `duration_secs` seconds allowing `max_attempts`
    /// attempts. Order does not matter — windows are sorted ascending by
    /// duration at `build()`.
    pub fn window(mut self, duration_secs: f64, max_attempts: u32) -> Self {
        self.windows.push((duration_secs, max_attempts));
        self
    }

    /// Sets the `BoundedMap` capacity backing this limiter. Default 10 000.
    pub fn max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    /// Sets the base of the exponential backoff. Must be `> 1.0`. Default 2.0.
    pub fn backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Registers a best-effort metrics sink invoked after every decision.
    pub fn metrics_callback(
        mut self,
        callback: impl Fn(&K, &Decision) + Send + Sync + 'static,
    ) -> Self {
        self.metrics_callback = Some(Arc::new(callback));
        self
    }

    /// Overrides the default [`SystemClock`], primarily for tests.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validates configuration and builds the limiter.
    pub fn build(self) -> Result<RateLimiter<K>, ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::InvalidWindows);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier);
        }

        let mut specs = Vec::with_capacity(self.windows.len());
        for (duration_secs, max_attempts) in self.windows {
            specs.push(WindowSpec::new(duration_secs, max_attempts)?);
        }
        specs.sort_by_key(|s| s.duration_secs());

        let max_duration_secs = specs.iter().map(|s| s.duration_secs()).max().unwrap();

        Ok(RateLimiter {
            windows: specs,
            max_duration_secs,
            backoff_multiplier: self.backoff_multiplier,
            metrics_callback: self.metrics_callback,
            state: BoundedMap::new(self.max_cache_size)?,
            clock: self.clock,
        })
    }
}
