//! A thin composition façade over an optional [`RateLimiter`] and an
//! optional [`RequestPacer`], presenting one `acquire`/record interface.
//!
//! Grounded on the teacher's `GlobalRateLimiter`
//! (`volga/src/rate_limiting.rs`), which holds
//! `Option<FixedWindowRateLimiter>` alongside `Option<SlidingWindowRateLimiter>`
//! and sequences whichever are configured without re-implementing either
//! algorithm. `ThrottledClient` generalizes that two-optional-field shape
//! to a limiter and a pacer.

use std::hash::Hash;
use std::sync::Arc;

use crate::limiter::{Decision, RateLimiter};
use crate::pacer::{RequestPacer, Schedule};

/// The outcome of an `acquire` call.
#[derive(Debug, Clone)]
pub struct Acquisition<K> {
    /// Whether the caller may proceed (immediately, or after `delay`).
    pub can_proceed: bool,
    /// Seconds the caller should wait before proceeding, when `can_proceed`
    /// is true and a pacer is configured. Zero otherwise.
    pub delay: f64,
    /// Seconds until the caller may retry, when `can_proceed` is false.
    /// `backoff_interval` if present, else `next_allowed_attempt - t`.
    pub retry_after: Option<f64>,
    /// The rate limiter's decision, if a limiter is configured.
    pub rate_limit_decision: Option<Decision>,
    /// The pacer's schedule, if a pacer is configured and the limiter
    /// (if any) allowed the request.
    pub schedule: Option<Schedule<K>>,
}

/// Combines an optional [`RateLimiter`] and an optional [`RequestPacer`]
/// behind one `acquire`/`record_success`/`record_failure`/`reset` surface.
///
/// Construct with [`ThrottledClient::builder`]. Both components are
/// optional; a client with neither always allows immediately.
pub struct ThrottledClient<K> {
    rate_limiter: Option<Arc<RateLimiter<K>>>,
    pacer: Option<RequestPacer<K>>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> ThrottledClient<K> {
    /// Starts a new builder.
    pub fn builder() -> ThrottledClientBuilder<K> {
        ThrottledClientBuilder::default()
    }

    /// Checks the composed rate limiter (if any), then delegates pacing
    /// to the composed pacer (if any).
    ///
    /// - No limiter, no pacer: always allowed, immediate.
    /// - Limiter only: mirrors `checkLimit` + `recordAttempt` on allow.
    /// - Pacer only: delegates entirely to `schedule_request` (which may
    ///   itself consult a limiter the pacer was independently composed
    ///   with).
    /// - Both: this client's own limiter gates first; on allow, the
    ///   pacer paces the now-admitted request without re-checking a
    ///   limiter of its own.
    pub fn acquire(&self, key: &K, t: f64) -> Acquisition<K> {
        if let Some(limiter) = &self.rate_limiter {
            let decision = limiter.check_limit(key, t);
            if !decision.allowed {
                let retry_after = retry_after_from(&decision, t);
                return Acquisition {
                    can_proceed: false,
                    delay: 0.0,
                    retry_after: Some(retry_after),
                    rate_limit_decision: Some(decision),
                    schedule: None,
                };
            }
            limiter.record_attempt(key, t);

            if let Some(pacer) = &self.pacer {
                let schedule = pacer.schedule_request(key, t);
                return Acquisition {
                    can_proceed: true,
                    delay: schedule.delay,
                    retry_after: None,
                    rate_limit_decision: Some(decision),
                    schedule: Some(schedule),
                };
            }

            return Acquisition {
                can_proceed: true,
                delay: 0.0,
                retry_after: None,
                rate_limit_decision: Some(decision),
                schedule: None,
            };
        }

        if let Some(pacer) = &self.pacer {
            let schedule = pacer.schedule_request(key, t);
            if !schedule.allowed {
                let retry_after = schedule
                    .rate_limit_decision
                    .as_ref()
                    .map(|d| retry_after_from(d, t));
                return Acquisition {
                    can_proceed: false,
                    delay: 0.0,
                    retry_after,
                    rate_limit_decision: schedule.rate_limit_decision.clone(),
                    schedule: Some(schedule),
                };
            }
            return Acquisition {
                can_proceed: true,
                delay: schedule.delay,
                retry_after: None,
                rate_limit_decision: schedule.rate_limit_decision.clone(),
                schedule: Some(schedule),
            };
        }

        Acquisition {
            can_proceed: true,
            delay: 0.0,
            retry_after: None,
            rate_limit_decision: None,
            schedule: None,
        }
    }

    /// Reports a success for `key`, fanned out to both composed
    /// components' `recordSuccess`-equivalents. Only the rate limiter
    /// tracks consecutive failures; the pacer has nothing to clear.
    pub fn record_success(&self, key: &K) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.record_success(key);
        }
    }

    /// Reports a failure for `key`.
    pub fn record_failure(&self, key: &K) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.record_failure(key);
        }
    }

    /// Resets `key`'s state in both composed components.
    pub fn reset(&self, key: &K) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.reset(key);
        }
        if let Some(pacer) = &self.pacer {
            pacer.reset(key);
        }
    }
}

fn retry_after_from(decision: &Decision, t: f64) -> f64 {
    decision
        .backoff_interval
        .unwrap_or_else(|| (decision.next_allowed_attempt.unwrap_or(t) - t).max(0.0))
}

/// Builder for [`ThrottledClient`].
pub struct ThrottledClientBuilder<K> {
    rate_limiter: Option<Arc<RateLimiter<K>>>,
    pacer: Option<RequestPacer<K>>,
}

impl<K> Default for ThrottledClientBuilder<K> {
    fn default() -> Self {
        Self { rate_limiter: None, pacer: None }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> ThrottledClientBuilder<K> {
    /// Composes a rate limiter.
    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter<K>>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Composes a request pacer.
    pub fn pacer(mut self, pacer: RequestPacer<K>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Builds the client. Always succeeds — validity is enforced by the
    /// sub-builders at their own `.build()` calls.
    pub fn build(self) -> Result<ThrottledClient<K>, crate::error::ConfigError> {
        Ok(ThrottledClient { rate_limiter: self.rate_limiter, pacer: self.pacer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::RateLimiter;

    #[test]
    fn no_components_always_allows() {
        let client = ThrottledClient::<&str>::builder().build().unwrap();
        let a = client.acquire(&"k", 0.0);
        assert!(a.can_proceed);
        assert_eq!(a.delay, 0.0);
    }

    /// S8: composed retry-after, limiter-only client.
    #[test]
    fn s8_composed_retry_after() {
        let limiter = Arc::new(
            RateLimiter::builder()
                .window(2.0, 1)
                .backoff_multiplier(3.0)
                .build()
                .unwrap(),
        );
        let client = ThrottledClient::builder()
            .rate_limiter(limiter.clone())
            .build()
            .unwrap();

        let first = client.acquire(&"u", 1000.0);
        assert!(first.can_proceed);

        let second = client.acquire(&"u", 1000.0);
        assert!(!second.can_proceed);
        assert!((second.retry_after.unwrap() - 2.0).abs() < 1e-9);

        limiter.record_failure(&"u");

        let third = client.acquire(&"u", 1000.0);
        assert!(!third.can_proceed);
        assert!((third.retry_after.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn limiter_only_records_attempt_on_allow() {
        let limiter = Arc::new(RateLimiter::builder().window(60.0, 2).build().unwrap());
        let client = ThrottledClient::builder()
            .rate_limiter(limiter.clone())
            .build()
            .unwrap();

        client.acquire(&"u", 0.0);
        client.acquire(&"u", 0.0);
        let third = client.acquire(&"u", 0.0);

        assert!(!third.can_proceed);
    }

    #[test]
    fn pacer_only_paces_without_limiting() {
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .build()
            .unwrap();
        let client = ThrottledClient::builder().pacer(pacer).build().unwrap();

        let first = client.acquire(&"k", 1000.0);
        let second = client.acquire(&"k", 1000.0);
        assert!(first.can_proceed && second.can_proceed);
        assert!((second.delay - 0.1).abs() < 1e-9);
    }

    #[test]
    fn record_success_and_failure_fan_out_to_limiter() {
        let limiter = Arc::new(RateLimiter::builder().window(60.0, 1).build().unwrap());
        let client = ThrottledClient::builder()
            .rate_limiter(limiter.clone())
            .build()
            .unwrap();

        client.acquire(&"u", 0.0);
        client.record_failure(&"u");
        client.record_success(&"u");

        let decision = limiter.check_limit(&"u", 0.0);
        assert_eq!(decision.backoff_interval, None);
    }

    #[test]
    fn reset_clears_both_components() {
        let limiter = Arc::new(RateLimiter::builder().window(60.0, 1).build().unwrap());
        let pacer = RequestPacer::<&str>::builder()
            .target_rate(10.0)
            .build()
            .unwrap();
        let client = ThrottledClient::builder()
            .rate_limiter(limiter.clone())
            .pacer(pacer)
            .build()
            .unwrap();

        client.acquire(&"u", 0.0);
        client.reset(&"u");

        assert_eq!(limiter.tracked_keys(), 0);
    }
}
