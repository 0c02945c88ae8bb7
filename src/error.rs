//! Construction-time error taxonomy.
//!
//! Every operation in this crate other than construction is infallible:
//! `checkLimit`/`recordAttempt`/`scheduleRequest` always produce a decision,
//! never an error. Only the fallible builders (`RateLimiterBuilder::build`,
//! `RequestPacerBuilder::build`, `ThrottledClientBuilder::build`) can fail,
//! and only on invalid configuration.

/// Reasons a builder in this crate can refuse to construct its target.
#[non_exhaustive]
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    /// `windows` was empty, or contained a non-positive duration or a
    /// non-positive `max_attempts`.
    #[error(
        "windows must be a non-empty list of positive-duration, positive-max-attempts specs"
    )]
    InvalidWindows,

    /// `max_cache_size` was zero.
    #[error("max_cache_size must be at least 1")]
    InvalidCacheSize,

    /// `backoff_multiplier` was not greater than 1.0.
    #[error("backoff_multiplier must be greater than 1.0")]
    InvalidBackoffMultiplier,

    /// `target_rate` was not a positive, finite number.
    #[error("target_rate must be a positive, finite number of requests per second")]
    InvalidTargetRate,
}
