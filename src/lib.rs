//! Multi-window rate limiting with exponential backoff and a co-operating
//! request pacer.
//!
//! This crate is an in-process, embeddable engine for protecting
//! authentication flows, API endpoints, and outbound client traffic
//! against bursts, abuse, and credential-stuffing attacks. It ships no
//! network transport, no CLI, and no persistence — the clock, the
//! metrics sink, and the key type are all caller-supplied collaborators.
//!
//! Three components, composed bottom-up:
//!
//! - [`BoundedMap`] — an LRU-capped mapping from key to per-key state.
//! - [`RateLimiter`] — a per-key, multi-window fixed-window counter with
//!   a consecutive-failure backoff gate.
//! - [`RequestPacer`] — a per-key scheduler spacing requests to a target
//!   rate, optionally consulting a [`RateLimiter`] for a hard cap.
//!
//! [`ThrottledClient`] is a thin façade composing an optional limiter
//! and an optional pacer behind one `acquire`/record interface.
//!
//! ```
//! use throttle_guard::RateLimiter;
//!
//! let limiter = RateLimiter::<String>::builder()
//!     .window(60.0, 100)
//!     .window(3600.0, 1000)
//!     .build()
//!     .unwrap();
//!
//! let decision = limiter.check_limit(&"user-42".to_string(), 0.0);
//! assert!(decision.allowed);
//! ```

#![forbid(unsafe_code)]

mod bounded_map;
mod client;
mod clock;
mod error;
mod limiter;
mod pacer;
mod window;

pub use bounded_map::BoundedMap;
pub use client::{Acquisition, ThrottledClient, ThrottledClientBuilder};
pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-util"))]
pub use clock::test_util::MockClock;
pub use error::ConfigError;
pub use limiter::{Decision, MetricsCallback, RateLimiter, RateLimiterBuilder};
pub use pacer::{RequestPacer, RequestPacerBuilder, Schedule};
pub use window::WindowSpec;
