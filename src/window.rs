//! Window configuration and per-key accounting records.

use crate::error::ConfigError;

/// A single fixed-window specification: `(duration, max_attempts)`.
///
/// A fully configured [`crate::RateLimiter`] holds a non-empty, ascending-
/// by-duration sequence of these. The shortest is the *primary window*,
/// checked first and the only one the backoff gate consults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpec {
    pub(crate) duration_secs: u64,
    pub(crate) max_attempts: u32,
}

impl WindowSpec {
    /// Creates a window spec of `duration` seconds allowing `max_attempts`
    /// attempts per window.
    ///
    /// `duration` is rounded down to whole seconds — window boundaries are
    /// aligned to integer-second floors of epoch time (see the crate's
    /// numeric semantics notes), so sub-second windows cannot be
    /// represented and are rejected at construction.
    pub fn new(duration_secs: f64, max_attempts: u32) -> Result<Self, ConfigError> {
        if !duration_secs.is_finite() || duration_secs < 1.0 || max_attempts == 0 {
            return Err(ConfigError::InvalidWindows);
        }
        Ok(Self { duration_secs: duration_secs as u64, max_attempts })
    }

    /// Duration of this window, in whole seconds.
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Maximum number of attempts allowed within this window.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[inline]
    pub(crate) fn window_start(&self, now: u64) -> u64 {
        (now / self.duration_secs) * self.duration_secs
    }
}

/// Per-key, per-window accounting: `(window_start, attempts)`.
///
/// `consecutive_failures` is deliberately **not** part of this record —
/// per the crate's design notes it is lifted into a single per-key scalar
/// on [`KeyState`] instead of being replicated across every window, so
/// that rollover of any one window can never zero out the failure count.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptWindow {
    pub window_start: u64,
    pub attempts: u32,
}

impl AttemptWindow {
    fn fresh(spec: &WindowSpec, now: u64) -> Self {
        Self { window_start: spec.window_start(now), attempts: 0 }
    }

    /// Reuses this record if still within its window at `now`, otherwise
    /// produces a fresh, zeroed record for the window containing `now`.
    fn rolled_to(self, spec: &WindowSpec, now: u64) -> Self {
        let current_start = spec.window_start(now);
        if self.window_start == current_start {
            self
        } else {
            Self { window_start: current_start, attempts: 0 }
        }
    }
}

/// All per-key state a [`crate::RateLimiter`] keeps: one [`AttemptWindow`]
/// per configured [`WindowSpec`], plus the single consecutive-failure
/// scalar and a last-touched timestamp used for lazy staleness eviction.
#[derive(Debug, Clone)]
pub(crate) struct KeyState {
    pub windows: Vec<AttemptWindow>,
    pub consecutive_failures: u32,
    pub last_touched: u64,
}

impl KeyState {
    pub fn fresh(specs: &[WindowSpec], now: u64) -> Self {
        Self {
            windows: specs.iter().map(|s| AttemptWindow::fresh(s, now)).collect(),
            consecutive_failures: 0,
            last_touched: now,
        }
    }

    /// Rolls every window forward to `now`, regenerating any that have
    /// expired. `consecutive_failures` survives rollover by construction —
    /// it lives outside the per-window records entirely.
    pub fn roll(&mut self, specs: &[WindowSpec], now: u64) {
        for (window, spec) in self.windows.iter_mut().zip(specs) {
            *window = window.rolled_to(spec, now);
        }
        self.last_touched = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_duration_and_max_attempts() {
        assert!(WindowSpec::new(0.0, 1).is_err());
        assert!(WindowSpec::new(-5.0, 1).is_err());
        assert!(WindowSpec::new(60.0, 0).is_err());
        assert!(WindowSpec::new(f64::NAN, 1).is_err());
    }

    #[test]
    fn window_start_aligns_to_epoch_floor() {
        let spec = WindowSpec::new(60.0, 3).unwrap();
        assert_eq!(spec.window_start(0), 0);
        assert_eq!(spec.window_start(59), 0);
        assert_eq!(spec.window_start(60), 60);
        assert_eq!(spec.window_start(125), 120);
    }

    #[test]
    fn rollover_resets_attempts_but_not_failures() {
        let specs = vec![WindowSpec::new(60.0, 2).unwrap()];
        let mut state = KeyState::fresh(&specs, 0);
        state.windows[0].attempts = 2;
        state.consecutive_failures = 3;

        state.roll(&specs, 60);

        assert_eq!(state.windows[0].attempts, 0);
        assert_eq!(state.windows[0].window_start, 60);
        assert_eq!(state.consecutive_failures, 3);
    }
}
