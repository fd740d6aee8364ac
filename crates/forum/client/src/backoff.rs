//! Exponential reconnection backoff.
//!
//! `delay(n) = min(initial * multiplier^(n-1), max)` for the n-th consecutive
//! failure. No jitter: delays are non-decreasing until capped.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff calculator.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff sequence.
    ///
    /// `max_attempts` of 0 means unlimited attempts.
    pub fn new(initial: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            max_delay,
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            attempt: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.multiplier,
            config.max_backoff,
            config.max_attempts,
        )
    }

    /// Delay before retrying after the `attempt`-th consecutive failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(scaled.round() as u64)
    }

    /// Record a failure and get the delay before the next attempt.
    ///
    /// Returns `None` once the maximum number of attempts is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(self.delay_for(self.attempt))
    }

    /// Reset the attempt counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured attempt limit, `None` when unlimited.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempt >= max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
