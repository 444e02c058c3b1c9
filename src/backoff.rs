//! Reconnect delay computation.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffOptions;

/// Max jitter, as a fraction of the base delay.
const JITTER_RATIO: f64 = 0.25;

/// Exponential backoff with a ceiling and additive jitter.
///
/// Base delay for attempt `n` is `min(initial * factor^n, cap)`, jitter adds up to a quarter
/// of that on top.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    factor: f64,
    cap: Duration,
    attempt: u32,
}

impl BackoffPolicy {
    /// Create a policy. `factor` below 1 is treated as 1 and `cap` below `initial` as `initial`.
    pub fn new(initial: Duration, factor: f64, cap: Duration) -> Self {
        Self {
            initial,
            factor: if factor.is_finite() { factor.max(1.0) } else { 1.0 },
            cap: cap.max(initial),
            attempt: 0,
        }
    }

    /// current attempt counter
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay for `attempt`, with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let ratio = rand::rng().random_range(0.0..=JITTER_RATIO);
        base + base.mul_f64(ratio)
    }

    /// Delay for the current attempt, then bump the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to the initial delay, called after every successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffOptions::default())
    }
}

impl From<&BackoffOptions> for BackoffPolicy {
    fn from(options: &BackoffOptions) -> Self {
        Self::new(options.initial(), options.factor, options.cap())
    }
}
