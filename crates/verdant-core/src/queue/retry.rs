//! Retry policy: decides backoff delays for queued entries.

use std::time::Duration;

use crate::config::QueueConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Multiplier applied per additional failed attempt.
    pub backoff_factor: f64,

    /// Upper bound on any single delay, including overrides.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            backoff_factor: config.backoff_factor,
            max_delay: config.max_delay,
        }
    }

    /// Delay after the `attempts`-th failure (1-based):
    /// `min(override ?? base * factor^(attempts-1), max)`.
    ///
    /// With base=1s, factor=2: 1s, 2s, 4s, 8s, ...
    pub fn next_delay(&self, attempts: u32, delay_override: Option<Duration>) -> Duration {
        let delay = match delay_override {
            Some(delay) => delay,
            None => {
                let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
                if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
                    return self.max_delay;
                }
                Duration::from_secs_f64(secs.max(0.0))
            }
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
