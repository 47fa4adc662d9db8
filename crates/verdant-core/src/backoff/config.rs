//! Backoff controller configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,

    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,

    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    pub backoff_factor: f64,

    /// Fraction of the delay added or removed at random; 0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// `min(initial * factor^(attempt-1), max)`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        RetryPolicy {
            base_delay: self.initial_delay,
            backoff_factor: self.backoff_factor,
            max_delay: self.max_delay,
        }
        .next_delay(attempt, None)
    }

    /// Base delay shifted by up to `± delay * jitter_factor`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter_factor;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}
