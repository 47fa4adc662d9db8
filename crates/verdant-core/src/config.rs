//! Queue configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.
//! Durations are written as integer milliseconds (`base_delay_ms`, ...).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delay before the first retry.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,

    pub backoff_factor: f64,

    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    /// Attempt ceiling for requests that do not set one.
    pub default_max_retries: u32,

    /// Persisted entries older than this are dropped on load.
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,

    /// How long terminal outcomes are remembered for dependency checks.
    #[serde(rename = "settled_grace_ms", with = "duration_ms")]
    pub settled_grace: Duration,

    pub settled_capacity: usize,

    /// How long an unknown dependency id is awaited before it is treated as
    /// never having existed.
    #[serde(rename = "dependency_admission_window_ms", with = "duration_ms")]
    pub dependency_admission_window: Duration,

    /// Attempts allowed in flight at once.
    pub max_concurrent: usize,

    /// Fallback re-evaluation tick.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Key of the snapshot in the key-value store.
    pub storage_key: String,

    pub command_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            default_max_retries: 3,
            ttl: Duration::from_secs(24 * 60 * 60),
            settled_grace: Duration::from_secs(5 * 60),
            settled_capacity: 1024,
            dependency_admission_window: Duration::from_secs(30),
            max_concurrent: 1,
            poll_interval: Duration::from_secs(1),
            storage_key: "retry_queue".to_string(),
            command_buffer: 64,
        }
    }
}

impl QueueConfig {
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&contents)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_default_max_retries(mut self, max: u32) -> Self {
        self.default_max_retries = max;
        self
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
