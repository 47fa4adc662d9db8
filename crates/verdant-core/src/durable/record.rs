//! Persisted record shape (one JSON array under a single key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{EntryId, Priority};

/// ```json
/// { "id": "save-plant-7", "priority": "high", "attempts": 1,
///   "lastAttempt": 1760000000000, "maxRetries": 3, "delay": 500,
///   "dependencies": ["upload-photo-7"], "operationKey": "plants.save.v1",
///   "operationData": { .. }, "createdAt": 1759999990000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub id: EntryId,
    pub priority: Priority,
    pub attempts: u32,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt: Option<DateTime<Utc>>,
    pub max_retries: u32,
    /// Fixed retry delay override, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<EntryId>,
    pub operation_key: String,
    pub operation_data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}
