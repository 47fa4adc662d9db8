//! Entry identifiers.
//!
//! Callers may supply their own ids (e.g. `save-plant-42`) so that re-enqueuing
//! the same logical work is idempotent. When none is supplied, a ULID-based id
//! is generated; ULIDs sort by creation time, which keeps log output readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const GENERATED_PREFIX: &str = "entry-";

/// Identifier of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh, time-sortable id.
    pub fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
