//! Snapshot persistence of non-volatile entries.
//!
//! Write failures are logged and swallowed: durability is best-effort and
//! never affects in-memory scheduling or operation outcomes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::record::PersistedEntry;
use crate::domain::EntryId;
use crate::error::StoreError;
use crate::ports::{Clock, KeyValueStore};
use crate::typed::OperationRegistry;

/// One change to the snapshot.
#[derive(Debug, Clone)]
pub enum Change {
    Upsert(PersistedEntry),
    Remove(EntryId),
}

pub struct DurableStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl DurableStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            kv,
            key: key.into(),
            clock,
            ttl,
        }
    }

    /// Replace the snapshot with `entries`.
    pub async fn save(&self, entries: &[PersistedEntry]) {
        if let Err(e) = self.write_snapshot(entries).await {
            warn!(key = %self.key, error = %e, "failed to save queue snapshot");
        }
    }

    /// Insert or replace the given entries, keeping the rest.
    pub async fn update(&self, subset: &[PersistedEntry]) {
        let changes: Vec<Change> = subset.iter().cloned().map(Change::Upsert).collect();
        self.apply(&changes).await;
    }

    pub async fn remove(&self, ids: &[EntryId]) {
        let changes: Vec<Change> = ids.iter().cloned().map(Change::Remove).collect();
        self.apply(&changes).await;
    }

    /// Apply a batch of changes with a single read and a single write.
    pub async fn apply(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        if let Err(e) = self.try_apply(changes).await {
            warn!(key = %self.key, error = %e, changes = changes.len(), "failed to persist queue changes");
        }
    }

    /// Read the snapshot and keep entries that are fresh, registered, and
    /// decodable by their handler. Load problems yield an empty queue.
    pub async fn load(&self, registry: &OperationRegistry) -> Vec<PersistedEntry> {
        let entries = match self.read_snapshot().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key = %self.key, error = %e, "discarding unreadable queue snapshot");
                return Vec::new();
            }
        };

        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let total = entries.len();
        let mut kept = Vec::with_capacity(total);
        for entry in entries {
            if now.signed_duration_since(entry.created_at) > ttl {
                debug!(entry_id = %entry.id, "dropping expired entry");
                continue;
            }
            let Some(handler) = registry.get(&entry.operation_key) else {
                warn!(entry_id = %entry.id, operation = %entry.operation_key, "dropping entry with unregistered operation");
                continue;
            };
            if !handler.accepts(&entry.operation_data) {
                warn!(entry_id = %entry.id, operation = %entry.operation_key, "dropping entry whose payload no longer decodes");
                continue;
            }
            kept.push(entry);
        }
        info!(key = %self.key, total, kept = kept.len(), "loaded queue snapshot");
        kept
    }

    pub async fn read_snapshot(&self) -> Result<Vec<PersistedEntry>, StoreError> {
        match self.kv.get(&self.key).await? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn write_snapshot(&self, entries: &[PersistedEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return self.kv.remove(&self.key).await;
        }
        let raw = serde_json::to_string(entries)?;
        self.kv.set(&self.key, raw).await
    }

    async fn try_apply(&self, changes: &[Change]) -> Result<(), StoreError> {
        let mut entries = self.read_snapshot().await.unwrap_or_else(|e| {
            warn!(key = %self.key, error = %e, "overwriting unreadable queue snapshot");
            Vec::new()
        });
        for change in changes {
            match change {
                Change::Upsert(entry) => {
                    match entries.iter_mut().find(|existing| existing.id == entry.id) {
                        Some(existing) => *existing = entry.clone(),
                        None => entries.push(entry.clone()),
                    }
                }
                Change::Remove(id) => entries.retain(|existing| existing.id != *id),
            }
        }
        self.write_snapshot(&entries).await
    }
}
