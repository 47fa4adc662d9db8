//! Entry record: the scheduler's single source of truth for one entry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;

use super::request::{Callbacks, EnqueueRequest};
use super::state::EntryState;
use crate::domain::{EntryId, OperationError, Priority};
use crate::durable::PersistedEntry;

#[derive(Debug)]
pub struct EntryRecord {
    pub id: EntryId,
    pub operation_key: String,
    pub args: Value,
    pub priority: Priority,
    pub state: EntryState,

    /// Attempts started so far, including one currently processing.
    pub attempts: u32,
    pub max_retries: u32,
    pub delay_override: Option<Duration>,
    pub dependencies: Vec<EntryId>,
    pub volatile: bool,

    /// Not dispatched before this instant.
    pub next_eligible_at: Instant,
    /// When this record entered the scheduler (dependency admission window).
    pub admitted_at: Instant,
    /// Admission sequence: orders entries within a tier and tags attempts so
    /// a late result for a dequeued-then-re-enqueued id is ignored.
    pub seq: u64,

    pub created_at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<OperationError>,

    pub callbacks: Callbacks,
}

impl EntryRecord {
    pub fn from_request(
        id: EntryId,
        request: EnqueueRequest,
        max_retries: u32,
        seq: u64,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            operation_key: request.operation_key,
            args: request.args,
            priority: request.priority,
            state: EntryState::Pending,
            attempts: 0,
            max_retries,
            delay_override: request.delay_override,
            dependencies: request.dependencies,
            volatile: request.volatile,
            next_eligible_at: now,
            admitted_at: now,
            seq,
            created_at: wall_now,
            last_attempt: None,
            last_error: None,
            callbacks: request.callbacks,
        }
    }

    /// Rebuild a record from the durable snapshot; `attempts` is kept.
    pub fn from_persisted(
        entry: PersistedEntry,
        seq: u64,
        now: Instant,
        next_eligible_at: Instant,
    ) -> Self {
        Self {
            id: entry.id,
            operation_key: entry.operation_key,
            args: entry.operation_data,
            priority: entry.priority,
            state: EntryState::Pending,
            attempts: entry.attempts,
            max_retries: entry.max_retries,
            delay_override: entry.delay.map(Duration::from_millis),
            dependencies: entry.dependencies,
            volatile: false,
            next_eligible_at,
            admitted_at: now,
            seq,
            created_at: entry.created_at,
            last_attempt: entry.last_attempt,
            last_error: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.state == EntryState::Processing
    }

    /// Mark as processing and count the attempt.
    pub fn start_attempt(&mut self, wall_now: DateTime<Utc>) {
        self.state = EntryState::Processing;
        self.attempts += 1;
        self.last_attempt = Some(wall_now);
    }

    /// Back to pending, not eligible before `next_eligible_at`.
    pub fn schedule_retry(&mut self, next_eligible_at: Instant, error: OperationError) {
        self.state = EntryState::Pending;
        self.next_eligible_at = next_eligible_at;
        self.last_error = Some(error);
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }

    /// Snapshot form, or `None` for volatile entries.
    pub fn to_persisted(&self) -> Option<PersistedEntry> {
        if self.volatile {
            return None;
        }
        Some(PersistedEntry {
            id: self.id.clone(),
            priority: self.priority,
            attempts: self.attempts,
            last_attempt: self.last_attempt,
            max_retries: self.max_retries,
            delay: self.delay_override.map(|d| d.as_millis() as u64),
            dependencies: self.dependencies.clone(),
            operation_key: self.operation_key.clone(),
            operation_data: self.args.clone(),
            created_at: self.created_at,
        })
    }
}
