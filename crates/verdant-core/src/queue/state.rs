//! Entry state and terminal settlements.

use std::time::Duration;

use crate::domain::OperationError;

/// Live state of an entry inside the scheduler.
///
/// - Pending -> Processing -> (removed on success / terminal failure)
/// - Pending -> Processing -> Pending (retry, with `next_eligible_at` pushed out)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Processing,
}

/// Terminal outcome remembered after an entry leaves the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    Failed,
    Cancelled,
}

impl Settlement {
    /// Dependents may run only after a success.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Settlement::Succeeded)
    }
}

/// User-facing view of one entry ("attempt N of M").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
    pub phase: EntryPhase,
    pub attempts: u32,
    pub max_retries: u32,
    /// Failure of the most recent attempt, if it failed.
    pub last_error: Option<OperationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPhase {
    /// Eligible now; waiting for a dispatch slot or connectivity.
    Queued,
    /// In its backoff wait.
    Waiting { retry_in: Duration },
    /// At least one dependency has not settled.
    Blocked,
    Processing,
}
