//! Queue lifecycle events published on the event bus.

use super::{EntryId, Priority};

/// Discriminant of [`QueueEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Queued,
    Dequeued,
    Retry,
    Success,
    Error,
}

/// One notification from the scheduler. `queue_size` is the number of live
/// entries after the transition.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Queued {
        id: EntryId,
        priority: Priority,
        queue_size: usize,
    },
    Dequeued {
        id: EntryId,
        queue_size: usize,
    },
    /// An attempt is about to run; `attempt` is 1-based.
    Retry {
        id: EntryId,
        attempt: u32,
        queue_size: usize,
    },
    Success {
        id: EntryId,
        queue_size: usize,
    },
    /// Terminal failure, including cascade cancellation.
    Error {
        id: EntryId,
        error: String,
        queue_size: usize,
    },
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Queued { .. } => EventKind::Queued,
            QueueEvent::Dequeued { .. } => EventKind::Dequeued,
            QueueEvent::Retry { .. } => EventKind::Retry,
            QueueEvent::Success { .. } => EventKind::Success,
            QueueEvent::Error { .. } => EventKind::Error,
        }
    }

    pub fn id(&self) -> &EntryId {
        match self {
            QueueEvent::Queued { id, .. }
            | QueueEvent::Dequeued { id, .. }
            | QueueEvent::Retry { id, .. }
            | QueueEvent::Success { id, .. }
            | QueueEvent::Error { id, .. } => id,
        }
    }

    pub fn queue_size(&self) -> usize {
        match self {
            QueueEvent::Queued { queue_size, .. }
            | QueueEvent::Dequeued { queue_size, .. }
            | QueueEvent::Retry { queue_size, .. }
            | QueueEvent::Success { queue_size, .. }
            | QueueEvent::Error { queue_size, .. } => *queue_size,
        }
    }
}
