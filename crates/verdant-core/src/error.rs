use thiserror::Error;

use crate::domain::EntryId;

/// Errors returned by the queue API.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no operation registered for key={0}")]
    UnknownOperation(String),

    #[error("dependency cycle: {0:?}")]
    DependencyCycle(Vec<EntryId>),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to encode operation payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("scheduler is not running")]
    Closed,
}

/// Errors from the durable key-value layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend: {0}")]
    Backend(String),
}
