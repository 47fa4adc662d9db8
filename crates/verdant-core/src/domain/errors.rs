//! Operation failures and terminal entry outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::EntryId;

/// Classification of an operation failure.
///
/// - Network / Timeout: transient, worth retrying.
/// - Validation / NotFound: permanent, retrying cannot help.
/// - Internal: unknown; the queue retries it, the backoff controller does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }
}

/// Error returned by an operation handler.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Terminal failure of a queue entry, delivered to its error callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        source: OperationError,
    },

    #[error("non-retryable failure on attempt {attempts}: {source}")]
    NonRetryable {
        attempts: u32,
        source: OperationError,
    },

    #[error("cancelled because dependency {dependency} failed or was cancelled")]
    DependencyFailed { dependency: EntryId },

    #[error("entry was cancelled")]
    Cancelled,
}

impl EntryError {
    /// True when the entry never ran because a prerequisite did not succeed.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, EntryError::DependencyFailed { .. })
    }
}
