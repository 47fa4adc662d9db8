//! verdant-core
//!
//! Durable retry queue for client-side side effects (saving a plant, fetching
//! weather, logging a mood) that must survive flaky connectivity and process
//! restarts.
//!
//! # Modules
//! - **domain**: ids, priorities, failures, events
//! - **typed**: `Operation` / `Handler` API and the operation registry
//! - **queue**: scheduler actor and its `RetryQueue` handle
//! - **durable**: persisted record shape, snapshot store, writer task
//! - **backoff**: standalone backoff controller for non-queued calls
//! - **app**: event bus and `QueueBuilder`
//! - **ports / impls**: clock, key-value store and connectivity, with
//!   in-memory, file and in-process implementations

pub mod app;
pub mod backoff;
pub mod config;
pub mod domain;
pub mod durable;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{BuildError, EventBus, QueueBuilder, Subscription};
pub use backoff::{BackoffConfig, BackoffController, BackoffError, BackoffHandle, BackoffState};
pub use config::QueueConfig;
pub use domain::{EntryError, EntryId, ErrorKind, EventKind, OperationError, Priority, QueueEvent};
pub use error::{QueueError, StoreError};
pub use observability::QueueStats;
pub use queue::{Completion, EnqueueRequest, EntryPhase, EntryStatus, RetryQueue};
pub use typed::{Handler, Operation, OperationRegistry};
