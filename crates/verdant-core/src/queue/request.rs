//! Enqueue requests and per-entry callbacks.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::domain::{EntryError, EntryId, Priority};
use crate::error::QueueError;
use crate::typed::Operation;

pub type SuccessCallback = Box<dyn FnOnce(&Value) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(&EntryError) + Send>;

type CompletionSender = oneshot::Sender<Result<Value, EntryError>>;

/// Resolves once the entry settles.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<Value, EntryError>>,
}

impl Completion {
    pub(crate) fn channel() -> (CompletionSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the terminal result. An entry that was dequeued, or whose
    /// scheduler shut down first, reports [`EntryError::Cancelled`].
    pub async fn wait(self) -> Result<Value, EntryError> {
        self.rx.await.unwrap_or(Err(EntryError::Cancelled))
    }
}

/// Callbacks fired at most once, when the entry settles. They are not
/// persisted: an entry rehydrated after a restart settles silently unless
/// the app re-enqueues the same id, which attaches callbacks to the live
/// entry's empty slots.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) completion: Option<CompletionSender>,
}

impl Callbacks {
    /// Fill empty slots from `other`; slots already set are kept.
    pub(crate) fn adopt(&mut self, other: Callbacks) {
        if self.on_success.is_none() {
            self.on_success = other.on_success;
        }
        if self.on_error.is_none() {
            self.on_error = other.on_error;
        }
        if self.completion.is_none() {
            self.completion = other.completion;
        }
    }

    pub(crate) fn succeed(&mut self, output: &Value) {
        self.on_error = None;
        if let Some(cb) = self.on_success.take()
            && catch_unwind(AssertUnwindSafe(|| cb(output))).is_err()
        {
            warn!("on_success callback panicked");
        }
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Ok(output.clone()));
        }
    }

    pub(crate) fn fail(&mut self, error: &EntryError) {
        self.on_success = None;
        if let Some(cb) = self.on_error.take()
            && catch_unwind(AssertUnwindSafe(|| cb(error))).is_err()
        {
            warn!(%error, "on_error callback panicked");
        }
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("completion", &self.completion.is_some())
            .finish()
    }
}

/// A unit of work to admit into the queue.
///
/// ```ignore
/// let request = EnqueueRequest::for_operation(&SavePlant { plant_id: 7, .. })?
///     .with_id("save-plant-7")
///     .with_priority(Priority::High)
///     .on_error(|e| warn!("save failed: {e}"));
/// ```
#[derive(Debug)]
pub struct EnqueueRequest {
    pub(crate) id: Option<EntryId>,
    pub(crate) operation_key: String,
    pub(crate) args: Value,
    pub(crate) priority: Priority,
    pub(crate) max_retries: Option<u32>,
    pub(crate) delay_override: Option<Duration>,
    pub(crate) dependencies: Vec<EntryId>,
    pub(crate) volatile: bool,
    pub(crate) callbacks: Callbacks,
}

impl EnqueueRequest {
    /// Build a request from a typed operation; key and payload come from `O`.
    pub fn for_operation<O: Operation>(operation: &O) -> Result<Self, QueueError> {
        Ok(Self::raw(O::KEY, serde_json::to_value(operation)?))
    }

    /// Build a request from an operation key and an already-encoded payload.
    pub fn raw(operation_key: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            operation_key: operation_key.into(),
            args,
            priority: Priority::default(),
            max_retries: None,
            delay_override: None,
            dependencies: Vec::new(),
            volatile: false,
            callbacks: Callbacks::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntryId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Fixed retry delay instead of the exponential formula (still capped).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_override = Some(delay);
        self
    }

    pub fn depends_on(mut self, id: impl Into<EntryId>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Keep this entry in memory only; it is lost on restart.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(&Value) + Send + 'static) -> Self {
        self.callbacks.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&EntryError) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    pub(crate) fn track(&mut self) -> Completion {
        let (tx, completion) = Completion::channel();
        self.callbacks.completion = Some(tx);
        completion
    }

    pub fn operation_key(&self) -> &str {
        &self.operation_key
    }
}
