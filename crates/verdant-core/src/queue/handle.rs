//! Handle for talking to a running scheduler.

use tokio::sync::{mpsc, oneshot};

use super::request::{Completion, EnqueueRequest};
use super::scheduler::Command;
use super::state::EntryStatus;
use crate::app::{EventBus, Subscription};
use crate::domain::{EntryId, EventKind, QueueEvent};
use crate::error::QueueError;
use crate::observability::QueueStats;
use crate::typed::Operation;

/// Cloneable front of a retry queue. Every method is a message to the
/// scheduler task plus a wait for its reply.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl RetryQueue {
    pub(crate) fn new(commands: mpsc::Sender<Command>, bus: EventBus) -> Self {
        Self { commands, bus }
    }

    /// Admit an entry. Enqueueing an id that is already live returns that id
    /// and leaves the live entry untouched.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EntryId, QueueError> {
        self.send_and_wait(|reply| Command::Enqueue { request, reply })
            .await?
    }

    /// Enqueue a typed operation with default options.
    pub async fn enqueue_operation<O: Operation>(&self, operation: &O) -> Result<EntryId, QueueError> {
        self.enqueue(EnqueueRequest::for_operation(operation)?).await
    }

    /// Enqueue and get a [`Completion`] that resolves with the terminal result.
    pub async fn enqueue_tracked(
        &self,
        mut request: EnqueueRequest,
    ) -> Result<(EntryId, Completion), QueueError> {
        let completion = request.track();
        let id = self.enqueue(request).await?;
        Ok((id, completion))
    }

    /// Remove an entry, in flight or not. Returns whether it was present.
    pub async fn dequeue(&self, id: &EntryId) -> Result<bool, QueueError> {
        let id = id.clone();
        self.send_and_wait(|reply| Command::Dequeue { id, reply })
            .await
    }

    /// Alias of [`RetryQueue::dequeue`].
    pub async fn cancel(&self, id: &EntryId) -> Result<bool, QueueError> {
        self.dequeue(id).await
    }

    /// Skip the remaining backoff wait of an entry.
    pub async fn retry_now(&self, id: &EntryId) -> Result<bool, QueueError> {
        let id = id.clone();
        self.send_and_wait(|reply| Command::RetryNow { id, reply })
            .await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.send_and_wait(|reply| Command::Stats { reply }).await
    }

    pub async fn status(&self, id: &EntryId) -> Result<Option<EntryStatus>, QueueError> {
        let id = id.clone();
        self.send_and_wait(|reply| Command::Status { id, reply })
            .await
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&QueueEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(kind, handler)
    }

    pub fn subscribe_all(&self, handler: impl Fn(&QueueEvent) + Send + Sync + 'static) -> Subscription {
        self.bus.subscribe_all(handler)
    }

    /// Receive every event through a channel.
    pub fn events(&self) -> (Subscription, mpsc::UnboundedReceiver<QueueEvent>) {
        self.bus.channel()
    }

    /// Wait until every storage write issued so far has been applied.
    pub async fn flush(&self) -> Result<(), QueueError> {
        self.send_and_wait(|reply| Command::Flush { reply }).await
    }

    /// Flush storage and stop the scheduler. In-flight attempts keep running
    /// but their results are discarded; persisted entries resume on the next
    /// start.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.send_and_wait(|reply| Command::Shutdown { reply })
            .await
    }

    async fn send_and_wait<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }
}
