//! Background writer that applies snapshot changes in order.
//!
//! The scheduler only ever sends on an unbounded channel, so persistence
//! never blocks dispatch. Changes that arrive together are applied as one
//! batch.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::record::PersistedEntry;
use super::store::{Change, DurableStore};
use crate::domain::EntryId;

enum PersistOp {
    Change(Change),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl Persister {
    pub fn spawn(store: Arc<DurableStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(persister_loop(rx, store));
        (Self { tx }, join)
    }

    pub fn upsert(&self, entry: PersistedEntry) {
        let _ = self.tx.send(PersistOp::Change(Change::Upsert(entry)));
    }

    pub fn remove(&self, id: EntryId) {
        let _ = self.tx.send(PersistOp::Change(Change::Remove(id)));
    }

    /// Resolves once every change sent before this call has been applied.
    pub fn flush(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(PersistOp::Flush(tx));
        rx
    }
}

impl std::fmt::Debug for PersistOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistOp::Change(change) => f.debug_tuple("Change").field(change).finish(),
            PersistOp::Flush(_) => f.write_str("Flush"),
        }
    }
}

async fn persister_loop(mut rx: mpsc::UnboundedReceiver<PersistOp>, store: Arc<DurableStore>) {
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::new();
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(op) = next {
            match op {
                PersistOp::Change(change) => batch.push(change),
                PersistOp::Flush(done) => waiters.push(done),
            }
            next = rx.try_recv().ok();
        }

        debug!(changes = batch.len(), "persisting queue changes");
        store.apply(&batch).await;
        for done in waiters {
            let _ = done.send(());
        }
    }
    debug!("persister stopped");
}
