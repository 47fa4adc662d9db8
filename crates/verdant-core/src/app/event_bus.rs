//! In-process publish/subscribe for queue events.
//!
//! - Every subscriber whose filter matches receives every event.
//! - Publishing snapshots the subscriber list, so handlers may subscribe or
//!   unsubscribe (themselves included) while an event is being delivered.
//! - A subscription deactivated mid-dispatch is skipped for the rest of that
//!   dispatch and never sees another event.
//!
//! Handlers run on the scheduler task; they must not block. A handler that
//! panics is logged and skipped; the other subscribers still see the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{EventKind, QueueEvent};

type Handler = Box<dyn Fn(&QueueEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Option<EventKind>,
    active: AtomicBool,
    handler: Handler,
}

#[derive(Default)]
struct Subscribers {
    list: Mutex<Vec<Arc<Subscriber>>>,
}

impl Subscribers {
    fn remove(&self, id: u64) {
        if let Ok(mut list) = self.list.lock() {
            list.retain(|s| s.id != id);
        }
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Subscribers>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&QueueEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(Some(kind), Box::new(handler))
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self, handler: impl Fn(&QueueEvent) + Send + Sync + 'static) -> Subscription {
        self.add(None, Box::new(handler))
    }

    /// Subscribe through a channel, for async consumers and tests.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe_all(move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    pub fn publish(&self, event: &QueueEvent) {
        let snapshot: Vec<Arc<Subscriber>> = match self.subscribers.list.lock() {
            Ok(list) => list.clone(),
            Err(_) => return,
        };
        let kind = event.kind();
        for subscriber in snapshot {
            if subscriber.filter.is_some_and(|filter| filter != kind) {
                continue;
            }
            if subscriber.active.load(Ordering::SeqCst)
                && catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(event))).is_err()
            {
                warn!(subscriber = subscriber.id, ?kind, "event handler panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.list.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn add(&self, filter: Option<EventKind>, handler: Handler) -> Subscription {
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            filter,
            active: AtomicBool::new(true),
            handler,
        });
        if let Ok(mut list) = self.subscribers.list.lock() {
            list.push(subscriber.clone());
        }
        Subscription {
            subscriber: Arc::downgrade(&subscriber),
            id: subscriber.id,
            bus: Arc::downgrade(&self.subscribers),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the subscription alive;
/// call [`Subscription::unsubscribe`] to stop delivery.
#[derive(Debug, Clone)]
pub struct Subscription {
    subscriber: Weak<Subscriber>,
    id: u64,
    bus: Weak<Subscribers>,
}

impl Subscription {
    /// Stop delivery. Safe to call repeatedly and from inside a handler.
    pub fn unsubscribe(&self) {
        if let Some(subscriber) = self.subscriber.upgrade()
            && !subscriber.active.swap(false, Ordering::SeqCst)
        {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscriber
            .upgrade()
            .is_some_and(|s| s.active.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}
