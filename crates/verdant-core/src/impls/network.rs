//! In-process connectivity monitor.

use tokio::sync::watch;
use tracing::info;

use crate::ports::Connectivity;

/// Connectivity source driven by the host (OS reachability callbacks, or a
/// test flipping the switch).
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Publish a transition. Repeated values are not re-broadcast.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::online()
    }
}

impl Connectivity for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
