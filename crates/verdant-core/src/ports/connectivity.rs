//! Connectivity port.

use tokio::sync::watch;

/// Reports whether the device is online and publishes transitions.
///
/// Subscribers get a `watch` receiver so a reconnect is observed immediately,
/// without waiting for a poll tick.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}
