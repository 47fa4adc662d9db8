//! Application layer: the event bus and the builder that wires a queue
//! together from ports.

pub mod builder;
pub mod event_bus;

pub use self::builder::{BuildError, QueueBuilder};
pub use self::event_bus::{EventBus, Subscription};
