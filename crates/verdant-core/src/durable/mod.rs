//! Durable store: persisted record shape, snapshot store and writer task.

pub mod persister;
pub mod record;
pub mod store;

pub use self::persister::Persister;
pub use self::record::PersistedEntry;
pub use self::store::{Change, DurableStore};
