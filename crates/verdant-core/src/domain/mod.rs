//! Domain model: identifiers, priorities, failures and events.

pub mod errors;
pub mod events;
pub mod ids;
pub mod priority;

pub use errors::{EntryError, ErrorKind, OperationError};
pub use events::{EventKind, QueueEvent};
pub use ids::EntryId;
pub use priority::Priority;
