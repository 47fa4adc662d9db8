//! Ports: the collaborators the queue consumes but does not own.

pub mod clock;
pub mod connectivity;
pub mod kv_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::connectivity::Connectivity;
pub use self::kv_store::KeyValueStore;
