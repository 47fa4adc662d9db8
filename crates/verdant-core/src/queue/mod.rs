//! The retry queue engine.
//!
//! - **request**: what callers enqueue, and how they hear back
//! - **record / state**: an entry's live bookkeeping
//! - **retry**: backoff policy
//! - **dependency / settled**: ordering between entries
//! - **scheduler**: the actor owning all of the above
//! - **handle**: the cloneable front end

pub mod dependency;
pub mod handle;
pub mod record;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod settled;
pub mod state;

#[cfg(test)]
mod tests;

pub use self::dependency::DependencyGraph;
pub use self::handle::RetryQueue;
pub use self::request::{Callbacks, Completion, EnqueueRequest, ErrorCallback, SuccessCallback};
pub use self::retry::RetryPolicy;
pub use self::scheduler::RetryPredicate;
pub(crate) use self::scheduler::Scheduler;
pub use self::settled::SettledLog;
pub use self::state::{EntryPhase, EntryState, EntryStatus, Settlement};
