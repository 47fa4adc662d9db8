//! Typed operation API.
//!
//! - Surface: [`Operation`] and [`Handler<O>`], checked at compile time.
//! - Inside: [`DynHandler`] over JSON payloads, so the registry can hold
//!   heterogeneous handlers and replay persisted entries.

pub mod handler;
pub mod operation;
pub mod registry;

pub use self::handler::{DynHandler, FnHandler, Handler, TypedHandler};
pub use self::operation::Operation;
pub use self::registry::{OperationRegistry, RegistryError};
