//! Operation registry: stable key -> type-erased handler.
//!
//! Built once at startup, before rehydration, then shared read-only with the
//! scheduler behind an `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::handler::{DynHandler, FnHandler, Handler, TypedHandler};
use super::operation::Operation;
use crate::domain::OperationError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("operation '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct OperationRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<O: Operation, H: Handler<O> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let key = O::KEY.to_string();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        self.handlers
            .insert(key, Arc::new(TypedHandler::<O, H>::new(handler)));
        Ok(())
    }

    /// Register an async closure for `O`.
    pub fn register_fn<O, F, Fut>(&mut self, f: F) -> Result<(), RegistryError>
    where
        O: Operation,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O::Output, OperationError>> + Send + 'static,
    {
        self.register::<O, _>(FnHandler::new(f))
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
