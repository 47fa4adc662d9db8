//! Handlers and their type-erased form.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::operation::Operation;
use crate::domain::OperationError;

/// Executes one operation type.
#[async_trait]
pub trait Handler<O: Operation>: Send + Sync {
    async fn handle(&self, operation: O) -> Result<O::Output, OperationError>;
}

/// Object-safe handler over JSON payloads, stored in the registry.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: Value) -> Result<Value, OperationError>;

    /// Whether `payload` decodes into this handler's operation type.
    fn accepts(&self, payload: &Value) -> bool;

    fn key(&self) -> &str;
}

pub struct TypedHandler<O: Operation, H: Handler<O>> {
    handler: H,
    _marker: PhantomData<fn(O)>,
}

impl<O: Operation, H: Handler<O>> TypedHandler<O, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<O: Operation, H: Handler<O>> DynHandler for TypedHandler<O, H> {
    async fn handle_dyn(&self, payload: Value) -> Result<Value, OperationError> {
        let operation: O = serde_json::from_value(payload)
            .map_err(|e| OperationError::validation(format!("payload decode for {}: {e}", O::KEY)))?;
        let output = self.handler.handle(operation).await?;
        serde_json::to_value(output)
            .map_err(|e| OperationError::internal(format!("output encode for {}: {e}", O::KEY)))
    }

    fn accepts(&self, payload: &Value) -> bool {
        serde_json::from_value::<O>(payload.clone()).is_ok()
    }

    fn key(&self) -> &str {
        O::KEY
    }
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<O, F, Fut> Handler<O> for FnHandler<F>
where
    O: Operation,
    F: Fn(O) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O::Output, OperationError>> + Send,
{
    async fn handle(&self, operation: O) -> Result<O::Output, OperationError> {
        (self.f)(operation).await
    }
}
