//! QueueBuilder: wiring and startup checks.
//!
//! - Operations are registered up front; `expect_operations` turns a missing
//!   registration into a startup error instead of entries silently dropped
//!   on reload.
//! - `spawn` rehydrates the persisted snapshot before the scheduler accepts
//!   its first command.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use super::EventBus;
use crate::config::QueueConfig;
use crate::domain::OperationError;
use crate::durable::{DurableStore, Persister};
use crate::impls::{InMemoryKeyValueStore, NetworkMonitor};
use crate::ports::{Clock, Connectivity, KeyValueStore, SystemClock};
use crate::queue::{RetryPredicate, RetryQueue, Scheduler};
use crate::typed::{Handler, Operation, OperationRegistry, RegistryError};

/// Builds and starts a [`RetryQueue`].
///
/// ```ignore
/// let queue = QueueBuilder::new()
///     .register::<SavePlant, _>(SavePlantHandler::new(api))?
///     .expect_operations(&[SavePlant::KEY])
///     .store(Arc::new(FileKeyValueStore::open(dir).await?))
///     .connectivity(monitor.clone())
///     .spawn()
///     .await?;
/// ```
pub struct QueueBuilder {
    registry: OperationRegistry,
    expected_operations: Option<Vec<String>>,
    config: QueueConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    clock: Arc<dyn Clock>,
    retry_if: Option<RetryPredicate>,
    bus: EventBus,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing operations: {0:?}. These operations were expected but not registered.")]
    MissingOperations(Vec<String>),
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            registry: OperationRegistry::new(),
            expected_operations: None,
            config: QueueConfig::default(),
            store: None,
            connectivity: None,
            clock: Arc::new(SystemClock),
            retry_if: None,
            bus: EventBus::new(),
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<O: Operation, H: Handler<O> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<O, H>(handler)?;
        Ok(self)
    }

    pub fn register_fn<O, F, Fut>(mut self, f: F) -> Result<Self, RegistryError>
    where
        O: Operation,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O::Output, OperationError>> + Send + 'static,
    {
        self.registry.register_fn::<O, F, Fut>(f)?;
        Ok(self)
    }

    pub fn expect_operations(mut self, keys: &[&str]) -> Self {
        self.expected_operations = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Defaults to an in-memory store, which does not survive restarts.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to always online.
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Failures rejected by `predicate` settle immediately instead of being
    /// retried. Without a predicate every failure is retried.
    pub fn retry_if(mut self, predicate: impl Fn(&OperationError) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// The bus the queue will publish on; subscribe here to observe
    /// rehydration.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    fn check_expected(&self) -> Result<(), BuildError> {
        if let Some(expected) = &self.expected_operations {
            let missing: Vec<String> = expected
                .iter()
                .filter(|key| !self.registry.contains(key))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingOperations(missing));
            }
        }
        Ok(())
    }

    /// Load persisted entries, start the writer and scheduler tasks, and
    /// return the handle. Must be called inside a tokio runtime.
    pub async fn spawn(self) -> Result<RetryQueue, BuildError> {
        self.check_expected()?;

        let config = self.config;
        let registry = Arc::new(self.registry);
        let kv = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(NetworkMonitor::online()));

        let durable = Arc::new(DurableStore::new(
            kv,
            config.storage_key.clone(),
            self.clock.clone(),
            config.ttl,
        ));
        let loaded = durable.load(&registry).await;

        let (persister, _writer) = Persister::spawn(durable.clone());
        let (done_tx, done_rx) = Scheduler::completion_channel();
        let connectivity_rx = connectivity.subscribe();
        let mut scheduler = Scheduler::new(
            config.clone(),
            registry.clone(),
            self.clock,
            connectivity,
            self.retry_if,
            self.bus.clone(),
            persister,
            done_tx,
        );
        let kept = scheduler.rehydrate(loaded);
        durable.save(&kept).await;

        let (commands, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        tokio::spawn(scheduler.run(commands_rx, done_rx, connectivity_rx));
        info!(
            operations = registry.len(),
            restored = kept.len(),
            max_concurrent = config.max_concurrent,
            "retry queue started"
        );

        Ok(RetryQueue::new(commands, self.bus))
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
