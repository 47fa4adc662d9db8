//! Per-call retry state machine.
//!
//! ```text
//! Idle -> Attempting -> Idle                      (success)
//!                    -> Waiting -> Attempting     (retryable failure)
//!                    -> Failed                    (non-retryable, or attempts used up)
//! Waiting -> Cancelled                            (cancel)
//! ```
//!
//! While offline the wait does not fire. On reconnect it fires at once if its
//! deadline has already passed, otherwise at the deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::BackoffConfig;
use crate::domain::OperationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffState {
    #[default]
    Idle,
    Attempting {
        attempt: u32,
    },
    Waiting {
        attempt: u32,
        delay: Duration,
    },
    Failed {
        attempts: u32,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("not retryable after {attempts} attempt(s): {source}")]
    NonRetryable { attempts: u32, source: OperationError },

    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted { attempts: u32, source: OperationError },

    #[error("retry cancelled")]
    Cancelled,
}

type RetryCallback = Box<dyn Fn(u32, Duration) + Send + Sync>;
type SuccessCallback = Box<dyn Fn() + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&BackoffError) + Send + Sync>;

struct Controls {
    state: watch::Sender<BackoffState>,
    cancel: watch::Sender<bool>,
    retry_now: watch::Sender<u64>,
}

/// Manual controls for a running [`BackoffController`], usable from other
/// tasks (a "retry" or "cancel" button).
#[derive(Clone)]
pub struct BackoffHandle {
    controls: Arc<Controls>,
}

impl BackoffHandle {
    /// Skip the current wait. Returns false when nothing is waiting.
    pub fn retry_now(&self) -> bool {
        if !matches!(*self.controls.state.borrow(), BackoffState::Waiting { .. }) {
            return false;
        }
        self.controls.retry_now.send_modify(|n| *n = n.wrapping_add(1));
        true
    }

    /// Stop retrying. Takes effect at the next wait; an attempt already
    /// running is allowed to finish.
    pub fn cancel(&self) {
        self.controls.cancel.send_replace(true);
    }

    pub fn state(&self) -> BackoffState {
        *self.controls.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<BackoffState> {
        self.controls.state.subscribe()
    }
}

impl std::fmt::Debug for BackoffHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffHandle")
            .field("state", &self.state())
            .finish()
    }
}

pub struct BackoffController {
    config: BackoffConfig,
    retry_if: Box<dyn Fn(&OperationError) -> bool + Send + Sync>,
    connectivity: Option<watch::Receiver<bool>>,
    controls: Arc<Controls>,
    cancel_rx: watch::Receiver<bool>,
    retry_rx: watch::Receiver<u64>,
    on_retry: Option<RetryCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

enum WaitOutcome {
    Elapsed,
    Skipped,
    Cancelled,
}

impl BackoffController {
    /// By default only transient (network, timeout) errors are retried.
    pub fn new(config: BackoffConfig) -> Self {
        let (state, _) = watch::channel(BackoffState::Idle);
        let (cancel, cancel_rx) = watch::channel(false);
        let (retry_now, retry_rx) = watch::channel(0);
        Self {
            config,
            retry_if: Box::new(OperationError::is_transient),
            connectivity: None,
            controls: Arc::new(Controls {
                state,
                cancel,
                retry_now,
            }),
            cancel_rx,
            retry_rx,
            on_retry: None,
            on_success: None,
            on_error: None,
        }
    }

    pub fn retry_if(mut self, predicate: impl Fn(&OperationError) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Box::new(predicate);
        self
    }

    /// Pause waits while `connectivity` reports offline.
    pub fn connectivity(mut self, connectivity: watch::Receiver<bool>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Called with the failed attempt number and the delay before the next.
    pub fn on_retry(mut self, f: impl Fn(u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&BackoffError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn handle(&self) -> BackoffHandle {
        BackoffHandle {
            controls: self.controls.clone(),
        }
    }

    pub fn state(&self) -> BackoffState {
        *self.controls.state.borrow()
    }

    /// Clear a cancellation and return to `Idle`, so the controller can run
    /// again.
    pub fn reset(&mut self) {
        self.controls.cancel.send_replace(false);
        self.cancel_rx.borrow_and_update();
        self.set_state(BackoffState::Idle);
    }

    /// Drive `operation` (called with the 1-based attempt number) until it
    /// succeeds, fails for good, or the controller is cancelled.
    pub async fn run<T, F, Fut>(&mut self, mut operation: F) -> Result<T, BackoffError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if *self.cancel_rx.borrow() {
                return Err(self.cancelled());
            }
            attempt += 1;
            self.set_state(BackoffState::Attempting { attempt });

            let error = match operation(attempt).await {
                Ok(value) => {
                    self.set_state(BackoffState::Idle);
                    if let Some(cb) = &self.on_success {
                        cb();
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !(self.retry_if)(&error) {
                return Err(self.fail(BackoffError::NonRetryable {
                    attempts: attempt,
                    source: error,
                }));
            }
            if attempt >= max_attempts {
                return Err(self.fail(BackoffError::Exhausted {
                    attempts: attempt,
                    source: error,
                }));
            }

            let delay = self.config.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "attempt failed; backing off");
            // Mark earlier presses seen before `retry_now` can observe Waiting.
            self.retry_rx.borrow_and_update();
            self.set_state(BackoffState::Waiting { attempt, delay });
            if let Some(cb) = &self.on_retry {
                cb(attempt, delay);
            }

            match self.wait(delay).await {
                WaitOutcome::Elapsed | WaitOutcome::Skipped => {}
                WaitOutcome::Cancelled => return Err(self.cancelled()),
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> WaitOutcome {
        let deadline = Instant::now() + delay;

        loop {
            let offline = self
                .connectivity
                .as_mut()
                .is_some_and(|rx| !*rx.borrow_and_update());

            if offline {
                debug!("offline; backoff wait paused");
                tokio::select! {
                    online = wait_for_connectivity(&mut self.connectivity, true) => {
                        if !online {
                            self.connectivity = None;
                        }
                    }
                    _ = cancel_requested(&mut self.cancel_rx) => return WaitOutcome::Cancelled,
                    _ = self.retry_rx.changed() => return WaitOutcome::Skipped,
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::Elapsed,
                _ = cancel_requested(&mut self.cancel_rx) => return WaitOutcome::Cancelled,
                _ = self.retry_rx.changed() => return WaitOutcome::Skipped,
                offline = wait_for_connectivity(&mut self.connectivity, false) => {
                    if !offline {
                        self.connectivity = None;
                    }
                }
            }
        }
    }

    fn fail(&self, error: BackoffError) -> BackoffError {
        let attempts = match &error {
            BackoffError::NonRetryable { attempts, .. } | BackoffError::Exhausted { attempts, .. } => *attempts,
            BackoffError::Cancelled => 0,
        };
        warn!(attempts, error = %error, "giving up");
        self.set_state(BackoffState::Failed { attempts });
        if let Some(cb) = &self.on_error {
            cb(&error);
        }
        error
    }

    fn cancelled(&self) -> BackoffError {
        debug!("backoff cancelled");
        self.set_state(BackoffState::Cancelled);
        BackoffError::Cancelled
    }

    fn set_state(&self, state: BackoffState) {
        self.controls.state.send_replace(state);
    }
}

impl std::fmt::Debug for BackoffController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffController")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolves once connectivity equals `online`. Returns false if the source
/// is gone; never resolves without a source.
async fn wait_for_connectivity(rx: &mut Option<watch::Receiver<bool>>, online: bool) -> bool {
    match rx {
        Some(rx) => rx.wait_for(|current| *current == online).await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
