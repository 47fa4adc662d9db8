//! Standalone exponential backoff for one-shot, non-queued calls such as
//! loading a screen's data.

pub mod config;
pub mod controller;

pub use self::config::BackoffConfig;
pub use self::controller::{BackoffController, BackoffError, BackoffHandle, BackoffState};
