//! Error types for the transcript monitor.
//!
//! Nothing in the monitor is fatal: every variant here ends up logged by the
//! poll loop, which then moves on to the next session or the next cycle.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading transcripts or persisting monitor state.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failure reported by a downstream message callback.
#[derive(Error, Debug)]
#[error("delivery failed: {message}")]
pub struct DeliveryError {
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
