//! Error types for the watch and delivery layers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the watch registry and pipeline.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("failed to start native watch on {}: {reason}", path.display())]
    StartFailed { path: PathBuf, reason: String },

    #[error("failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("event channel closed unexpectedly")]
    ChannelClosed,

    #[error("internal error while processing event for {}: {reason}", path.display())]
    Internal { path: PathBuf, reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Per-subscriber delivery failures. Non-fatal: the failing subscriber is
/// dropped and no other subscriber observes the error.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,

    #[error("send timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("transport failure: {reason}")]
    Transport { reason: String },
}
