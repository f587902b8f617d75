//! Error types for the directory watcher.

use std::path::PathBuf;
use thiserror::Error;

use super::event::EventKind;

/// Errors from watch session and dispatch operations.
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    /// The directory cannot be watched. Raised synchronously from
    /// `WatchSession::new` or `WatchSession::start`.
    #[error("Cannot watch {path}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    #[error("Listener '{listener}' failed on {kind} {path}: {reason}")]
    ListenerFailed {
        listener: String,
        kind: EventKind,
        path: PathBuf,
        reason: String,
    },

    /// The native watch source failed while running. Terminal for the
    /// current run of the session.
    #[error("Watch source failed for {path}: {reason}")]
    Source { path: PathBuf, reason: String },

    #[error("Invalid name filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("Failed to load settings: {reason}")]
    Settings { reason: String },
}

impl WatchError {
    /// Build a configuration error from a notify error raised while
    /// registering or removing the OS watch.
    pub(crate) fn configuration(path: impl Into<PathBuf>, e: notify::Error) -> Self {
        WatchError::Configuration {
            path: path.into(),
            reason: e.to_string(),
        }
    }

    /// Build a source error from a notify error raised at run time.
    pub(crate) fn source(path: impl Into<PathBuf>, e: &notify::Error) -> Self {
        WatchError::Source {
            path: path.into(),
            reason: e.to_string(),
        }
    }

    /// True for failures that end the current run of a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WatchError::Configuration { .. } | WatchError::Source { .. }
        )
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
