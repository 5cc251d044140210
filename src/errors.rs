//! Recursive Watch Error Hierarchy
//!
//! Defines the error types for the recursive watch engine, categorized by the
//! layer that raises them: watch graph maintenance, the delivery service, and
//! configuration.
//!
//! A queue overflow is deliberately absent: back-pressure is a signaled
//! condition delivered to listeners as [`crate::QueueOverflow`], not an error.

use std::path::PathBuf;

use config::ConfigError;

use crate::WatchHandle;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Watch graph and raw primitive failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Delivery pipeline lifecycle failures
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Filesystem access outside of a registration call (directory listing)
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Operation referenced a handle that is not currently registered.
    /// Recovered locally by discarding the event or operation.
    #[error("Watch handle {0} is not registered")]
    InvalidHandle(WatchHandle),

    /// The raw primitive rejected a register call
    #[error("Failed to register watch for {path:?}")]
    RegistrationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The raw primitive rejected a deregister call
    #[error("Failed to deregister watch handle {handle}")]
    DeregistrationFailed {
        handle: WatchHandle,
        #[source]
        source: std::io::Error,
    },

    /// A graph invariant would be violated. Never expected in correct operation.
    #[error("Watch graph inconsistency: {0}")]
    GraphInconsistency(String),

    /// The path (or the inode behind it) is already watched by some root
    #[error("{path:?} is already watched (handle {handle})")]
    AlreadyWatched { path: PathBuf, handle: WatchHandle },

    /// Roots must be directories
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),

    /// No watched node carries this path
    #[error("No watch registered for path {0:?}")]
    UnknownPath(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Delivery service is already running")]
    AlreadyRunning,

    #[error("Delivery service is not running")]
    NotRunning,

    /// Stopping is final: the raw source went down with the producer
    #[error("Delivery service was stopped and cannot be restarted")]
    Stopped,

    #[error("Failed to spawn {name} thread")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The raw event source failed while being polled
    #[error("Raw event source failed")]
    SourceFailed(#[source] std::io::Error),
}

impl Error {
    /// True when the error only means a handle was already retired.
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Error::Watch(WatchError::InvalidHandle(_)))
    }
}
