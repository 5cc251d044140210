//! Boundary with the raw, flat, single-directory watch primitive.
//!
//! The recursive engine consumes the primitive only through these traits:
//! register/deregister one directory, and poll the ordered stream of raw
//! events. A handle whose watch became invalid is announced by an event
//! carrying [`EventMask::IGNORED`].

#[cfg(target_os = "linux")]
mod inotify;


use std::io;
use std::path::Path;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub use inotify::*;
#[cfg(test)]
use mockall::automock;

use crate::EventMask;
use crate::RawEvent;
use crate::WatchHandle;

/// Registration side of the raw primitive.
///
/// Implementations must be cheap to call: the manager invokes them while
/// holding a subtree lock.
#[cfg_attr(test, automock)]
pub trait RawWatcher: Send + Sync + 'static {
    fn register(
        &self,
        path: &Path,
        mask: EventMask,
    ) -> io::Result<WatchHandle>;

    fn deregister(
        &self,
        handle: WatchHandle,
    ) -> io::Result<()>;
}

/// Outcome of one poll of the raw event stream.
#[derive(Debug)]
pub enum SourcePoll {
    Events(Vec<RawEvent>),
    Timeout,
    /// The stream ended; no further events will arrive
    Closed,
}

/// Event side of the raw primitive.
pub trait RawEventSource: Send + 'static {
    /// Block for at most `timeout` waiting for the next batch of events.
    fn poll_events(
        &mut self,
        timeout: Duration,
    ) -> io::Result<SourcePoll>;
}
