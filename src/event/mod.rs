//! Event model shared by every stage of the pipeline.
//!
//! - [`RawEvent`] is what the raw watch primitive produces: a handle, a mask,
//!   a rename cookie and an optional child name.
//! - [`CoalescedEvent`] is what the delay buffer hands to the interpreter: a
//!   raw event passed through, or a moved-from/moved-to pair merged by cookie.
//! - [`WatchEvent`] is what listeners receive: resolved against the watch
//!   graph, carrying the root it was delivered for and its contextual path.

mod listener;
mod mask;


use std::fmt;
use std::path::Path;
use std::path::PathBuf;

pub use listener::*;
pub use mask::*;

/// Opaque identifier of one registered directory watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(pub i32);

impl fmt::Display for WatchHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "wd:{}", self.0)
    }
}

/// One record read from the raw watch primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub handle: WatchHandle,
    pub mask: EventMask,
    /// Rename correlation token, zero when unused
    pub cookie: u32,
    /// Entry name relative to the watched directory; `None` when the event is
    /// about the watched directory itself
    pub name: Option<String>,
}

impl RawEvent {
    pub fn new(
        handle: WatchHandle,
        mask: EventMask,
        cookie: u32,
        name: Option<&str>,
    ) -> Self {
        Self {
            handle,
            mask,
            cookie,
            name: name.map(str::to_owned),
        }
    }

    /// A moved-from that can take part in cookie pairing
    pub fn is_pairable_moved_from(&self) -> bool {
        self.mask.is_moved_from() && self.cookie != 0
    }

    /// The moved-to half matching `from`
    pub fn completes(
        &self,
        from: &RawEvent,
    ) -> bool {
        self.mask.is_moved_to() && self.cookie != 0 && self.cookie == from.cookie
    }
}

/// Unit of work handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoalescedEvent {
    /// A raw event delivered as-is
    Plain(RawEvent),
    /// A moved-from merged with the moved-to sharing its cookie
    Move { from: RawEvent, to: RawEvent },
}

impl From<RawEvent> for CoalescedEvent {
    fn from(event: RawEvent) -> Self {
        CoalescedEvent::Plain(event)
    }
}

/// Event as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Root subscription this delivery belongs to
    pub root: WatchHandle,
    /// Watch the event was raised on
    pub handle: WatchHandle,
    pub mask: EventMask,
    pub cookie: u32,
    pub name: Option<String>,
    /// Contextual path: the watched directory joined with `name`
    pub path: PathBuf,
    /// Set on synthesized moves only
    pub moved: Option<Box<MoveDetails>>,
}

/// The two halves of a synthesized move, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveDetails {
    pub from: WatchEvent,
    pub to: WatchEvent,
}

impl WatchEvent {
    /// Build the synthesized move from its two halves.
    ///
    /// The mask is the union of both halves plus [`EventMask::MOVED_FROM_TO`];
    /// the path is the destination.
    pub fn merged_move(
        root: WatchHandle,
        from: WatchEvent,
        to: WatchEvent,
    ) -> Self {
        Self {
            root,
            handle: to.handle,
            mask: from.mask | to.mask | EventMask::MOVED_FROM_TO,
            cookie: from.cookie,
            name: to.name.clone(),
            path: to.path.clone(),
            moved: Some(Box::new(MoveDetails { from, to })),
        }
    }

    pub fn is_move(&self) -> bool {
        self.moved.is_some()
    }

    pub fn is_dir(&self) -> bool {
        self.mask.is_dir()
    }

    /// Source path of a synthesized move
    pub fn from_path(&self) -> Option<&Path> {
        self.moved.as_ref().map(|m| m.from.path.as_path())
    }

    /// Destination path of a synthesized move
    pub fn to_path(&self) -> Option<&Path> {
        self.moved.as_ref().map(|m| m.to.path.as_path())
    }

    /// Same event re-addressed to another root's listeners
    pub(crate) fn for_root(
        &self,
        root: WatchHandle,
    ) -> Self {
        let mut event = self.clone();
        event.root = root;
        event
    }
}

/// Where a loss signal originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowSource {
    /// The bounded delivery queue was full; the event was not queued
    DeliveryQueue { handle: WatchHandle, mask: EventMask },
    /// The raw primitive reported its own queue overflowed
    Primitive,
}

/// Back-pressure signal: events were lost for this root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOverflow {
    pub root: WatchHandle,
    pub source: OverflowSource,
}
