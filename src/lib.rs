//! Recursive, rename-aware directory watching.
//!
//! A flat, single-directory notification primitive (inotify on Linux) is
//! turned into a tree-aware service:
//! - one raw watch per directory of each watched tree, kept in step with the
//!   filesystem as directories appear, vanish and move;
//! - stable contextual paths on every event;
//! - matched moved-from/moved-to pairs merged into one move event, optionally
//!   within a delay window;
//! - a bounded producer/consumer pipeline that signals overflow rather than
//!   blocking the primitive.
//!
//! ```ignore
//! use treewatch::{ChannelListener, EventMask, TreeWatcherBuilder};
//!
//! let watcher = TreeWatcherBuilder::inotify()?.build()?;
//! let root = watcher.watch_tree("/srv/data", EventMask::ALL_EVENTS)?;
//! let (listener, events) = ChannelListener::new();
//! watcher.add_listener(root, listener)?;
//! watcher.start()?;
//! ```

mod buffer;
mod config;
mod constants;
mod errors;
mod event;
mod graph;
mod interpreter;
mod manager;
pub mod metrics;
mod primitive;
mod service;
mod watcher;

pub use buffer::*;
pub use config::*;
pub use errors::*;
pub use event::*;
pub use graph::*;
pub use interpreter::*;
pub use manager::*;
pub use primitive::*;
pub use service::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
