//! Watch graph: which directory each raw handle watches, and how those
//! directories nest.

mod subtree;
mod watch_graph;


pub use subtree::*;
pub use watch_graph::*;

use std::path::Path;
use std::path::PathBuf;

/// Watched directory joined with the event's entry name, if any.
pub fn contextual_path(
    dir: &Path,
    name: Option<&str>,
) -> PathBuf {
    match name {
        Some(name) if !name.is_empty() => dir.join(name),
        _ => dir.to_path_buf(),
    }
}
