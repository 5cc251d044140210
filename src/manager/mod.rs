//! Recursive watch management: one raw watch per directory of each watched
//! tree, kept in step with the [`WatchGraph`](crate::WatchGraph), plus the
//! listeners subscribed to each root.

mod recursive;
mod subscription;


pub use recursive::*;
pub use subscription::*;
