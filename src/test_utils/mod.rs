//! Fakes and helpers shared by the unit tests
mod common;
mod fake_fs;
mod scripted_source;

pub use common::*;
pub use fake_fs::*;
pub use scripted_source::*;
