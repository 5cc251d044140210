//! Producer/consumer delivery between the raw primitive and a sink.

mod monitor;
mod stats;


pub use monitor::*;
pub use stats::*;
