//! Delay buffer: holds raw events for a short window so the two halves of a
//! rename can be merged before the interpreter sees them.

mod buffered;
mod delay;

#[cfg(test)]
mod buffered_test;

pub use buffered::*;
pub use delay::*;
