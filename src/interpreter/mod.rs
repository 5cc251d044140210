//! Turns raw events into graph updates and listener deliveries.

mod move_interpreter;


#[cfg(test)]
use mockall::automock;
pub use move_interpreter::*;

use tracing::warn;

use crate::Error;
use crate::RawEvent;
use crate::Result;

/// Anything the delivery pipeline can hand raw events to: the interpreter
/// itself, or the delay buffer in front of it.
#[cfg_attr(test, automock)]
pub trait EventSink: Send + Sync + 'static {
    fn accept(
        &self,
        event: RawEvent,
    );

    /// `dropped` never made it into the delivery queue
    fn overflow(
        &self,
        dropped: &RawEvent,
    );

    /// Begin any background work the sink needs
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Finish outstanding work. Nothing is dispatched after this returns.
    fn stop(&self) {}

    /// A failure raised upstream of the sink, such as the raw source failing
    fn report(
        &self,
        err: Error,
    ) {
        warn!("upstream failure: {}", err);
    }
}
