use std::io;
use std::time::Duration;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;

use crate::RawEvent;
use crate::RawEventSource;
use crate::SourcePoll;

/// Raw event source fed by the test through a channel.
///
/// Dropping the sender closes the source.
pub struct ScriptedSource {
    batches: Receiver<io::Result<Vec<RawEvent>>>,
}

impl ScriptedSource {
    pub fn new() -> (Sender<io::Result<Vec<RawEvent>>>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self { batches: rx })
    }
}

impl RawEventSource for ScriptedSource {
    fn poll_events(
        &mut self,
        timeout: Duration,
    ) -> io::Result<SourcePoll> {
        match self.batches.recv_timeout(timeout) {
            Ok(batch) => batch.map(SourcePoll::Events),
            Err(RecvTimeoutError::Timeout) => Ok(SourcePoll::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(SourcePoll::Closed),
        }
    }
}
