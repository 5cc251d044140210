use std::sync::Arc;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::unbounded;

use super::QueueOverflow;
use super::WatchEvent;

/// Subscriber callback for one root.
///
/// Callbacks run inline on the delivering thread (the consumer thread in
/// service mode). A callback that blocks stalls every later delivery.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(
        &self,
        event: &WatchEvent,
    );

    /// Events were lost for this listener's root
    fn on_overflow(
        &self,
        overflow: &QueueOverflow,
    ) {
        let _ = overflow;
    }
}

/// Listener identity is the allocation behind the `Arc`.
pub(crate) fn same_listener(
    a: &Arc<dyn EventListener>,
    b: &Arc<dyn EventListener>,
) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Adapts a closure into an [`EventListener`]; overflows are ignored.
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: Fn(&WatchEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&WatchEvent) + Send + Sync + 'static,
{
    fn on_event(
        &self,
        event: &WatchEvent,
    ) {
        (self.0)(event)
    }
}

/// What a [`ChannelListener`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerMessage {
    Event(WatchEvent),
    Overflow(QueueOverflow),
}

/// Forwards every notification into an unbounded channel, moving the actual
/// handling off the delivering thread.
pub struct ChannelListener {
    sender: Sender<ListenerMessage>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, Receiver<ListenerMessage>) {
        let (sender, receiver) = unbounded();
        (Arc::new(Self { sender }), receiver)
    }
}

impl EventListener for ChannelListener {
    fn on_event(
        &self,
        event: &WatchEvent,
    ) {
        // Receiver gone means nobody is interested any more
        let _ = self.sender.send(ListenerMessage::Event(event.clone()));
    }

    fn on_overflow(
        &self,
        overflow: &QueueOverflow,
    ) {
        let _ = self.sender.send(ListenerMessage::Overflow(*overflow));
    }
}
