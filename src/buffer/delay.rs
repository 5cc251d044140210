use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use crate::CoalescedEvent;
use crate::RawEvent;

/// One buffered event and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    pub event: CoalescedEvent,
    pub enqueued_at: Instant,
}

/// Time window in which a moved-from waits for its moved-to.
///
/// Events leave in arrival order once they are `delay` old. A due moved-from
/// whose cookie matches a later moved-to is folded into that entry, so the
/// merged move leaves at the moved-to's position. Every event leaves exactly
/// once.
///
/// Holds no clock of its own: callers pass the current instant.
#[derive(Debug)]
pub struct DelayBuffer {
    delay: Duration,
    queue: VecDeque<PendingEvent>,
}

impl DelayBuffer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            queue: VecDeque::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(
        &mut self,
        event: RawEvent,
        now: Instant,
    ) {
        self.queue.push_back(PendingEvent {
            event: CoalescedEvent::Plain(event),
            enqueued_at: now,
        });
    }

    /// When the oldest entry becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.front().map(|p| p.enqueued_at + self.delay)
    }

    /// Release every entry at least `delay` old at `now`.
    pub fn drain_due(
        &mut self,
        now: Instant,
    ) -> Vec<CoalescedEvent> {
        let delay = self.delay;
        self.drain_while(|p| now.saturating_duration_since(p.enqueued_at) >= delay)
    }

    /// Release everything regardless of age. Pairs are still merged.
    pub fn drain_all(&mut self) -> Vec<CoalescedEvent> {
        self.drain_while(|_| true)
    }

    fn drain_while(
        &mut self,
        due: impl Fn(&PendingEvent) -> bool,
    ) -> Vec<CoalescedEvent> {
        let mut released = Vec::new();

        while self.queue.front().is_some_and(&due) {
            let Some(pending) = self.queue.pop_front() else {
                break;
            };
            match pending.event {
                CoalescedEvent::Plain(from) if from.is_pairable_moved_from() => {
                    match self.position_of_match(&from) {
                        Some(i) => {
                            let slot = &mut self.queue[i].event;
                            if let CoalescedEvent::Plain(to) = slot {
                                let to = to.clone();
                                *slot = CoalescedEvent::Move { from, to };
                            }
                        }
                        None => released.push(CoalescedEvent::Plain(from)),
                    }
                }
                event => released.push(event),
            }
        }
        released
    }

    /// First later moved-to completing `from`, in arrival order
    fn position_of_match(
        &self,
        from: &RawEvent,
    ) -> Option<usize> {
        self.queue.iter().position(|p| match &p.event {
            CoalescedEvent::Plain(to) => to.completes(from),
            CoalescedEvent::Move { .. } => false,
        })
    }
}
