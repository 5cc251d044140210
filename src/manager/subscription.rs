use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::same_listener;
use crate::EventListener;
use crate::EventMask;
use crate::WatchHandle;

#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub(crate) mask: EventMask,
    pub(crate) listener: Arc<dyn EventListener>,
}

impl ListenerEntry {
    /// The directory flag alone never selects an event
    pub(crate) fn wants(
        &self,
        event_mask: EventMask,
    ) -> bool {
        event_mask.intersects(self.mask & !EventMask::ISDIR)
    }
}

/// Listeners of one root.
///
/// The list is copy-on-write: dispatch works on a snapshot and never sees a
/// listener added or removed halfway through.
pub struct Subscription {
    root: WatchHandle,
    mask: EventMask,
    listeners: ArcSwap<Vec<ListenerEntry>>,
}

impl Subscription {
    pub(crate) fn new(
        root: WatchHandle,
        mask: EventMask,
    ) -> Self {
        Self {
            root,
            mask,
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn root(&self) -> WatchHandle {
        self.root
    }

    /// Mask the root was watched with
    pub fn mask(&self) -> EventMask {
        self.mask
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<ListenerEntry>> {
        self.listeners.load_full()
    }

    pub(crate) fn add(
        &self,
        listener: Arc<dyn EventListener>,
        mask: EventMask,
    ) {
        let entry = ListenerEntry { mask, listener };
        self.listeners.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(entry.clone());
            next
        });
    }

    /// Drop every registration of `listener`; false when none existed.
    pub(crate) fn remove(
        &self,
        listener: &Arc<dyn EventListener>,
    ) -> bool {
        let previous = self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|e| !same_listener(&e.listener, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|e| same_listener(&e.listener, listener))
    }
}
