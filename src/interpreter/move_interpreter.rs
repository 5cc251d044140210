use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;

use super::EventSink;
use crate::contextual_path;
use crate::CoalescedEvent;
use crate::Error;
use crate::RawEvent;
use crate::RawWatcher;
use crate::RecursiveWatchManager;
use crate::Result;
use crate::SubtreeTxn;
use crate::WatchEvent;
use crate::WatchHandle;

/// Reconciles each event against the watch graph, then dispatches it.
///
/// Directory creations and arrivals grow the graph, deletions and departures
/// shrink it, matched move pairs rebase it in place. A failed graph update is
/// reported and the event is still delivered.
pub struct MoveInterpreter<W: RawWatcher> {
    manager: Arc<RecursiveWatchManager<W>>,
    suppress_source_events_on_move: bool,
}

impl<W: RawWatcher> MoveInterpreter<W> {
    pub fn new(
        manager: Arc<RecursiveWatchManager<W>>,
        suppress_source_events_on_move: bool,
    ) -> Self {
        Self {
            manager,
            suppress_source_events_on_move,
        }
    }

    pub fn manager(&self) -> &Arc<RecursiveWatchManager<W>> {
        &self.manager
    }

    pub fn process(
        &self,
        event: CoalescedEvent,
    ) {
        match event {
            CoalescedEvent::Plain(raw) => self.process_plain(raw),
            CoalescedEvent::Move { from, to } => self.process_move(from, to),
        }
    }

    fn process_plain(
        &self,
        raw: RawEvent,
    ) {
        if raw.mask.is_overflow() {
            self.manager.notify_primitive_overflow();
            return;
        }
        let Some(root) = self.manager.root_of(raw.handle) else {
            trace!(handle = %raw.handle, mask = %raw.mask, "unknown handle, event discarded");
            return;
        };

        let resolved = self.manager.graph().with_subtree(root, |txn| {
            let Some(path) = locate(txn, &raw) else {
                return Ok(None);
            };
            let reconciled = self.reconcile(txn, &raw, &path);
            Ok(Some((path, reconciled)))
        });
        let Ok(Some((path, reconciled))) = resolved else {
            trace!(handle = %raw.handle, "handle retired, event discarded");
            return;
        };
        if let Err(e) = reconciled {
            self.manager.report_reconcile_failure(&raw, e);
        }

        let retired_root = raw.mask.is_ignored() && raw.handle == root;
        self.manager.deliver(&resolved_event(root, raw, path));
        if retired_root {
            self.manager.retire_subscription(root);
        }
    }

    fn reconcile(
        &self,
        txn: &mut SubtreeTxn<'_, W>,
        raw: &RawEvent,
        path: &Path,
    ) -> Result<()> {
        let mask = raw.mask;
        if mask.is_ignored() {
            return txn.forget(raw.handle);
        }
        if !mask.is_dir() {
            return Ok(());
        }

        if mask.is_create() {
            self.manager.add_subtree_in(txn, raw.handle, path).map(|_| ())
        } else if mask.is_moved_to() {
            // Unpaired: arrived from outside, or the pair was never matched
            self.adopt(txn, raw.handle, path)
        } else if mask.is_moved_from() || mask.is_delete() {
            remove_if_watched(txn, path)
        } else {
            Ok(())
        }
    }

    /// Watch the directory now at `path`, dropping whatever watch it replaced.
    fn adopt(
        &self,
        txn: &mut SubtreeTxn<'_, W>,
        parent: WatchHandle,
        path: &Path,
    ) -> Result<()> {
        remove_if_watched(txn, path)?;
        self.manager.add_subtree_in(txn, parent, path).map(|_| ())
    }

    fn process_move(
        &self,
        from: RawEvent,
        to: RawEvent,
    ) {
        let from_root = self.manager.root_of(from.handle);
        let to_root = self.manager.root_of(to.handle);

        match (from_root, to_root) {
            (None, None) => {
                trace!(cookie = from.cookie, "move between unknown handles discarded");
            }
            // Destination retired: the subtree just left
            (Some(_), None) => self.process_plain(from),
            (None, Some(_)) => self.process_plain(to),
            (Some(a), Some(b)) => {
                let (from_path, to_path) = if a == b {
                    self.reconcile_within(a, &from, &to)
                } else {
                    self.reconcile_across(a, b, &from, &to)
                };
                self.deliver_move(a, b, from, from_path, to, to_path);
            }
        }
    }

    /// Both halves under one root: one transaction.
    fn reconcile_within(
        &self,
        root: WatchHandle,
        from: &RawEvent,
        to: &RawEvent,
    ) -> (Option<PathBuf>, Option<PathBuf>) {
        let is_dir = from.mask.is_dir() || to.mask.is_dir();
        let resolved = self.manager.graph().with_subtree(root, |txn| {
            let from_path = locate(txn, from);
            let to_path = locate(txn, to);
            let reconciled = match (&from_path, &to_path) {
                _ if !is_dir => Ok(()),
                (Some(f), Some(t)) => self.rebase_moved(txn, to.handle, f, t),
                (Some(f), None) => remove_if_watched(txn, f),
                (None, Some(t)) => self.adopt(txn, to.handle, t),
                (None, None) => Ok(()),
            };
            Ok((from_path, to_path, reconciled))
        });

        match resolved {
            Ok((from_path, to_path, reconciled)) => {
                if let Err(e) = reconciled {
                    self.manager.report_reconcile_failure(to, e);
                }
                (from_path, to_path)
            }
            Err(_) => (None, None),
        }
    }

    fn rebase_moved(
        &self,
        txn: &mut SubtreeTxn<'_, W>,
        new_parent: WatchHandle,
        from_path: &Path,
        to_path: &Path,
    ) -> Result<()> {
        let Some(moved) = txn.resolve_handle(from_path) else {
            return self.adopt(txn, new_parent, to_path);
        };
        if let Some(replaced) = txn.resolve_handle(to_path) {
            if replaced != moved {
                txn.remove_recursive(replaced)?;
            }
        }
        txn.rebase(moved, Some(new_parent), to_path)
    }

    /// Halves under different roots: leave one tree, then join the other.
    ///
    /// The two transactions run one after the other, never nested.
    fn reconcile_across(
        &self,
        from_root: WatchHandle,
        to_root: WatchHandle,
        from: &RawEvent,
        to: &RawEvent,
    ) -> (Option<PathBuf>, Option<PathBuf>) {
        let is_dir = from.mask.is_dir() || to.mask.is_dir();
        let graph = self.manager.graph();

        let departed = graph.with_subtree(from_root, |txn| {
            let path = locate(txn, from);
            let reconciled = match &path {
                Some(p) if is_dir => remove_if_watched(txn, p),
                _ => Ok(()),
            };
            Ok((path, reconciled))
        });
        let arrived = graph.with_subtree(to_root, |txn| {
            let path = locate(txn, to);
            let reconciled = match &path {
                Some(p) if is_dir => self.adopt(txn, to.handle, p),
                _ => Ok(()),
            };
            Ok((path, reconciled))
        });

        let from_path = self.settle(from, departed);
        let to_path = self.settle(to, arrived);
        (from_path, to_path)
    }

    fn settle(
        &self,
        raw: &RawEvent,
        outcome: Result<(Option<PathBuf>, Result<()>)>,
    ) -> Option<PathBuf> {
        let (path, reconciled) = outcome.ok()?;
        if let Err(e) = reconciled {
            self.manager.report_reconcile_failure(raw, e);
        }
        path
    }

    fn deliver_move(
        &self,
        from_root: WatchHandle,
        to_root: WatchHandle,
        from: RawEvent,
        from_path: Option<PathBuf>,
        to: RawEvent,
        to_path: Option<PathBuf>,
    ) {
        match (from_path, to_path) {
            (Some(from_path), Some(to_path)) => {
                let from_event = resolved_event(from_root, from, from_path);
                let to_event = resolved_event(to_root, to, to_path);
                if !self.suppress_source_events_on_move {
                    self.manager.deliver(&from_event);
                    self.manager.deliver(&to_event);
                }

                let merged = WatchEvent::merged_move(to_root, from_event, to_event);
                if from_root != to_root {
                    self.manager.deliver(&merged.for_root(from_root));
                }
                self.manager.deliver(&merged);
            }
            (Some(from_path), None) => {
                self.manager
                    .deliver(&resolved_event(from_root, from, from_path));
            }
            (None, Some(to_path)) => {
                self.manager.deliver(&resolved_event(to_root, to, to_path));
            }
            (None, None) => {
                trace!(cookie = from.cookie, "both move halves retired, discarded");
            }
        }
    }
}

impl<W: RawWatcher> EventSink for MoveInterpreter<W> {
    fn accept(
        &self,
        event: RawEvent,
    ) {
        self.process(event.into());
    }

    fn overflow(
        &self,
        dropped: &RawEvent,
    ) {
        self.manager.notify_queue_overflow(dropped);
    }

    fn report(
        &self,
        err: Error,
    ) {
        self.manager.report(err);
    }
}

/// Contextual path of `raw`, `None` when its handle left the graph.
fn locate<W: RawWatcher>(
    txn: &SubtreeTxn<'_, W>,
    raw: &RawEvent,
) -> Option<PathBuf> {
    txn.resolve_path(raw.handle)
        .map(|dir| contextual_path(dir, raw.name.as_deref()))
}

fn remove_if_watched<W: RawWatcher>(
    txn: &mut SubtreeTxn<'_, W>,
    path: &Path,
) -> Result<()> {
    match txn.resolve_handle(path) {
        Some(handle) => txn.remove_recursive(handle).map(|_| ()),
        None => Ok(()),
    }
}

fn resolved_event(
    root: WatchHandle,
    raw: RawEvent,
    path: PathBuf,
) -> WatchEvent {
    WatchEvent {
        root,
        handle: raw.handle,
        mask: raw.mask,
        cookie: raw.cookie,
        name: raw.name,
        path,
        moved: None,
    }
}
