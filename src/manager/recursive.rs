use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use dashmap::DashMap;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::Subscription;
use crate::metrics::ERROR_REPORTS_DROPPED;
use crate::metrics::EVENTS_DELIVERED;
use crate::metrics::OVERFLOW_DELIVERY_QUEUE;
use crate::metrics::OVERFLOW_PRIMITIVE;
use crate::metrics::QUEUE_OVERFLOWS;
use crate::metrics::RECONCILE_FAILURES;
use crate::DeliveryStats;
use crate::Error;
use crate::EventListener;
use crate::EventMask;
use crate::OverflowSource;
use crate::QueueOverflow;
use crate::RawEvent;
use crate::RawWatcher;
use crate::Result;
use crate::SubtreeTxn;
use crate::WatchError;
use crate::WatchEvent;
use crate::WatchGraph;
use crate::WatchHandle;

/// Keeps one raw watch per directory of every watched tree.
///
/// Owns the [`WatchGraph`], the per-root listener lists and the error
/// channel. Everything that mutates the graph, whether a caller or the
/// interpreter reacting to events, goes through here.
pub struct RecursiveWatchManager<W: RawWatcher> {
    graph: WatchGraph<W>,
    subscriptions: DashMap<WatchHandle, Arc<Subscription>>,
    stats: Arc<DeliveryStats>,
    error_tx: Sender<Error>,
    error_rx: Receiver<Error>,
}

impl<W: RawWatcher> RecursiveWatchManager<W> {
    pub fn new(
        primitive: Arc<W>,
        error_report_capacity: usize,
    ) -> Self {
        let (error_tx, error_rx) = bounded(error_report_capacity.max(1));
        Self {
            graph: WatchGraph::new(primitive),
            subscriptions: DashMap::new(),
            stats: Arc::new(DeliveryStats::new()),
            error_tx,
            error_rx,
        }
    }

    pub fn graph(&self) -> &WatchGraph<W> {
        &self.graph
    }

    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// Failures raised by background work (walks, event reconciliation).
    ///
    /// Bounded: reports arriving while the channel is full are dropped.
    pub fn errors(&self) -> Receiver<Error> {
        self.error_rx.clone()
    }

    /// Watch `root_path` and every directory below it.
    ///
    /// Returns once the existing tree is covered. Every directory is watched
    /// before it is listed, so a directory created under a parent the walk
    /// already listed is missed by the walk itself. It is picked up when its
    /// create event is processed; if the kernel queue overflowed and dropped
    /// that event, it stays unwatched.
    pub fn watch_tree(
        &self,
        root_path: impl AsRef<Path>,
        user_mask: EventMask,
    ) -> Result<WatchHandle> {
        let root_path = root_path.as_ref();
        if !fs::metadata(root_path)?.is_dir() {
            return Err(WatchError::NotADirectory(root_path.to_path_buf()).into());
        }

        let root = self.graph.insert(None, root_path, user_mask.watcher_mask())?;
        self.subscriptions
            .insert(root, Arc::new(Subscription::new(root, user_mask)));

        let covered = self
            .graph
            .with_subtree(root, |txn| Ok(self.walk(txn, root, root_path)))?;
        debug!(%root, path = ?root_path, %user_mask, directories = covered + 1, "tree watched");
        Ok(root)
    }

    /// Stop watching the tree of `root` entirely.
    pub fn unwatch_tree(
        &self,
        root: WatchHandle,
    ) -> Result<()> {
        self.retire_root(root).map(|_| ())
    }

    fn retire_root(
        &self,
        root: WatchHandle,
    ) -> Result<usize> {
        if !self.graph.is_root(root) {
            return Err(WatchError::InvalidHandle(root).into());
        }

        let removed = self.graph.with_subtree(root, |txn| txn.remove_recursive(root));
        self.subscriptions.remove(&root);
        let count = removed?;
        debug!(%root, directories = count, "tree unwatched");
        Ok(count)
    }

    /// Watch a directory that appeared below `parent`, plus anything already in it.
    pub fn add_subtree(
        &self,
        parent: WatchHandle,
        path: impl AsRef<Path>,
    ) -> Result<WatchHandle> {
        let root = self
            .graph
            .root_of(parent)
            .ok_or(WatchError::InvalidHandle(parent))?;
        self.graph
            .with_subtree(root, |txn| self.add_subtree_in(txn, parent, path.as_ref()))
    }

    /// Drop the listeners of a root whose watch the primitive invalidated.
    pub(crate) fn retire_subscription(
        &self,
        root: WatchHandle,
    ) {
        if !self.graph.is_root(root) && self.subscriptions.remove(&root).is_some() {
            debug!(%root, "watch root invalidated, listeners dropped");
        }
    }

    /// Remove the watch on `path` and everything below it, deepest first.
    pub fn remove_subtree(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<usize> {
        let path = path.as_ref();
        let unknown = || Error::from(WatchError::UnknownPath(path.to_path_buf()));
        let handle = self.graph.resolve_handle(path).ok_or_else(unknown)?;
        let root = self.graph.root_of(handle).ok_or_else(unknown)?;
        if root == handle {
            return self.retire_root(root);
        }
        self.graph.with_subtree(root, |txn| txn.remove_path(path))
    }

    /// [`add_subtree`](Self::add_subtree) inside an open transaction.
    ///
    /// Already watched paths are returned as they are.
    pub(crate) fn add_subtree_in(
        &self,
        txn: &mut SubtreeTxn<'_, W>,
        parent: WatchHandle,
        path: &Path,
    ) -> Result<WatchHandle> {
        if let Some(existing) = txn.resolve_handle(path) {
            trace!(%existing, ?path, "subtree already watched");
            return Ok(existing);
        }

        let handle = txn.insert(parent, path)?;
        let covered = self.walk(txn, handle, path);
        trace!(%handle, ?path, directories = covered + 1, "subtree added");
        Ok(handle)
    }

    /// Breadth-first registration of every directory below `start`.
    ///
    /// Failures are reported and skipped; returns how many were added.
    fn walk(
        &self,
        txn: &mut SubtreeTxn<'_, W>,
        start: WatchHandle,
        start_path: &Path,
    ) -> usize {
        let mut added = 0;
        let mut pending = VecDeque::from([(start, start_path.to_path_buf())]);

        while let Some((handle, dir)) = pending.pop_front() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                // Gone already: its own delete event will follow
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(?dir, "directory vanished before listing");
                    continue;
                }
                Err(e) => {
                    warn!(?dir, "could not list directory: {}", e);
                    self.report(e.into());
                    continue;
                }
            };

            for entry in entries.flatten() {
                // Symlinks are not followed
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                let child_path = entry.path();
                match txn.insert(handle, &child_path) {
                    Ok(child) => {
                        added += 1;
                        pending.push_back((child, child_path));
                    }
                    Err(Error::Watch(WatchError::AlreadyWatched { handle: existing, .. })) => {
                        debug!(path = ?child_path, %existing, "skipping directory watched elsewhere");
                    }
                    Err(e) => {
                        warn!(path = ?child_path, "could not watch directory: {}", e);
                        self.report(e);
                    }
                }
            }
        }
        added
    }

    pub fn add_listener(
        &self,
        root: WatchHandle,
        listener: Arc<dyn EventListener>,
    ) -> Result<()> {
        let subscription = self.subscription(root)?;
        subscription.add(listener, subscription.mask());
        trace!(%root, listeners = subscription.listener_count(), "listener added");
        Ok(())
    }

    /// Like [`add_listener`](Self::add_listener) with a narrower mask.
    ///
    /// Bits outside the root's mask are never reported by the primitive, so
    /// they never match.
    pub fn add_listener_with_mask(
        &self,
        root: WatchHandle,
        listener: Arc<dyn EventListener>,
        mask: EventMask,
    ) -> Result<()> {
        let subscription = self.subscription(root)?;
        subscription.add(listener, mask);
        Ok(())
    }

    pub fn remove_listener(
        &self,
        root: WatchHandle,
        listener: &Arc<dyn EventListener>,
    ) -> Result<bool> {
        let removed = self.subscription(root)?.remove(listener);
        trace!(%root, removed, "listener removed");
        Ok(removed)
    }

    fn subscription(
        &self,
        root: WatchHandle,
    ) -> Result<Arc<Subscription>> {
        self.subscriptions
            .get(&root)
            .map(|e| e.value().clone())
            .ok_or_else(|| WatchError::InvalidHandle(root).into())
    }

    pub fn resolve_path(
        &self,
        handle: WatchHandle,
    ) -> Option<PathBuf> {
        self.graph.resolve_path(handle)
    }

    pub fn resolve_handle(
        &self,
        path: impl AsRef<Path>,
    ) -> Option<WatchHandle> {
        self.graph.resolve_handle(path.as_ref())
    }

    pub fn root_of(
        &self,
        handle: WatchHandle,
    ) -> Option<WatchHandle> {
        self.graph.root_of(handle)
    }

    pub fn roots(&self) -> Vec<WatchHandle> {
        self.graph.roots()
    }

    /// Every directory watched under `root`, root first, pre-order.
    pub fn watched_paths(
        &self,
        root: WatchHandle,
    ) -> Result<Vec<PathBuf>> {
        self.graph.with_subtree(root, |txn| {
            Ok(txn
                .graph()
                .handles()
                .into_iter()
                .filter_map(|h| txn.resolve_path(h).map(Path::to_path_buf))
                .collect())
        })
    }

    pub fn watch_count(&self) -> usize {
        self.graph.watch_count()
    }

    /// Log, count and forward a failure nobody called for.
    pub(crate) fn report(
        &self,
        err: Error,
    ) {
        match self.error_tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => {
                warn!("error channel full, dropping report: {}", err);
                ERROR_REPORTS_DROPPED.inc();
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// A graph update triggered by `event` could not be completed.
    pub(crate) fn report_reconcile_failure(
        &self,
        event: &RawEvent,
        err: Error,
    ) {
        RECONCILE_FAILURES.inc();
        error!(handle = %event.handle, mask = %event.mask, name = ?event.name, "reconcile failed: {}", err);
        self.report(err);
    }

    /// Hand `event` to every listener of its root whose mask matches.
    ///
    /// No lock is held while listeners run.
    pub(crate) fn deliver(
        &self,
        event: &WatchEvent,
    ) -> usize {
        let Ok(subscription) = self.subscription(event.root) else {
            trace!(root = %event.root, "no subscription, event dropped");
            return 0;
        };

        let mut delivered = 0;
        for entry in subscription.snapshot().iter().filter(|e| e.wants(event.mask)) {
            let started = Instant::now();
            entry.listener.on_event(event);
            self.stats.record_service(started.elapsed());
            EVENTS_DELIVERED.inc();
            delivered += 1;
        }
        trace!(root = %event.root, path = ?event.path, mask = %event.mask, delivered, "event dispatched");
        delivered
    }

    fn notify_overflow(
        &self,
        overflow: QueueOverflow,
    ) {
        let Ok(subscription) = self.subscription(overflow.root) else {
            return;
        };
        for entry in subscription.snapshot().iter() {
            entry.listener.on_overflow(&overflow);
        }
    }

    /// The delivery queue had no room for `dropped`.
    ///
    /// Only its root hears about it, or every root when the handle is unknown.
    pub(crate) fn notify_queue_overflow(
        &self,
        dropped: &RawEvent,
    ) {
        self.stats.record_overflow();
        QUEUE_OVERFLOWS.with_label_values(&[OVERFLOW_DELIVERY_QUEUE]).inc();
        let source = OverflowSource::DeliveryQueue {
            handle: dropped.handle,
            mask: dropped.mask,
        };

        let roots = match self.graph.root_of(dropped.handle) {
            Some(root) => vec![root],
            None => self.graph.roots(),
        };
        warn!(handle = %dropped.handle, mask = %dropped.mask, roots = roots.len(), "delivery queue overflow");
        for root in roots {
            self.notify_overflow(QueueOverflow { root, source });
        }
    }

    /// The primitive itself lost events; every root is affected.
    pub(crate) fn notify_primitive_overflow(&self) {
        self.stats.record_overflow();
        QUEUE_OVERFLOWS.with_label_values(&[OVERFLOW_PRIMITIVE]).inc();
        warn!("raw primitive queue overflow");
        for root in self.graph.roots() {
            self.notify_overflow(QueueOverflow {
                root,
                source: OverflowSource::Primitive,
            });
        }
    }
}
