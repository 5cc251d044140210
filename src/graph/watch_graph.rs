use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::SubtreeGraph;
use super::WatchNode;
use crate::metrics::ACTIVE_WATCHES;
use crate::metrics::REGISTRATION_FAILURES;
use crate::EventMask;
use crate::RawWatcher;
use crate::Result;
use crate::WatchError;
use crate::WatchHandle;

/// Forest of watched trees over one raw primitive.
///
/// Each root owns its [`SubtreeGraph`] behind its own mutex; every mutation
/// and every multi-step read goes through [`WatchGraph::with_subtree`].
/// The owner index maps any registered handle to its root without locking.
pub struct WatchGraph<W: RawWatcher> {
    primitive: Arc<W>,
    subtrees: DashMap<WatchHandle, Arc<Mutex<SubtreeGraph>>>,
    owners: DashMap<WatchHandle, WatchHandle>,
}

/// Exclusive access to one root's graph, with the primitive at hand.
pub struct SubtreeTxn<'a, W: RawWatcher> {
    graph: &'a mut SubtreeGraph,
    primitive: &'a W,
    owners: &'a DashMap<WatchHandle, WatchHandle>,
}

impl<W: RawWatcher> WatchGraph<W> {
    pub fn new(primitive: Arc<W>) -> Self {
        Self {
            primitive,
            subtrees: DashMap::new(),
            owners: DashMap::new(),
        }
    }

    pub fn primitive(&self) -> &Arc<W> {
        &self.primitive
    }

    /// Register `path` and link it into the forest.
    ///
    /// Without a parent the directory becomes a new root.
    pub fn insert(
        &self,
        parent: Option<WatchHandle>,
        path: &Path,
        mask: EventMask,
    ) -> Result<WatchHandle> {
        match parent {
            None => self.create_root(path, mask),
            Some(parent) => {
                let root = self.root_of(parent).ok_or(WatchError::InvalidHandle(parent))?;
                self.with_subtree(root, |txn| txn.insert(parent, path))
            }
        }
    }

    fn create_root(
        &self,
        path: &Path,
        mask: EventMask,
    ) -> Result<WatchHandle> {
        if let Some(handle) = self.resolve_handle(path) {
            return Err(WatchError::AlreadyWatched {
                path: path.to_path_buf(),
                handle,
            }
            .into());
        }

        let handle = register(&*self.primitive, path, mask)?;
        match self.owners.entry(handle) {
            Entry::Occupied(e) => {
                // Same inode reached through another path; the watch is not ours to drop
                return Err(WatchError::AlreadyWatched {
                    path: path.to_path_buf(),
                    handle: *e.key(),
                }
                .into());
            }
            Entry::Vacant(e) => {
                e.insert(handle);
            }
        }

        self.subtrees.insert(
            handle,
            Arc::new(Mutex::new(SubtreeGraph::new(handle, path.to_path_buf(), mask))),
        );
        ACTIVE_WATCHES.inc();
        debug!(root = %handle, ?path, %mask, "watch root created");
        Ok(handle)
    }

    /// Run `f` while holding the lock of `root`'s graph.
    ///
    /// Fails with `InvalidHandle` when `root` is not (or no longer) a root.
    /// A subtree left empty by `f` is retired.
    pub fn with_subtree<R>(
        &self,
        root: WatchHandle,
        f: impl FnOnce(&mut SubtreeTxn<'_, W>) -> Result<R>,
    ) -> Result<R> {
        let subtree = self
            .subtrees
            .get(&root)
            .map(|e| e.value().clone())
            .ok_or(WatchError::InvalidHandle(root))?;

        let mut graph = subtree.lock();
        if graph.is_empty() {
            return Err(WatchError::InvalidHandle(root).into());
        }

        let mut txn = SubtreeTxn {
            graph: &mut graph,
            primitive: &*self.primitive,
            owners: &self.owners,
        };
        let result = f(&mut txn);
        let emptied = graph.is_empty();
        drop(graph);

        if emptied {
            self.subtrees.remove_if(&root, |_, v| Arc::ptr_eq(v, &subtree));
            debug!(%root, "watch root retired");
        }
        result
    }

    pub fn root_of(
        &self,
        handle: WatchHandle,
    ) -> Option<WatchHandle> {
        self.owners.get(&handle).map(|e| *e.value())
    }

    pub fn is_root(
        &self,
        handle: WatchHandle,
    ) -> bool {
        self.subtrees.contains_key(&handle)
    }

    pub fn resolve_path(
        &self,
        handle: WatchHandle,
    ) -> Option<PathBuf> {
        let root = self.root_of(handle)?;
        self.with_subtree(root, |txn| Ok(txn.resolve_path(handle).map(Path::to_path_buf)))
            .ok()
            .flatten()
    }

    pub fn resolve_handle(
        &self,
        path: &Path,
    ) -> Option<WatchHandle> {
        // Guards must be gone before any subtree lock is taken
        let subtrees: Vec<_> = self.subtrees.iter().map(|e| e.value().clone()).collect();
        subtrees.into_iter().find_map(|subtree| {
            let graph = subtree.lock();
            match graph.root_path() {
                Some(root_path) if path.starts_with(root_path) => graph.resolve_handle(path),
                _ => None,
            }
        })
    }

    /// Root handles in ascending order
    pub fn roots(&self) -> Vec<WatchHandle> {
        let mut roots: Vec<_> = self.subtrees.iter().map(|e| *e.key()).collect();
        roots.sort();
        roots
    }

    /// Raw watches currently held across all roots
    pub fn watch_count(&self) -> usize {
        self.owners.len()
    }

    /// Check every subtree plus the owner index against them.
    pub fn verify(&self) -> Result<()> {
        let mut total = 0;
        for root in self.roots() {
            let counted = self.with_subtree(root, |txn| {
                txn.graph.check_invariants()?;
                for handle in txn.graph.handles() {
                    if self.owners.get(&handle).map(|e| *e.value()) != Some(root) {
                        return Err(WatchError::GraphInconsistency(format!(
                            "{handle} is not indexed under root {root}"
                        ))
                        .into());
                    }
                }
                Ok(txn.graph.len())
            });
            match counted {
                Ok(n) => total += n,
                // Retired between listing and locking
                Err(e) if e.is_invalid_handle() => {}
                Err(e) => return Err(e),
            }
        }

        let owned = self.owners.len();
        if owned != total {
            return Err(WatchError::GraphInconsistency(format!(
                "owner index holds {owned} handles, subtrees hold {total}"
            ))
            .into());
        }
        Ok(())
    }
}

fn register<W: RawWatcher>(
    primitive: &W,
    path: &Path,
    mask: EventMask,
) -> Result<WatchHandle> {
    primitive.register(path, mask).map_err(|source| {
        REGISTRATION_FAILURES.inc();
        WatchError::RegistrationFailed {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

impl<W: RawWatcher> SubtreeTxn<'_, W> {
    pub fn root(&self) -> WatchHandle {
        self.graph.root()
    }

    pub fn graph(&self) -> &SubtreeGraph {
        self.graph
    }

    pub fn node(
        &self,
        handle: WatchHandle,
    ) -> Option<&WatchNode> {
        self.graph.node(handle)
    }

    pub fn resolve_handle(
        &self,
        path: &Path,
    ) -> Option<WatchHandle> {
        self.graph.resolve_handle(path)
    }

    pub fn resolve_path(
        &self,
        handle: WatchHandle,
    ) -> Option<&Path> {
        self.graph.resolve_path(handle)
    }

    pub fn descendants_of(
        &self,
        handle: WatchHandle,
    ) -> Vec<WatchHandle> {
        self.graph.descendants_of(handle)
    }

    /// Register `path` as a child of `parent` in this subtree.
    pub fn insert(
        &mut self,
        parent: WatchHandle,
        path: &Path,
    ) -> Result<WatchHandle> {
        if let Some(handle) = self.graph.resolve_handle(path) {
            return Err(WatchError::AlreadyWatched {
                path: path.to_path_buf(),
                handle,
            }
            .into());
        }
        if !self.graph.contains(parent) {
            return Err(WatchError::InvalidHandle(parent).into());
        }

        let handle = register(self.primitive, path, self.graph.mask())?;
        match self.owners.entry(handle) {
            Entry::Occupied(e) => {
                return Err(WatchError::AlreadyWatched {
                    path: path.to_path_buf(),
                    handle: *e.key(),
                }
                .into());
            }
            Entry::Vacant(e) => {
                e.insert(self.graph.root());
            }
        }

        if let Err(e) = self.graph.attach(parent, handle, path.to_path_buf()) {
            self.owners.remove(&handle);
            if let Err(rollback) = self.primitive.deregister(handle) {
                warn!(%handle, ?path, "rollback deregister failed: {}", rollback);
            }
            return Err(e);
        }

        ACTIVE_WATCHES.inc();
        trace!(root = %self.graph.root(), %parent, %handle, ?path, "watch inserted");
        Ok(handle)
    }

    /// Deregister and unlink a childless node.
    ///
    /// Bookkeeping is dropped even when the primitive refuses: a handle the
    /// kernel already retired answers EINVAL, which is not reported.
    pub fn remove(
        &mut self,
        handle: WatchHandle,
    ) -> Result<()> {
        let node = self.graph.detach(handle)?;
        self.owners.remove(&handle);
        ACTIVE_WATCHES.dec();
        trace!(root = %self.graph.root(), %handle, path = ?node.path, "watch removed");

        match self.primitive.deregister(handle) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                debug!(%handle, "watch was already gone: {}", e);
                Ok(())
            }
            Err(source) => Err(WatchError::DeregistrationFailed { handle, source }.into()),
        }
    }

    /// Remove `handle` and everything below it, deepest first.
    ///
    /// Keeps going past failures and returns the first one.
    pub fn remove_recursive(
        &mut self,
        handle: WatchHandle,
    ) -> Result<usize> {
        if !self.graph.contains(handle) {
            return Err(WatchError::InvalidHandle(handle).into());
        }

        let mut doomed = self.graph.descendants_of(handle);
        doomed.reverse();
        doomed.push(handle);

        let mut first_error = None;
        let count = doomed.len();
        for h in doomed {
            if let Err(e) = self.remove(h) {
                warn!(%h, "remove failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Remove the node watching `path` together with its descendants.
    pub fn remove_path(
        &mut self,
        path: &Path,
    ) -> Result<usize> {
        let handle = self
            .graph
            .resolve_handle(path)
            .ok_or_else(|| WatchError::UnknownPath(path.to_path_buf()))?;
        self.remove_recursive(handle)
    }

    /// Drop a node whose handle the primitive already invalidated.
    ///
    /// Descendants still registered are deregistered normally.
    pub fn forget(
        &mut self,
        handle: WatchHandle,
    ) -> Result<()> {
        if !self.graph.contains(handle) {
            return Err(WatchError::InvalidHandle(handle).into());
        }

        let mut first_error = None;
        let mut below = self.graph.descendants_of(handle);
        below.reverse();
        for h in below {
            if let Err(e) = self.remove(h) {
                first_error.get_or_insert(e);
            }
        }

        let node = self.graph.detach(handle)?;
        self.owners.remove(&handle);
        ACTIVE_WATCHES.dec();
        debug!(root = %self.graph.root(), %handle, path = ?node.path, "watch forgotten");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn rebase(
        &mut self,
        handle: WatchHandle,
        new_parent: Option<WatchHandle>,
        new_path: &Path,
    ) -> Result<()> {
        self.graph.rebase(handle, new_parent, new_path.to_path_buf())?;
        trace!(root = %self.graph.root(), %handle, ?new_path, "watch rebased");
        Ok(())
    }
}
