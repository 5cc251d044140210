use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use crate::EventMask;
use crate::Result;
use crate::WatchError;
use crate::WatchHandle;

/// One watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNode {
    pub handle: WatchHandle,
    pub path: PathBuf,
    /// Mask the directory was registered with
    pub mask: EventMask,
    pub root: WatchHandle,
    /// `None` only for the root
    pub parent: Option<WatchHandle>,
    pub children: BTreeSet<WatchHandle>,
}

/// Bookkeeping for one watched tree.
///
/// Pure data: never talks to the raw primitive. Every mutation keeps the
/// path/handle bijection and the `parent.path / basename` rule, or fails
/// without changing anything.
#[derive(Debug)]
pub struct SubtreeGraph {
    root: WatchHandle,
    mask: EventMask,
    nodes: HashMap<WatchHandle, WatchNode>,
    paths: HashMap<PathBuf, WatchHandle>,
}

fn inconsistency(msg: impl Into<String>) -> crate::Error {
    WatchError::GraphInconsistency(msg.into()).into()
}

impl SubtreeGraph {
    pub fn new(
        root: WatchHandle,
        path: PathBuf,
        mask: EventMask,
    ) -> Self {
        let node = WatchNode {
            handle: root,
            path: path.clone(),
            mask,
            root,
            parent: None,
            children: BTreeSet::new(),
        };
        Self {
            root,
            mask,
            nodes: HashMap::from([(root, node)]),
            paths: HashMap::from([(path, root)]),
        }
    }

    pub fn root(&self) -> WatchHandle {
        self.root
    }

    /// Path of the root, `None` once the root itself was removed
    pub fn root_path(&self) -> Option<&Path> {
        self.resolve_path(self.root)
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(
        &self,
        handle: WatchHandle,
    ) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn node(
        &self,
        handle: WatchHandle,
    ) -> Option<&WatchNode> {
        self.nodes.get(&handle)
    }

    pub fn resolve_handle(
        &self,
        path: &Path,
    ) -> Option<WatchHandle> {
        self.paths.get(path).copied()
    }

    pub fn resolve_path(
        &self,
        handle: WatchHandle,
    ) -> Option<&Path> {
        self.nodes.get(&handle).map(|n| n.path.as_path())
    }

    /// Link a freshly registered directory under `parent`.
    pub fn attach(
        &mut self,
        parent: WatchHandle,
        handle: WatchHandle,
        path: PathBuf,
    ) -> Result<()> {
        let parent_path = self
            .resolve_path(parent)
            .ok_or(WatchError::InvalidHandle(parent))?;
        if path.parent() != Some(parent_path) {
            return Err(inconsistency(format!(
                "{path:?} is not a direct child of {parent_path:?}"
            )));
        }
        if self.nodes.contains_key(&handle) {
            return Err(inconsistency(format!("{handle} is already attached")));
        }
        if let Some(existing) = self.resolve_handle(&path) {
            return Err(WatchError::AlreadyWatched {
                path,
                handle: existing,
            }
            .into());
        }

        self.paths.insert(path.clone(), handle);
        self.nodes.insert(
            handle,
            WatchNode {
                handle,
                path,
                mask: self.mask,
                root: self.root,
                parent: Some(parent),
                children: BTreeSet::new(),
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(handle);
        }
        Ok(())
    }

    /// Unlink a node that has no children left.
    pub fn detach(
        &mut self,
        handle: WatchHandle,
    ) -> Result<WatchNode> {
        let node = self
            .nodes
            .get(&handle)
            .ok_or(WatchError::InvalidHandle(handle))?;
        if !node.children.is_empty() {
            return Err(inconsistency(format!(
                "{handle} still has {} children",
                node.children.len()
            )));
        }

        let node = self
            .nodes
            .remove(&handle)
            .ok_or(WatchError::InvalidHandle(handle))?;
        self.paths.remove(&node.path);
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.remove(&handle);
        }
        Ok(node)
    }

    /// Pre-order walk below `handle`, excluding `handle` itself.
    pub fn descendants_of(
        &self,
        handle: WatchHandle,
    ) -> Vec<WatchHandle> {
        let mut out = Vec::new();
        let Some(node) = self.nodes.get(&handle) else {
            return out;
        };

        let mut stack: Vec<WatchHandle> = node.children.iter().rev().copied().collect();
        while let Some(h) = stack.pop() {
            out.push(h);
            if let Some(n) = self.nodes.get(&h) {
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    /// Move `handle` and everything below it to `new_path`, keeping handles.
    ///
    /// Descendant paths are rewritten by prefix substitution. `new_parent`
    /// must be `None` exactly when `handle` is the root.
    pub fn rebase(
        &mut self,
        handle: WatchHandle,
        new_parent: Option<WatchHandle>,
        new_path: PathBuf,
    ) -> Result<()> {
        let node = self
            .nodes
            .get(&handle)
            .ok_or(WatchError::InvalidHandle(handle))?;
        let old_path = node.path.clone();
        let old_parent = node.parent;

        let moved: Vec<WatchHandle> = std::iter::once(handle)
            .chain(self.descendants_of(handle))
            .collect();

        match new_parent {
            None if handle != self.root => {
                return Err(inconsistency(format!("{handle} is not a root and needs a parent")));
            }
            Some(_) if handle == self.root => {
                return Err(inconsistency(format!("root {handle} cannot be given a parent")));
            }
            Some(p) => {
                if moved.contains(&p) {
                    return Err(inconsistency(format!("{p} lies inside the subtree of {handle}")));
                }
                let parent_path = self.resolve_path(p).ok_or(WatchError::InvalidHandle(p))?;
                if new_path.parent() != Some(parent_path) {
                    return Err(inconsistency(format!(
                        "{new_path:?} is not a direct child of {parent_path:?}"
                    )));
                }
            }
            None => {}
        }

        let mut rewritten = Vec::with_capacity(moved.len());
        for h in &moved {
            let path = &self.nodes[h].path;
            let suffix = path.strip_prefix(&old_path).map_err(|_| {
                inconsistency(format!("{path:?} does not lie below {old_path:?}"))
            })?;
            let target = if suffix.as_os_str().is_empty() {
                new_path.clone()
            } else {
                new_path.join(suffix)
            };
            rewritten.push((*h, target));
        }

        let moving: HashSet<WatchHandle> = moved.iter().copied().collect();
        for (_, target) in &rewritten {
            if let Some(other) = self.paths.get(target) {
                if !moving.contains(other) {
                    return Err(WatchError::AlreadyWatched {
                        path: target.clone(),
                        handle: *other,
                    }
                    .into());
                }
            }
        }

        // All old keys go first so overlapping old/new paths cannot clash
        for h in &moved {
            let path = self.nodes[h].path.clone();
            self.paths.remove(&path);
        }
        for (h, target) in rewritten {
            self.paths.insert(target.clone(), h);
            if let Some(n) = self.nodes.get_mut(&h) {
                n.path = target;
            }
        }

        if old_parent != new_parent {
            if let Some(p) = old_parent.and_then(|p| self.nodes.get_mut(&p)) {
                p.children.remove(&handle);
            }
            if let Some(p) = new_parent.and_then(|p| self.nodes.get_mut(&p)) {
                p.children.insert(handle);
            }
            if let Some(n) = self.nodes.get_mut(&handle) {
                n.parent = new_parent;
            }
        }
        Ok(())
    }

    /// Every handle, root first, in pre-order
    pub fn handles(&self) -> Vec<WatchHandle> {
        if !self.nodes.contains_key(&self.root) {
            return Vec::new();
        }
        std::iter::once(self.root)
            .chain(self.descendants_of(self.root))
            .collect()
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return if self.paths.is_empty() {
                Ok(())
            } else {
                Err(inconsistency("empty subtree still indexes paths"))
            };
        }

        let root = self
            .nodes
            .get(&self.root)
            .ok_or_else(|| inconsistency(format!("root {} is missing", self.root)))?;
        if root.parent.is_some() {
            return Err(inconsistency(format!("root {} has a parent", self.root)));
        }
        if self.nodes.len() != self.paths.len() {
            return Err(inconsistency(format!(
                "{} nodes but {} indexed paths",
                self.nodes.len(),
                self.paths.len()
            )));
        }

        for (path, handle) in &self.paths {
            match self.nodes.get(handle) {
                Some(n) if &n.path == path => {}
                _ => return Err(inconsistency(format!("{path:?} indexes stale {handle}"))),
            }
        }

        for (handle, node) in &self.nodes {
            if node.root != self.root {
                return Err(inconsistency(format!("{handle} claims root {}", node.root)));
            }
            match node.parent {
                None if *handle != self.root => {
                    return Err(inconsistency(format!("{handle} has no parent")));
                }
                None => {}
                Some(p) => {
                    let parent = self
                        .nodes
                        .get(&p)
                        .ok_or_else(|| inconsistency(format!("{handle} has dangling parent {p}")))?;
                    if !parent.children.contains(handle) {
                        return Err(inconsistency(format!("{p} does not list child {handle}")));
                    }
                    if node.path.parent() != Some(parent.path.as_path()) {
                        return Err(inconsistency(format!(
                            "{:?} is not directly below {:?}",
                            node.path, parent.path
                        )));
                    }
                }
            }
            for child in &node.children {
                if self.nodes.get(child).and_then(|c| c.parent) != Some(*handle) {
                    return Err(inconsistency(format!("{child} does not point back to {handle}")));
                }
            }
        }

        if self.handles().len() != self.nodes.len() {
            return Err(inconsistency("nodes unreachable from the root"));
        }
        Ok(())
    }
}
