use std::collections::HashMap;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::EventMask;
use crate::RawWatcher;
use crate::WatchHandle;

type RegisterHook = Box<dyn Fn(&Path) + Send + Sync>;

/// In-memory raw primitive.
///
/// Paths are never checked against a real filesystem. Registering a path that
/// is already watched returns the existing handle, the way inotify answers
/// for an inode it already watches.
#[derive(Default)]
pub struct FakeFs {
    state: Mutex<FakeFsState>,
    on_register: Mutex<Option<RegisterHook>>,
}

#[derive(Default)]
struct FakeFsState {
    next_handle: i32,
    by_handle: HashMap<WatchHandle, PathBuf>,
    by_path: HashMap<PathBuf, WatchHandle>,
    masks: HashMap<WatchHandle, EventMask>,
    failing: HashSet<PathBuf>,
    deregistered: Vec<WatchHandle>,
}

impl FakeFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later `register(path)` fail with `PermissionDenied`.
    pub fn fail_on(
        &self,
        path: impl AsRef<Path>,
    ) {
        self.state.lock().failing.insert(path.as_ref().to_path_buf());
    }

    /// Run `hook` after every successful `register`, outside the fake's lock.
    ///
    /// Lets a test change the real directory tree in the middle of a walk.
    pub fn on_register(
        &self,
        hook: impl Fn(&Path) + Send + Sync + 'static,
    ) {
        *self.on_register.lock() = Some(Box::new(hook));
    }

    pub fn handle_of(
        &self,
        path: impl AsRef<Path>,
    ) -> Option<WatchHandle> {
        self.state.lock().by_path.get(path.as_ref()).copied()
    }

    pub fn path_of(
        &self,
        handle: WatchHandle,
    ) -> Option<PathBuf> {
        self.state.lock().by_handle.get(&handle).cloned()
    }

    pub fn mask_of(
        &self,
        handle: WatchHandle,
    ) -> Option<EventMask> {
        self.state.lock().masks.get(&handle).copied()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().by_handle.len()
    }

    pub fn deregistered(&self) -> Vec<WatchHandle> {
        self.state.lock().deregistered.clone()
    }

    /// Watches follow the renamed directory, as kernel watches follow inodes.
    pub fn rename(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) {
        let (from, to) = (from.as_ref(), to.as_ref());
        let mut state = self.state.lock();
        let moved: Vec<(PathBuf, WatchHandle)> = state
            .by_path
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, h)| (p.clone(), *h))
            .collect();
        for (old, handle) in moved {
            let suffix = old.strip_prefix(from).unwrap_or(Path::new("")).to_path_buf();
            let new = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            state.by_path.remove(&old);
            state.by_path.insert(new.clone(), handle);
            state.by_handle.insert(handle, new);
        }
    }

    /// Drop a watch behind the engine's back, as the kernel does on rmdir.
    pub fn retire(
        &self,
        handle: WatchHandle,
    ) {
        let mut state = self.state.lock();
        if let Some(path) = state.by_handle.remove(&handle) {
            state.by_path.remove(&path);
        }
        state.masks.remove(&handle);
    }
}

impl FakeFs {
    fn register_locked(
        &self,
        path: &Path,
        mask: EventMask,
    ) -> io::Result<WatchHandle> {
        let mut state = self.state.lock();
        if state.failing.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "register refused"));
        }
        if let Some(handle) = state.by_path.get(path).copied() {
            state.masks.insert(handle, mask);
            return Ok(handle);
        }

        state.next_handle += 1;
        let handle = WatchHandle(state.next_handle);
        state.by_path.insert(path.to_path_buf(), handle);
        state.by_handle.insert(handle, path.to_path_buf());
        state.masks.insert(handle, mask);
        Ok(handle)
    }
}

impl RawWatcher for FakeFs {
    fn register(
        &self,
        path: &Path,
        mask: EventMask,
    ) -> io::Result<WatchHandle> {
        let handle = self.register_locked(path, mask)?;
        if let Some(hook) = self.on_register.lock().as_ref() {
            hook(path);
        }
        Ok(handle)
    }

    fn deregister(
        &self,
        handle: WatchHandle,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        let path = state
            .by_handle
            .remove(&handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no such watch"))?;
        state.by_path.remove(&path);
        state.masks.remove(&handle);
        state.deregistered.push(handle);
        Ok(())
    }
}
