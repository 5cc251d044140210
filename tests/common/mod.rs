use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tempfile::TempDir;
use treewatch::BufferConfig;
use treewatch::ChannelListener;
use treewatch::EventMask;
use treewatch::InotifyWatcher;
use treewatch::ListenerMessage;
use treewatch::ServiceConfig;
use treewatch::TreeWatcher;
use treewatch::TreeWatcherBuilder;
use treewatch::WatchEvent;
use treewatch::WatchHandle;
use treewatch::WatcherConfig;

/// Upper bound for anything the kernel and the pipeline have to do
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

pub fn test_config(
    buffer_enabled: bool,
    queue_capacity: usize,
) -> WatcherConfig {
    WatcherConfig {
        buffer: BufferConfig {
            enabled: buffer_enabled,
            delay_ms: 50,
            ..BufferConfig::default()
        },
        service: ServiceConfig {
            queue_capacity,
            poll_interval_ms: 20,
            error_report_capacity: 64,
        },
    }
}

pub struct WatchedTree {
    pub dir: TempDir,
    pub watcher: TreeWatcher<InotifyWatcher>,
    pub root: WatchHandle,
    pub rx: Receiver<ListenerMessage>,
}

impl WatchedTree {
    /// Watch a fresh temporary directory, pre-populated with `dirs`.
    pub fn new(
        config: WatcherConfig,
        dirs: &[&str],
    ) -> Self {
        enable_logger();
        let dir = tempfile::tempdir().unwrap();
        for d in dirs {
            std::fs::create_dir_all(dir.path().join(d)).unwrap();
        }

        let (primitive, source) = InotifyWatcher::new().unwrap();
        let watcher = TreeWatcherBuilder::from_config(config, Arc::new(primitive), source)
            .build()
            .unwrap();
        let root = watcher.watch_tree(dir.path(), EventMask::ALL_EVENTS).unwrap();
        let (listener, rx) = ChannelListener::new();
        watcher.add_listener(root, listener).unwrap();

        Self {
            dir,
            watcher,
            root,
            rx,
        }
    }

    pub fn path(
        &self,
        rel: &str,
    ) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn is_watched(
        &self,
        rel: &str,
    ) -> bool {
        self.watcher.resolve_handle(self.path(rel)).is_some()
    }
}

/// Wait for the first event satisfying `predicate`, skipping the others.
pub fn wait_for(
    rx: &Receiver<ListenerMessage>,
    predicate: impl Fn(&WatchEvent) -> bool,
) -> Option<WatchEvent> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(ListenerMessage::Event(e)) if predicate(&e) => return Some(e),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

/// Everything delivered until the stream stays quiet for `quiet`.
pub fn collect_quiet(
    rx: &Receiver<ListenerMessage>,
    quiet: Duration,
) -> Vec<ListenerMessage> {
    let mut received = Vec::new();
    while let Ok(message) = rx.recv_timeout(quiet) {
        received.push(message);
    }
    received
}

pub fn is_dir_create(
    event: &WatchEvent,
    path: &Path,
) -> bool {
    event.mask.is_create() && event.is_dir() && event.path == path
}

/// Poll `condition` until it holds or the timeout passes.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
