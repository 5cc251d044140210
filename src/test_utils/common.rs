use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;

use crate::EventMask;
use crate::ListenerMessage;
use crate::QueueOverflow;
use crate::RawEvent;
use crate::WatchEvent;
use crate::WatchHandle;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Create every relative directory under `root`.
pub fn make_dirs(
    root: &Path,
    dirs: &[&str],
) -> Vec<PathBuf> {
    dirs.iter()
        .map(|d| {
            let path = root.join(d);
            std::fs::create_dir_all(&path).unwrap();
            path
        })
        .collect()
}

pub fn raw(
    handle: WatchHandle,
    mask: EventMask,
    name: &str,
) -> RawEvent {
    RawEvent::new(handle, mask, 0, Some(name))
}

pub fn raw_move(
    handle: WatchHandle,
    mask: EventMask,
    cookie: u32,
    name: &str,
) -> RawEvent {
    RawEvent::new(handle, mask, cookie, Some(name))
}

pub fn mkdir_event(
    handle: WatchHandle,
    name: &str,
) -> RawEvent {
    raw(handle, EventMask::CREATE | EventMask::ISDIR, name)
}

/// Everything delivered so far, without waiting.
pub fn drain_events(rx: &Receiver<ListenerMessage>) -> Vec<WatchEvent> {
    rx.try_iter()
        .filter_map(|m| match m {
            ListenerMessage::Event(e) => Some(e),
            ListenerMessage::Overflow(_) => None,
        })
        .collect()
}

pub fn drain_overflows(rx: &Receiver<ListenerMessage>) -> Vec<QueueOverflow> {
    rx.try_iter()
        .filter_map(|m| match m {
            ListenerMessage::Overflow(o) => Some(o),
            ListenerMessage::Event(_) => None,
        })
        .collect()
}

/// Collect events until `count` arrived or `timeout` passed.
pub fn wait_for_events(
    rx: &Receiver<ListenerMessage>,
    count: usize,
    timeout: Duration,
) -> Vec<WatchEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while events.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(ListenerMessage::Event(e)) => events.push(e),
            Ok(ListenerMessage::Overflow(_)) => {}
            Err(_) => break,
        }
    }
    events
}
