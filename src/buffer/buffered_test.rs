use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tempfile::TempDir;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::drain_events;
use crate::test_utils::raw;
use crate::test_utils::raw_move;
use crate::test_utils::wait_for_events;
use crate::test_utils::FakeFs;
use crate::BufferConfig;
use crate::ChannelListener;
use crate::Error;
use crate::EventMask;
use crate::FnListener;
use crate::ListenerMessage;
use crate::MoveInterpreter;
use crate::RecursiveWatchManager;
use crate::ServiceError;
use crate::WatchEvent;
use crate::WatchHandle;

struct Fixture {
    _dir: TempDir,
    root: WatchHandle,
    buffered: BufferedInterpreter<FakeFs>,
    rx: Receiver<ListenerMessage>,
}

fn fixture(
    delay_ms: u64,
    flush_on_stop: bool,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecursiveWatchManager::new(FakeFs::new(), 16));
    let root = manager.watch_tree(dir.path(), EventMask::ALL_EVENTS).unwrap();
    let (listener, rx) = ChannelListener::new();
    manager.add_listener(root, listener).unwrap();
    let config = BufferConfig {
        enabled: true,
        delay_ms,
        suppress_source_events_on_move: true,
        flush_on_stop,
    };
    let interpreter = MoveInterpreter::new(manager, config.suppress_source_events_on_move);
    Fixture {
        _dir: dir,
        root,
        buffered: BufferedInterpreter::new(interpreter, &config),
        rx,
    }
}

#[test]
fn test_events_wait_for_window() {
    let f = fixture(10_000, true);

    f.buffered.accept(raw(f.root, EventMask::CREATE, "a"));

    assert_eq!(f.buffered.pending(), 1);
    assert!(drain_events(&f.rx).is_empty());
}

#[test]
fn test_timer_releases_due_events() {
    let f = fixture(20, true);
    f.buffered.start().unwrap();

    f.buffered.accept(raw(f.root, EventMask::CREATE, "a"));
    let events = wait_for_events(&f.rx, 1, Duration::from_secs(2));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name.as_deref(), Some("a"));
    f.buffered.stop();
}

#[test]
fn test_listener_can_query_pending_during_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecursiveWatchManager::new(FakeFs::new(), 16));
    let root = manager.watch_tree(dir.path(), EventMask::ALL_EVENTS).unwrap();
    let config = BufferConfig {
        enabled: true,
        delay_ms: 20,
        suppress_source_events_on_move: true,
        flush_on_stop: true,
    };
    let buffered = Arc::new(BufferedInterpreter::new(
        MoveInterpreter::new(manager.clone(), true),
        &config,
    ));

    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
    let weak = Arc::downgrade(&buffered);
    let listener = FnListener::new(move |_event: &WatchEvent| {
        if let Some(buffered) = weak.upgrade() {
            let _ = seen_tx.send(buffered.pending());
        }
    });
    manager.add_listener(root, listener).unwrap();

    buffered.start().unwrap();
    buffered.accept(raw(root, EventMask::CREATE, "a"));
    let pending = seen_rx.recv_timeout(Duration::from_secs(3));
    assert_eq!(pending, Ok(0));

    // Arrivals are still accepted while the timer thread is delivering
    buffered.accept(raw(root, EventMask::CREATE, "b"));
    assert_eq!(seen_rx.recv_timeout(Duration::from_secs(3)), Ok(0));
    buffered.stop();
}

#[test]
fn test_rename_halves_become_one_move() {
    let f = fixture(20, true);
    f.buffered.start().unwrap();

    f.buffered.accept(raw_move(f.root, EventMask::MOVED_FROM, 11, "old.txt"));
    f.buffered.accept(raw_move(f.root, EventMask::MOVED_TO, 11, "new.txt"));
    let events = wait_for_events(&f.rx, 1, Duration::from_secs(2));
    f.buffered.stop();

    assert_eq!(events.len(), 1);
    assert!(events[0].is_move());
    assert!(drain_events(&f.rx).is_empty());
}

#[test]
fn test_start_twice_is_rejected() {
    let f = fixture(50, true);
    f.buffered.start().unwrap();

    let err = f.buffered.start().unwrap_err();

    assert!(matches!(err, Error::Service(ServiceError::AlreadyRunning)));
    f.buffered.stop();
}

#[test]
fn test_stop_flushes_pending_events() {
    let f = fixture(10_000, true);
    f.buffered.start().unwrap();
    f.buffered.accept(raw(f.root, EventMask::CREATE, "a"));
    f.buffered.accept(raw_move(f.root, EventMask::MOVED_FROM, 3, "x"));
    f.buffered.accept(raw_move(f.root, EventMask::MOVED_TO, 3, "y"));

    f.buffered.stop();

    let events = drain_events(&f.rx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name.as_deref(), Some("a"));
    assert!(events[1].is_move());
    assert_eq!(f.buffered.pending(), 0);
}

#[test]
#[traced_test]
fn test_stop_can_discard_pending_events() {
    let f = fixture(10_000, false);
    f.buffered.accept(raw(f.root, EventMask::CREATE, "a"));

    f.buffered.stop();

    assert!(drain_events(&f.rx).is_empty());
    assert!(logs_contain("discarded on stop"));
}

#[test]
#[traced_test]
fn test_nothing_dispatched_after_stop() {
    let f = fixture(1, true);
    f.buffered.start().unwrap();
    f.buffered.stop();

    f.buffered.accept(raw(f.root, EventMask::CREATE, "late"));
    std::thread::sleep(Duration::from_millis(20));

    assert!(drain_events(&f.rx).is_empty());
    assert_eq!(f.buffered.pending(), 0);
    assert!(logs_contain("arrived after stop"));
}

#[test]
fn test_arrivals_before_start_are_drained_on_arrival() {
    let f = fixture(0, true);

    f.buffered.accept(raw(f.root, EventMask::CREATE, "a"));

    // Zero window: due immediately, no timer needed
    assert_eq!(drain_events(&f.rx).len(), 1);
}
