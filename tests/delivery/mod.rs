//! Service mode: back-pressure and shutdown.

use std::time::Duration;

use crossbeam_channel::unbounded;
use treewatch::FnListener;
use treewatch::ListenerMessage;
use treewatch::OverflowSource;
use treewatch::WatchEvent;

use crate::common::collect_quiet;
use crate::common::eventually;
use crate::common::test_config;
use crate::common::wait_for;
use crate::common::WatchedTree;
use crate::common::EVENT_TIMEOUT;

#[test]
fn test_full_queue_signals_overflow_and_recovers() {
    let tree = WatchedTree::new(test_config(false, 1), &[]);
    let (gate_tx, gate_rx) = unbounded::<()>();
    let blocker = FnListener::new(move |_: &WatchEvent| {
        let _ = gate_rx.recv_timeout(EVENT_TIMEOUT);
    });
    tree.watcher.add_listener(tree.root, blocker).unwrap();
    tree.watcher.start().unwrap();

    for i in 0..20 {
        std::fs::write(tree.path(&format!("f{i}")), b"x").unwrap();
    }
    assert!(eventually(|| tree.watcher.stats().overflows > 0));
    drop(gate_tx);

    let received = collect_quiet(&tree.rx, Duration::from_millis(200));
    let overflows: Vec<_> = received
        .iter()
        .filter_map(|m| match m {
            ListenerMessage::Overflow(o) => Some(*o),
            ListenerMessage::Event(_) => None,
        })
        .collect();
    assert!(!overflows.is_empty());
    for overflow in &overflows {
        assert_eq!(overflow.root, tree.root);
        assert!(matches!(overflow.source, OverflowSource::DeliveryQueue { .. }));
    }

    // Once drained, delivery continues as normal
    std::fs::write(tree.path("after"), b"x").unwrap();
    let after = tree.path("after");
    assert!(wait_for(&tree.rx, |e| e.path == after).is_some());

    tree.watcher.stop().unwrap();
    assert_eq!(tree.watcher.stats().largest_queue_depth, 1);
}

#[test]
fn test_stop_flushes_buffered_events() {
    let mut config = test_config(true, 1024);
    config.buffer.delay_ms = 60_000;
    let tree = WatchedTree::new(config, &[]);
    tree.watcher.start().unwrap();

    std::fs::create_dir(tree.path("held")).unwrap();
    assert!(eventually(|| tree.watcher.pending() > 0));
    assert!(tree.rx.try_recv().is_err());

    tree.watcher.stop().unwrap();

    let held = tree.path("held");
    let flushed: Vec<_> = tree
        .rx
        .try_iter()
        .filter(|m| matches!(m, ListenerMessage::Event(e) if e.path == held))
        .collect();
    assert!(!flushed.is_empty());
    assert_eq!(tree.watcher.pending(), 0);
}

#[test]
fn test_stop_can_discard_buffered_events() {
    let mut config = test_config(true, 1024);
    config.buffer.delay_ms = 60_000;
    config.buffer.flush_on_stop = false;
    let tree = WatchedTree::new(config, &[]);
    tree.watcher.start().unwrap();

    std::fs::create_dir(tree.path("held")).unwrap();
    assert!(eventually(|| tree.watcher.pending() > 0));

    tree.watcher.stop().unwrap();

    assert!(tree.rx.try_recv().is_err());
    // Nothing runs after stop, even with the kernel still producing
    std::fs::create_dir(tree.path("late")).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(tree.rx.try_recv().is_err());
}
