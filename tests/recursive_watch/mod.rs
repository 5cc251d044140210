//! Graph maintenance against a real filesystem.

use std::time::Duration;

use treewatch::ChannelListener;
use treewatch::EventMask;
use treewatch::ListenerMessage;

use crate::common::collect_quiet;
use crate::common::eventually;
use crate::common::is_dir_create;
use crate::common::test_config;
use crate::common::wait_for;
use crate::common::WatchedTree;

#[test]
fn test_watch_tree_covers_existing_subtree() {
    let tree = WatchedTree::new(test_config(false, 1024), &["a/b/c", "d/e"]);
    std::fs::write(tree.path("a/file"), b"not a directory").unwrap();

    let mut watched = tree.watcher.watched_paths(tree.root).unwrap();
    watched.sort();

    let mut expected = vec![
        tree.dir.path().to_path_buf(),
        tree.path("a"),
        tree.path("a/b"),
        tree.path("a/b/c"),
        tree.path("d"),
        tree.path("d/e"),
    ];
    expected.sort();
    assert_eq!(watched, expected);
    assert!(!tree.is_watched("a/file"));
}

#[test]
fn test_mkdir_rename_mkdir_scenario() {
    let tree = WatchedTree::new(test_config(true, 1024), &[]);
    tree.watcher.start().unwrap();

    std::fs::create_dir(tree.path("x")).unwrap();
    let x = tree.path("x");
    assert!(wait_for(&tree.rx, |e| is_dir_create(e, &x)).is_some());
    assert!(eventually(|| tree.is_watched("x")));

    std::fs::create_dir(tree.path("x/y")).unwrap();
    let y = tree.path("x/y");
    assert!(wait_for(&tree.rx, |e| is_dir_create(e, &y)).is_some());

    std::fs::rename(tree.path("x"), tree.path("z")).unwrap();
    let delivered: Vec<_> = collect_quiet(&tree.rx, Duration::from_millis(500))
        .into_iter()
        .filter_map(|m| match m {
            ListenerMessage::Event(e) => Some(e),
            _ => None,
        })
        .collect();
    let moves: Vec<_> = delivered.iter().filter(|e| e.is_move()).collect();
    assert_eq!(moves.len(), 1, "delivered: {delivered:?}");
    assert!(
        delivered
            .iter()
            .all(|e| e.is_move() || !(e.mask.is_moved_from() || e.mask.is_moved_to())),
        "rename halves leaked: {delivered:?}"
    );
    let moved = moves[0];
    assert_eq!(moved.from_path(), Some(tree.path("x").as_path()));
    assert_eq!(moved.to_path(), Some(tree.path("z").as_path()));
    assert!(moved.is_dir());

    std::fs::create_dir(tree.path("z/q")).unwrap();
    let q = tree.path("z/q");
    assert!(wait_for(&tree.rx, |e| is_dir_create(e, &q)).is_some());

    tree.watcher.stop().unwrap();
    assert!(tree.is_watched("z"));
    assert!(tree.is_watched("z/y"));
    assert!(tree.is_watched("z/q"));
    assert!(!tree.is_watched("x"));
    assert!(!tree.is_watched("x/y"));
}

#[test]
fn test_removed_directories_are_unwatched() {
    let tree = WatchedTree::new(test_config(false, 1024), &["gone/deeper", "kept"]);
    assert_eq!(tree.watcher.manager().watch_count(), 4);
    tree.watcher.start().unwrap();

    std::fs::remove_dir_all(tree.path("gone")).unwrap();

    assert!(eventually(|| tree.watcher.manager().watch_count() == 2));
    assert!(!tree.is_watched("gone"));
    assert!(tree.is_watched("kept"));
    tree.watcher.stop().unwrap();
}

#[test]
fn test_create_only_listener_never_sees_deletes() {
    let tree = WatchedTree::new(test_config(false, 1024), &[]);
    let (listener, create_rx) = ChannelListener::new();
    tree.watcher
        .add_listener_with_mask(tree.root, listener, EventMask::CREATE)
        .unwrap();
    tree.watcher.start().unwrap();

    std::fs::write(tree.path("f"), b"x").unwrap();
    std::fs::remove_file(tree.path("f")).unwrap();
    // The full listener sees the delete, so everything before it was dispatched
    let f = tree.path("f");
    assert!(wait_for(&tree.rx, |e| e.mask.is_delete() && e.path == f).is_some());

    let seen = collect_quiet(&create_rx, Duration::from_millis(100));
    tree.watcher.stop().unwrap();

    assert!(!seen.is_empty());
    for message in seen {
        match message {
            ListenerMessage::Event(e) => assert!(e.mask.is_create(), "unexpected {:?}", e.mask),
            ListenerMessage::Overflow(o) => panic!("unexpected overflow {o:?}"),
        }
    }
}

#[test]
fn test_directory_created_before_pump_is_adopted() {
    let tree = WatchedTree::new(test_config(false, 1024), &["p"]);

    // Nobody drains the raw source yet: only its create event reveals the directory
    std::fs::create_dir_all(tree.path("p/late/inner")).unwrap();
    assert!(!tree.is_watched("p/late"));

    tree.watcher.pump(Duration::from_millis(200)).unwrap();

    assert!(tree.is_watched("p/late"));
    // Already there when `late` was adopted, so the walk found it
    assert!(tree.is_watched("p/late/inner"));
}

#[test]
fn test_simple_mode_pump_delivers_on_caller_thread() {
    let tree = WatchedTree::new(test_config(false, 1024), &[]);

    std::fs::create_dir(tree.path("s")).unwrap();
    let s = tree.path("s");
    let mut delivered = None;
    for _ in 0..50 {
        tree.watcher.pump(Duration::from_millis(20)).unwrap();
        delivered = tree
            .rx
            .try_iter()
            .find_map(|m| match m {
                ListenerMessage::Event(e) if is_dir_create(&e, &s) => Some(e),
                _ => None,
            });
        if delivered.is_some() {
            break;
        }
    }

    assert!(delivered.is_some());
    assert!(tree.is_watched("s"));
}
