use std::time::Duration;

use plugin_harness::fs_watcher::{DirWatcher, WatchEvent};
use plugin_harness::AppError;

/// Wait for a matching event, skipping unrelated ones (editors, tempfiles,
/// and notify backends can emit extra noise).
async fn expect_event(
    watcher: &mut DirWatcher,
    predicate: impl Fn(&WatchEvent) -> bool,
) -> WatchEvent {
    let deadline = Duration::from_secs(10);
    tokio::time::timeout(deadline, async {
        loop {
            let event = watcher.next().await.expect("watch stream open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event within deadline")
}

#[tokio::test]
async fn missing_directory_is_a_fatal_setup_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("does-not-exist");

    let err = DirWatcher::new(&missing).expect_err("missing dir refused");
    assert!(matches!(err, AppError::WatchSetup(_)), "got {err:?}");
}

#[tokio::test]
async fn reports_create_then_remove_as_two_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut watcher = DirWatcher::new(dir.path()).expect("watcher starts");
    let target = dir.path().join("host.sock");

    std::fs::write(&target, b"").expect("create entry");
    let created = expect_event(&mut watcher, |e| matches!(e, WatchEvent::Created(_))).await;
    match created {
        WatchEvent::Created(path) => assert_eq!(path.file_name(), target.file_name()),
        other => panic!("unexpected event: {other:?}"),
    }

    std::fs::remove_file(&target).expect("remove entry");
    let removed = expect_event(&mut watcher, |e| matches!(e, WatchEvent::Removed(_))).await;
    match removed {
        WatchEvent::Removed(path) => assert_eq!(path.file_name(), target.file_name()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn delivers_every_event_for_repeated_cycles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut watcher = DirWatcher::new(dir.path()).expect("watcher starts");
    let target = dir.path().join("plugin.sock");

    // A created-then-removed pair must surface as two transitions; losing
    // one can mean an undetected restart.
    for _ in 0..3 {
        std::fs::write(&target, b"").expect("create entry");
        expect_event(&mut watcher, |e| matches!(e, WatchEvent::Created(_))).await;
        std::fs::remove_file(&target).expect("remove entry");
        expect_event(&mut watcher, |e| matches!(e, WatchEvent::Removed(_))).await;
    }
}
