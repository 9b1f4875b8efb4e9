#![cfg(unix)]

use std::time::Duration;

use serial_test::serial;

use plugin_harness::signal_watcher::{watch_signals, PluginSignal};

#[tokio::test]
#[serial]
async fn sighup_is_delivered_as_reload() {
    let mut signals = watch_signals().expect("signal handlers install");

    // Give the handlers a beat to be registered with the reactor.
    tokio::time::sleep(Duration::from_millis(100)).await;
    nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).expect("raise SIGHUP");

    let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("signal within deadline")
        .expect("stream open");
    assert_eq!(received, PluginSignal::Reload);
}

#[tokio::test]
#[serial]
async fn consecutive_signals_arrive_in_order() {
    let mut signals = watch_signals().expect("signal handlers install");
    tokio::time::sleep(Duration::from_millis(100)).await;

    nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).expect("raise SIGHUP");
    let first = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("first signal within deadline")
        .expect("stream open");
    assert_eq!(first, PluginSignal::Reload);

    nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).expect("raise SIGHUP again");
    let second = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("second signal within deadline")
        .expect("stream open");
    assert_eq!(second, PluginSignal::Reload);
}
