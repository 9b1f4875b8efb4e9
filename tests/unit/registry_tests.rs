use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use plugin_harness::registry::{DeviceRecord, DeviceRegistry, Health};
use plugin_harness::{AppError, Result};

/// Producer that replays a scripted sequence of enumeration results.
fn scripted(outputs: Vec<Result<Vec<DeviceRecord>>>) -> impl Fn() -> Result<Vec<DeviceRecord>> {
    let queue = Arc::new(Mutex::new(VecDeque::from(outputs)));
    move || {
        queue
            .lock()
            .expect("queue lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn records(ids: &[&str]) -> Vec<DeviceRecord> {
    ids.iter().map(|id| DeviceRecord::healthy(*id)).collect()
}

#[test]
fn snapshot_is_empty_before_first_refresh() {
    let registry = DeviceRegistry::new(scripted(vec![]));
    assert!(registry.current_snapshot().is_empty());
}

#[test]
fn refresh_replaces_the_snapshot_wholesale() {
    let registry = DeviceRegistry::new(scripted(vec![
        Ok(records(&["0", "1", "2"])),
        Ok(records(&["7"])),
    ]));

    registry.refresh();
    let first = registry.current_snapshot();
    assert_eq!(
        first.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        vec!["0", "1", "2"],
        "order preserved, nothing merged"
    );

    registry.refresh();
    let second = registry.current_snapshot();
    assert_eq!(
        second.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        vec!["7"],
        "second refresh does not retain prior records"
    );
}

#[test]
fn producer_error_publishes_empty_snapshot() {
    let registry = DeviceRegistry::new(scripted(vec![
        Ok(records(&["0"])),
        Err(AppError::Producer("enumeration failed".into())),
    ]));

    registry.refresh();
    assert_eq!(registry.current_snapshot().len(), 1);

    // Fails soft: the error is absorbed and the snapshot becomes empty.
    registry.refresh();
    assert!(registry.current_snapshot().is_empty());
}

#[test]
fn duplicate_ids_are_dropped_keeping_first_occurrence() {
    let registry = DeviceRegistry::new(scripted(vec![Ok(vec![
        DeviceRecord::healthy("0"),
        DeviceRecord {
            id: "0".into(),
            health: Health::Unhealthy,
        },
        DeviceRecord::healthy("1"),
    ])]));

    registry.refresh();
    let snapshot = registry.current_snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, "0");
    assert_eq!(snapshot[0].health, Health::Healthy);
    assert_eq!(snapshot[1].id, "1");
}

#[test]
fn health_update_mutates_a_copy_not_the_published_snapshot() {
    let registry = DeviceRegistry::new(scripted(vec![Ok(records(&["0", "1"]))]));
    registry.refresh();
    let before = registry.current_snapshot();

    assert!(registry.apply_health_update("1", Health::Unhealthy));

    // The previously published snapshot is immutable.
    assert_eq!(before[1].health, Health::Healthy);

    let after = registry.current_snapshot();
    assert_eq!(after[0].health, Health::Healthy);
    assert_eq!(after[1].health, Health::Unhealthy);
}

#[test]
fn health_update_for_unknown_id_is_a_noop() {
    let registry = DeviceRegistry::new(scripted(vec![Ok(records(&["0"]))]));
    registry.refresh();
    let before = registry.current_snapshot();

    assert!(!registry.apply_health_update("missing", Health::Unhealthy));

    let after = registry.current_snapshot();
    assert_eq!(*before, *after, "snapshot unchanged by unknown-id update");
}

#[tokio::test]
async fn subscribers_observe_refresh_and_health_publishes() {
    let registry = DeviceRegistry::new(scripted(vec![Ok(records(&["0"]))]));
    let mut versions = registry.subscribe();
    versions.mark_unchanged();

    registry.refresh();
    versions.changed().await.expect("refresh notifies");

    registry.apply_health_update("0", Health::Unhealthy);
    versions.changed().await.expect("health update notifies");

    // Redundant update (same health) publishes nothing.
    registry.apply_health_update("0", Health::Unhealthy);
    assert!(!versions.has_changed().expect("sender alive"));
}

#[test]
fn cpu_scenario_from_contract() {
    // Producer yields two healthy devices; a health update flips "1".
    let registry = DeviceRegistry::new(scripted(vec![Ok(records(&["0", "1"]))]));
    registry.refresh();

    let snapshot = registry.current_snapshot();
    assert_eq!(
        *snapshot,
        vec![DeviceRecord::healthy("0"), DeviceRecord::healthy("1")]
    );

    registry.apply_health_update("1", Health::Unhealthy);
    let snapshot = registry.current_snapshot();
    assert_eq!(
        *snapshot,
        vec![
            DeviceRecord::healthy("0"),
            DeviceRecord {
                id: "1".into(),
                health: Health::Unhealthy,
            },
        ]
    );
}
