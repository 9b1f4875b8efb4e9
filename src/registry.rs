//! Device registry: the ordered set of advertised device records.
//!
//! Snapshots are published by wholesale replacement behind an `Arc`, never
//! patched in place, so stream workers read without contending with the
//! refresh path or the health probe. A `tokio::sync::watch` version counter
//! lets subscribers observe publishes without polling.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::Result;

/// Reported health of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Health {
    /// Device is usable and may be allocated.
    Healthy,
    /// Device is present but must not be allocated.
    Unhealthy,
}

/// One allocatable hardware unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceRecord {
    /// Opaque identifier, unique within a snapshot.
    pub id: String,
    /// Current health state.
    pub health: Health,
}

impl DeviceRecord {
    /// Convenience constructor for a healthy device.
    #[must_use]
    pub fn healthy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: Health::Healthy,
        }
    }
}

/// Immutable, point-in-time ordered device list.
pub type DeviceSnapshot = std::sync::Arc<Vec<DeviceRecord>>;

/// Source of device records, supplied by the embedding application.
///
/// Invoked synchronously during [`DeviceRegistry::refresh`]; implementations
/// must not block indefinitely (the refresh path has no enforced timeout).
pub trait DeviceProducer: Send + Sync + 'static {
    /// Enumerate the current hardware inventory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Producer` when enumeration fails; the registry
    /// treats this as "zero devices", never as a fatal condition.
    fn enumerate(&self) -> Result<Vec<DeviceRecord>>;
}

impl<F> DeviceProducer for F
where
    F: Fn() -> Result<Vec<DeviceRecord>> + Send + Sync + 'static,
{
    fn enumerate(&self) -> Result<Vec<DeviceRecord>> {
        self()
    }
}

/// Holds the current snapshot and notifies subscribers on every publish.
pub struct DeviceRegistry {
    producer: Box<dyn DeviceProducer>,
    snapshot: RwLock<DeviceSnapshot>,
    version_tx: watch::Sender<u64>,
}

impl DeviceRegistry {
    /// Create a registry with an empty initial snapshot.
    #[must_use]
    pub fn new(producer: impl DeviceProducer) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            producer: Box::new(producer),
            snapshot: RwLock::new(DeviceSnapshot::default()),
            version_tx,
        }
    }

    /// Re-enumerate devices and replace the stored snapshot wholesale.
    ///
    /// Fails soft: a producer error publishes an empty snapshot and is
    /// logged, never raised to the caller. Duplicate ids are dropped with
    /// a warning to preserve the uniqueness invariant.
    pub fn refresh(&self) -> DeviceSnapshot {
        let devices = match self.producer.enumerate() {
            Ok(devices) => dedupe(devices),
            Err(err) => {
                warn!(%err, "device enumeration failed; publishing empty snapshot");
                Vec::new()
            }
        };
        self.publish(devices)
    }

    /// Latest published snapshot; never blocks on the refresh path.
    #[must_use]
    pub fn current_snapshot(&self) -> DeviceSnapshot {
        std::sync::Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Mutate a copy of the current snapshot and publish it atomically.
    ///
    /// Returns `true` when the device was found. An unknown `id` is a
    /// no-op, not an error: the device may have been removed by a
    /// concurrent refresh.
    pub fn apply_health_update(&self, id: &str, health: Health) -> bool {
        let current = self.current_snapshot();
        let Some(index) = current.iter().position(|d| d.id == id) else {
            return false;
        };
        if current[index].health == health {
            return true;
        }
        let mut updated = current.as_ref().clone();
        updated[index].health = health;
        self.publish(updated);
        true
    }

    /// Subscribe to publish notifications.
    ///
    /// The receiver's value is a monotonically increasing version; readers
    /// fetch [`Self::current_snapshot`] after each change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    fn publish(&self, devices: Vec<DeviceRecord>) -> DeviceSnapshot {
        let snapshot: DeviceSnapshot = std::sync::Arc::new(devices);
        {
            let mut guard = self
                .snapshot
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = std::sync::Arc::clone(&snapshot);
        }
        self.version_tx.send_modify(|version| *version += 1);
        snapshot
    }
}

/// Drop records whose id was already seen, keeping first occurrences.
fn dedupe(devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(devices.len());
    for device in devices {
        if seen.insert(device.id.clone()) {
            out.push(device);
        } else {
            warn!(id = %device.id, "duplicate device id from producer; dropping record");
        }
    }
    out
}
