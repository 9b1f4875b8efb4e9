//! Pluggable periodic device-health probing.
//!
//! The harness never interprets device health itself; an embedding
//! application supplies a [`HealthProbe`] (usually via
//! [`crate::lifecycle::LifecycleManager::with_health_probe`]) and the
//! spawned task feeds [`HealthUpdate`]s into the lifecycle manager's
//! channel. The manager applies them to the registry, which re-emits the
//! snapshot to every active `list_and_watch` subscriber.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::registry::{DeviceRecord, DeviceRegistry, Health};

/// A single device-health observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthUpdate {
    /// Device the observation applies to.
    pub id: String,
    /// Observed health state.
    pub health: Health,
}

/// Periodic health check over the currently advertised devices.
pub trait HealthProbe: Send + Sync + 'static {
    /// Inspect `devices` and report any whose health differs from the
    /// recorded state. Returning an empty vec means "no change".
    fn check(&self, devices: &[DeviceRecord]) -> Vec<HealthUpdate>;
}

impl<F> HealthProbe for F
where
    F: Fn(&[DeviceRecord]) -> Vec<HealthUpdate> + Send + Sync + 'static,
{
    fn check(&self, devices: &[DeviceRecord]) -> Vec<HealthUpdate> {
        self(devices)
    }
}

impl HealthProbe for Box<dyn HealthProbe> {
    fn check(&self, devices: &[DeviceRecord]) -> Vec<HealthUpdate> {
        self.as_ref().check(devices)
    }
}

/// Spawn a background task running `probe` every `interval` against the
/// registry's current snapshot, sending updates to `tx` until `cancel`
/// fires or the receiving side is dropped.
pub fn spawn_periodic_probe(
    probe: impl HealthProbe,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    tx: mpsc::UnboundedSender<HealthUpdate>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so the probe
            // runs one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("health probe stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let snapshot = registry.current_snapshot();
                        for update in probe.check(&snapshot) {
                            if tx.send(update).is_err() {
                                debug!("health update channel closed; probe stopping");
                                return;
                            }
                        }
                    }
                }
            }
        }
        .instrument(info_span!("health_probe")),
    )
}
