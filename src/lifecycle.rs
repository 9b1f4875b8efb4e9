//! Lifecycle manager: the restart state machine.
//!
//! Owns the session's bind/serve/register/stop cycle. Three independent
//! event sources can invalidate the current session — the registration
//! directory, OS signals, and session-start failures — and the only safe
//! recovery is a full stop/rebind/re-register cycle: partial recovery
//! (re-registering without rebinding) risks a socket/registration mismatch
//! the host cannot detect.
//!
//! All state transitions happen on the single task running [`run`]
//! (`LifecycleManager::run`); RPC stream workers only read published
//! snapshots. Events are processed strictly in fan-in delivery order.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PluginConfig;
use crate::fs_watcher::{DirWatcher, WatchEvent};
use crate::probe::{spawn_periodic_probe, HealthProbe, HealthUpdate};
use crate::registration::{register, RegistrationDescriptor};
use crate::registry::{DeviceProducer, DeviceRegistry};
use crate::session::{SessionHandle, SessionServer};
use crate::signal_watcher::{watch_signals, PluginSignal};
use crate::{AppError, Result};

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Where the manager is in its session cycle. Exactly one instance exists,
/// owned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; the next loop tick attempts a start.
    Idle,
    /// Bind and registration in progress.
    Starting,
    /// Bound, registered, streaming to consumers.
    Serving,
    /// Teardown in progress.
    Draining,
    /// Final: the loop has exited.
    Terminated,
}

/// Bounded exponential backoff for consecutive start failures.
///
/// The source this harness replaces re-entered the start loop immediately,
/// which hammers the host when it is down for long. Delays double from
/// 100 ms up to 5 s and reset on the first successful start.
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: BACKOFF_INITIAL,
        }
    }

    fn advance(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = BACKOFF_INITIAL;
    }
}

/// Composes the registry, session server, registration client, and the two
/// watchers into one restart loop.
pub struct LifecycleManager {
    config: PluginConfig,
    registry: Arc<DeviceRegistry>,
    health_rx: Option<mpsc::UnboundedReceiver<HealthUpdate>>,
    probe: Option<Box<dyn HealthProbe>>,
    state: SessionState,
    session: Option<SessionHandle>,
}

impl LifecycleManager {
    /// Build a manager around an injected device producer.
    #[must_use]
    pub fn new(config: PluginConfig, producer: impl DeviceProducer) -> Self {
        Self {
            config,
            registry: Arc::new(DeviceRegistry::new(producer)),
            health_rx: None,
            probe: None,
            state: SessionState::Idle,
            session: None,
        }
    }

    /// Attach an externally driven health-update source.
    #[must_use]
    pub fn with_health_updates(mut self, rx: mpsc::UnboundedReceiver<HealthUpdate>) -> Self {
        self.health_rx = Some(rx);
        self
    }

    /// Attach a periodic health probe, run every `probe_interval_seconds`
    /// against the current snapshot for the lifetime of [`Self::run`].
    /// Supersedes any channel attached via [`Self::with_health_updates`].
    #[must_use]
    pub fn with_health_probe(mut self, probe: impl HealthProbe) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Shared handle to the device registry, for wiring probes or
    /// inspecting snapshots.
    #[must_use]
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Current state of the restart machine.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the event loop until a terminate-class signal drains the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WatchSetup` when the registration directory watch
    /// or the signal handlers cannot be established — the only errors that
    /// terminate the process. Bind, registration, and producer failures are
    /// absorbed by the retry loop.
    pub async fn run(&mut self) -> Result<()> {
        let plugin_dir = self.config.plugin_dir.canonicalize().map_err(|err| {
            AppError::WatchSetup(format!(
                "registration directory '{}' is unusable: {err}",
                self.config.plugin_dir.display()
            ))
        })?;
        let own_socket = plugin_dir.join(&self.config.socket_name);
        let host_socket = plugin_dir.join(&self.config.host_socket_name);

        let mut fs_events = DirWatcher::new(&plugin_dir)?;
        let mut signals = watch_signals()?;
        let mut health_rx = self.health_rx.take();
        let mut backoff = Backoff::new();

        let probe_cancel = CancellationToken::new();
        if let Some(probe) = self.probe.take() {
            let (tx, rx) = mpsc::unbounded_channel();
            health_rx = Some(rx);
            // Detached; stops on probe_cancel or when health_rx drops.
            let _probe_task = spawn_periodic_probe(
                probe,
                Arc::clone(&self.registry),
                self.config.probe_interval(),
                tx,
                probe_cancel.clone(),
            );
        }

        info!(
            resource = %self.config.resource_name,
            dir = %plugin_dir.display(),
            "lifecycle manager started"
        );

        while self.state != SessionState::Terminated {
            if self.state == SessionState::Idle {
                self.state = SessionState::Starting;
                match self.start_session(&own_socket, &host_socket).await {
                    Ok(handle) => {
                        self.session = Some(handle);
                        self.state = SessionState::Serving;
                        backoff.reset();
                        info!(socket = %own_socket.display(), "session serving");
                    }
                    Err(err) => {
                        self.state = SessionState::Idle;
                        let delay = backoff.advance();
                        warn!(%err, ?delay, "session start failed; retrying");
                        // Stay responsive to shutdown while backing off.
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            signal = signals.recv() => {
                                if !matches!(signal, Some(PluginSignal::Reload)) {
                                    info!("shutdown requested while retrying");
                                    self.teardown(SessionState::Terminated).await;
                                }
                            }
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                event = fs_events.next() => {
                    match event {
                        Some(event) => self.handle_fs_event(event, &own_socket, &host_socket).await,
                        None => {
                            // The watch stream is non-restartable; running
                            // blind would miss orchestrator restarts.
                            self.teardown(SessionState::Terminated).await;
                            probe_cancel.cancel();
                            return Err(AppError::WatchSetup(
                                "registration directory watch stream closed".into(),
                            ));
                        }
                    }
                }
                signal = signals.recv() => {
                    match signal {
                        Some(PluginSignal::Reload) => {
                            info!("reload signal; restarting session");
                            self.teardown(SessionState::Idle).await;
                        }
                        Some(PluginSignal::Shutdown) | None => {
                            info!("terminate signal; shutting down");
                            self.teardown(SessionState::Terminated).await;
                        }
                    }
                }
                update = recv_health(&mut health_rx) => {
                    match update {
                        Some(update) => {
                            let applied = self
                                .registry
                                .apply_health_update(&update.id, update.health);
                            if applied {
                                debug!(id = %update.id, health = ?update.health, "health update applied");
                            } else {
                                // Device removed by a concurrent refresh; a
                                // stale update is a no-op, not an error.
                                debug!(id = %update.id, "health update for unknown device ignored");
                            }
                        }
                        None => {
                            debug!("health update source closed");
                            health_rx = None;
                        }
                    }
                }
            }
        }

        probe_cancel.cancel();
        info!("lifecycle manager terminated");
        Ok(())
    }

    /// React to one registration-directory observation.
    async fn handle_fs_event(&mut self, event: WatchEvent, own_socket: &Path, host_socket: &Path) {
        match event {
            WatchEvent::Created(path) if path == host_socket => {
                warn!(path = %path.display(), "orchestrator socket created; restarting session");
                self.teardown(SessionState::Idle).await;
            }
            WatchEvent::Removed(path) if path == own_socket => {
                // Our own teardown also unlinks the socket, and that event
                // may still be queued once the next session is serving.
                // Only a removal that left the path absent is a real loss.
                if own_socket.exists() {
                    debug!("ignoring stale removal event for own socket");
                } else {
                    warn!(path = %path.display(), "own socket removed; restarting session");
                    self.teardown(SessionState::Idle).await;
                }
            }
            WatchEvent::Error(cause) => {
                // Transient observation error: log only, no state change.
                warn!(%cause, "directory watch error");
            }
            WatchEvent::Created(path) | WatchEvent::Removed(path) => {
                debug!(path = %path.display(), "unrelated directory event");
            }
        }
    }

    /// One Idle → Serving attempt: refresh, bind, register.
    ///
    /// Any failure rolls back the partially started session and leaves the
    /// manager in `Idle` for the next tick.
    async fn start_session(&self, own_socket: &Path, host_socket: &Path) -> Result<SessionHandle> {
        let snapshot = self.registry.refresh();
        debug!(devices = snapshot.len(), "device snapshot refreshed");

        let cancel = CancellationToken::new();
        let handle =
            SessionServer::start(own_socket, Arc::clone(&self.registry), cancel).await?;

        let descriptor = RegistrationDescriptor {
            resource_name: self.config.resource_name.clone(),
            endpoint: self.config.socket_name.clone(),
            protocol_version: self.config.protocol_version.clone(),
        };
        if let Err(err) = register(host_socket, &descriptor, self.config.register_timeout()).await
        {
            handle.stop().await;
            return Err(err);
        }

        Ok(handle)
    }

    /// Drain the active session (if any), then settle into `next`.
    async fn teardown(&mut self, next: SessionState) {
        self.state = SessionState::Draining;
        if let Some(handle) = self.session.take() {
            handle.stop().await;
        }
        self.state = next;
    }
}

/// Receive from an optional health source; pends forever when absent so the
/// select arm never fires.
async fn recv_health(
    rx: &mut Option<mpsc::UnboundedReceiver<HealthUpdate>>,
) -> Option<HealthUpdate> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
