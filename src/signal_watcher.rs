//! OS termination and reload signals as a single event stream.

use tokio::sync::mpsc;

use crate::Result;

/// A signal classified by the lifecycle action it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginSignal {
    /// SIGHUP: tear the session down and re-establish it without exiting.
    Reload,
    /// SIGINT / SIGTERM / SIGQUIT: drain the session and exit the process.
    Shutdown,
}

/// Register handlers for the reload and terminate-class signals and return
/// them as one merged stream. Deliveries of the same signal kind keep their
/// OS order; ordering across kinds is not guaranteed (each kind is forwarded
/// by its own task). The lifecycle manager treats every signal as
/// session-invalidating, so cross-kind order never changes the outcome.
///
/// # Errors
///
/// Returns `AppError::WatchSetup` if a signal handler cannot be installed;
/// callers treat this like a failed directory watch and exit.
#[cfg(unix)]
pub fn watch_signals() -> Result<mpsc::UnboundedReceiver<PluginSignal>> {
    use tokio::signal::unix::{signal, SignalKind};

    use crate::AppError;

    let mut streams = Vec::new();
    for (kind, name, mapped) in [
        (SignalKind::hangup(), "SIGHUP", PluginSignal::Reload),
        (SignalKind::interrupt(), "SIGINT", PluginSignal::Shutdown),
        (SignalKind::terminate(), "SIGTERM", PluginSignal::Shutdown),
        (SignalKind::quit(), "SIGQUIT", PluginSignal::Shutdown),
    ] {
        let stream = signal(kind).map_err(|err| {
            AppError::WatchSetup(format!("failed to register {name} handler: {err}"))
        })?;
        streams.push((stream, name, mapped));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    for (mut stream, name, mapped) in streams {
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                tracing::info!(signal = name, "received signal");
                if tx.send(mapped).is_err() {
                    break;
                }
            }
        });
    }

    Ok(rx)
}

/// Non-unix fallback: ctrl-c maps to [`PluginSignal::Shutdown`]; there is
/// no reload signal.
#[cfg(not(unix))]
pub fn watch_signals() -> Result<mpsc::UnboundedReceiver<PluginSignal>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            if tx.send(PluginSignal::Shutdown).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}
