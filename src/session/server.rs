//! RPC endpoint serving `list_and_watch` and `allocate` on the provider
//! socket.
//!
//! Owns exactly one bound local socket at a time. Stream subscribers are
//! fan-out workers that only read the registry's published snapshot; the
//! per-session [`CancellationToken`] (owned by the lifecycle manager,
//! observed here) is the sole cancellation path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::protocol::{AllocateResponse, DeviceListResponse, PluginRequest};
use crate::registry::DeviceRegistry;
use crate::{AppError, Result};

/// How long the stale-socket liveness probe waits for a connect.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// A running session: accept loop plus its cancellation token.
#[derive(Debug)]
pub struct SessionHandle {
    socket_path: PathBuf,
    cancel: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    /// Path of the bound socket file.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Cancel all active streams, shut the listener down, and remove the
    /// socket file. Completes teardown before returning, so an immediate
    /// re-start on the same path succeeds.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.accept_task.await;
        if let Err(err) = std::fs::remove_file(&self.socket_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(%err, path = %self.socket_path.display(), "failed to remove socket file");
            }
        }
        info!(path = %self.socket_path.display(), "session server stopped");
    }
}

/// Binds the provider socket and serves the plugin RPC surface.
pub struct SessionServer;

impl SessionServer {
    /// Bind `socket_path` and begin serving.
    ///
    /// A stale (unlinked-but-present) socket file is removed before
    /// binding; a path actively held by a live listener is refused. The
    /// passed `cancel` token is owned by the caller — cancelling it ends
    /// every active stream and the accept loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bind` when the path is held by a live endpoint or
    /// the listener cannot be created. Callers treat this as "stay idle,
    /// retry", never as fatal.
    pub async fn start(
        socket_path: &Path,
        registry: Arc<DeviceRegistry>,
        cancel: CancellationToken,
    ) -> Result<SessionHandle> {
        remove_stale_socket(socket_path).await?;

        let name = socket_path.to_fs_name::<GenericFilePath>().map_err(|err| {
            AppError::Bind(format!(
                "invalid socket path '{}': {err}",
                socket_path.display()
            ))
        })?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| {
                AppError::Bind(format!(
                    "failed to bind '{}': {err}",
                    socket_path.display()
                ))
            })?;

        info!(path = %socket_path.display(), "session server listening");

        let accept_cancel = cancel.clone();
        let path_label = socket_path.display().to_string();
        let accept_task = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        () = accept_cancel.cancelled() => {
                            debug!("accept loop shutting down");
                            break;
                        }
                        accept_result = listener.accept() => {
                            match accept_result {
                                Ok(stream) => {
                                    let registry = Arc::clone(&registry);
                                    let cancel = accept_cancel.clone();
                                    tokio::spawn(handle_connection(stream, registry, cancel));
                                }
                                Err(err) => {
                                    warn!(%err, "accept failed");
                                }
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("session_server", path = %path_label)),
        );

        Ok(SessionHandle {
            socket_path: socket_path.to_path_buf(),
            cancel,
            accept_task,
        })
    }
}

/// Remove a leftover socket file, refusing to steal one that is live.
async fn remove_stale_socket(socket_path: &Path) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }

    let name = socket_path.to_fs_name::<GenericFilePath>().map_err(|err| {
        AppError::Bind(format!(
            "invalid socket path '{}': {err}",
            socket_path.display()
        ))
    })?;
    let probe = interprocess::local_socket::tokio::Stream::connect(name);
    if let Ok(Ok(_live)) = tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        return Err(AppError::Bind(format!(
            "socket '{}' is held by a live endpoint",
            socket_path.display()
        )));
    }

    match std::fs::remove_file(socket_path) {
        Ok(()) => {
            info!(path = %socket_path.display(), "removed stale socket file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Bind(format!(
            "cannot remove stale socket '{}': {err}",
            socket_path.display()
        ))),
    }
}

/// Handle a single consumer connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    registry: Arc<DeviceRegistry>,
    cancel: CancellationToken,
) {
    let span = info_span!("plugin_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = buf_reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<PluginRequest>(trimmed) {
                        Ok(PluginRequest::ListAndWatch) => {
                            // The connection becomes a one-way stream from
                            // here; no further requests are read.
                            serve_stream(&mut writer, &registry, &cancel).await;
                            break;
                        }
                        Ok(PluginRequest::Allocate { device_ids }) => {
                            let response = allocate(&registry, &device_ids);
                            if write_line(&mut writer, &response).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(%err, "malformed request");
                            let response = AllocateResponse {
                                ok: false,
                                error: Some(format!("invalid request: {err}")),
                            };
                            if write_line(&mut writer, &response).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "read error");
                    break;
                }
            }
        }

        debug!("plugin connection closed");
    }
    .instrument(span)
    .await;
}

/// Emit the current snapshot, then re-emit on every registry publish until
/// the session is cancelled or the consumer disconnects.
async fn serve_stream<W>(writer: &mut W, registry: &DeviceRegistry, cancel: &CancellationToken)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut versions = registry.subscribe();
    versions.mark_unchanged();

    let initial = DeviceListResponse {
        devices: registry.current_snapshot().as_ref().clone(),
    };
    if write_line(writer, &initial).await.is_err() {
        return;
    }
    info!(devices = initial.devices.len(), "list_and_watch stream subscribed");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("stream cancelled by session teardown");
                break;
            }
            changed = versions.changed() => {
                if changed.is_err() {
                    // Registry dropped; nothing further to report.
                    break;
                }
                let frame = DeviceListResponse {
                    devices: registry.current_snapshot().as_ref().clone(),
                };
                if write_line(writer, &frame).await.is_err() {
                    debug!("stream consumer disconnected");
                    break;
                }
            }
        }
    }
}

/// Validate requested ids against the current snapshot.
fn allocate(registry: &DeviceRegistry, device_ids: &[String]) -> AllocateResponse {
    let snapshot = registry.current_snapshot();
    let unknown: Vec<&String> = device_ids
        .iter()
        .filter(|id| !snapshot.iter().any(|d| &d.id == *id))
        .collect();

    if unknown.is_empty() {
        info!(count = device_ids.len(), "allocation acknowledged");
        AllocateResponse {
            ok: true,
            error: None,
        }
    } else {
        let ids = unknown
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        warn!(unknown = %ids, "allocation refused for unknown device ids");
        AllocateResponse {
            ok: false,
            error: Some(format!("unknown device ids: {ids}")),
        }
    }
}

/// Serialize `message` as one JSON line and flush it.
async fn write_line<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_string(message)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
