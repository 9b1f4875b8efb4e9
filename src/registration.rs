//! One-shot registration handshake with the host orchestrator.

use std::path::Path;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::protocol::{RegisterRequest, RegisterResponse};
use crate::{AppError, Result};

/// Everything the host needs to discover this provider.
///
/// Constructed once per session start from static configuration and not
/// retained after the handshake.
#[derive(Debug, Clone)]
pub struct RegistrationDescriptor {
    /// Resource name being advertised.
    pub resource_name: String,
    /// Provider socket file name within the registration directory.
    pub endpoint: String,
    /// Protocol version the provider speaks.
    pub protocol_version: String,
}

/// Announce the provider to the host orchestrator's well-known socket.
///
/// Opens a short-lived connection, sends the descriptor, reads the host's
/// verdict, and drops the connection regardless of outcome. The whole
/// exchange is bounded by `timeout` (contract: 5 seconds, matching observed
/// host behavior).
///
/// # Errors
///
/// Returns `AppError::Registration` on connect failure, timeout, protocol
/// violation, or host-side rejection. The lifecycle manager treats any of
/// these like a bind failure: roll the session back and retry.
pub async fn register(
    host_socket: &Path,
    descriptor: &RegistrationDescriptor,
    timeout: Duration,
) -> Result<()> {
    let exchange = handshake(host_socket, descriptor);
    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| {
            AppError::Registration(format!(
                "handshake with '{}' timed out after {timeout:?}",
                host_socket.display()
            ))
        })??;

    if !response.ok {
        return Err(AppError::Registration(format!(
            "host rejected registration: {}",
            response.error.unwrap_or_else(|| "no reason given".into())
        )));
    }

    info!(
        resource = %descriptor.resource_name,
        endpoint = %descriptor.endpoint,
        "registered with host orchestrator"
    );
    Ok(())
}

async fn handshake(
    host_socket: &Path,
    descriptor: &RegistrationDescriptor,
) -> Result<RegisterResponse> {
    let name = host_socket.to_fs_name::<GenericFilePath>().map_err(|err| {
        AppError::Registration(format!(
            "invalid host socket path '{}': {err}",
            host_socket.display()
        ))
    })?;

    let stream = interprocess::local_socket::tokio::Stream::connect(name)
        .await
        .map_err(|err| {
            AppError::Registration(format!(
                "cannot connect to host socket '{}': {err}",
                host_socket.display()
            ))
        })?;
    let (reader, mut writer) = stream.split();

    let request = RegisterRequest {
        version: descriptor.protocol_version.clone(),
        endpoint: descriptor.endpoint.clone(),
        resource_name: descriptor.resource_name.clone(),
    };
    let mut line = serde_json::to_string(&request)
        .map_err(|err| AppError::Registration(format!("cannot encode request: {err}")))?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|err| AppError::Registration(format!("cannot send request: {err}")))?;

    let mut response_line = String::new();
    let mut buf_reader = BufReader::new(reader);
    let read = buf_reader
        .read_line(&mut response_line)
        .await
        .map_err(|err| AppError::Registration(format!("cannot read response: {err}")))?;
    if read == 0 {
        return Err(AppError::Registration(
            "host closed the connection before responding".into(),
        ));
    }

    serde_json::from_str(response_line.trim())
        .map_err(|err| AppError::Registration(format!("malformed response: {err}")))
}
