//! Wire message shapes for the host orchestrator's plugin protocol.
//!
//! The host dictates this protocol; the harness must speak it exactly, not
//! redesign it. Both the registration socket and the plugin socket carry
//! one JSON object per line.
//!
//! ## Plugin socket
//!
//! Request (first line of a connection):
//! ```json
//! {"method": "list_and_watch"}
//! {"method": "allocate", "device_ids": ["0", "1"]}
//! ```
//!
//! `list_and_watch` turns the connection into a stream: the server replies
//! with one [`DeviceListResponse`] line immediately and another on every
//! snapshot change, until the session ends. `allocate` gets a single
//! [`AllocateResponse`] line.
//!
//! ## Registration socket
//!
//! One [`RegisterRequest`] line from the provider, one [`RegisterResponse`]
//! line back from the host. Note `endpoint` is the socket file name within
//! the shared directory, not a full path.

use serde::{Deserialize, Serialize};

use crate::registry::DeviceRecord;

/// Inbound request on the provider's plugin socket.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PluginRequest {
    /// Subscribe to the device snapshot stream.
    ListAndWatch,
    /// Acknowledge an allocation of the named devices.
    Allocate {
        /// Device ids the consumer wants allocated.
        device_ids: Vec<String>,
    },
}

/// One streamed device-list frame; always the full current snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceListResponse {
    /// Every advertised device record, in registry order.
    pub devices: Vec<DeviceRecord>,
}

/// Reply to an `allocate` request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocateResponse {
    /// Whether the allocation was acknowledged.
    pub ok: bool,
    /// Reason for refusal (e.g. an unknown device id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handshake payload announcing this provider to the host orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterRequest {
    /// Protocol version the provider speaks.
    pub version: String,
    /// Provider socket file name within the shared registration directory.
    pub endpoint: String,
    /// Resource name being advertised.
    pub resource_name: String,
}

/// Host's answer to a [`RegisterRequest`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterResponse {
    /// Whether the host accepted the registration.
    pub ok: bool,
    /// Rejection reason when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
