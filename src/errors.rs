//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Only [`AppError::WatchSetup`] and [`AppError::Config`] terminate the
/// process. `Bind` and `Registration` are absorbed by the lifecycle
/// manager's retry loop; `Producer` is logged and ignored. Transient watch
/// observation errors are stream items
/// ([`crate::fs_watcher::WatchEvent::Error`]), not errors.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Plugin socket path unusable (held by a live listener, or bind failed).
    Bind(String),
    /// Host orchestrator unreachable, timed out, or rejected the handshake.
    Registration(String),
    /// Directory or signal watch could not be established. Fatal: without a
    /// working watch the harness cannot detect orchestrator restarts.
    WatchSetup(String),
    /// Device enumeration failed; treated as "zero devices" by the registry.
    Producer(String),
    /// Wire message encoding or decoding failure.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::Registration(msg) => write!(f, "registration: {msg}"),
            Self::WatchSetup(msg) => write!(f, "watch setup: {msg}"),
            Self::Producer(msg) => write!(f, "producer: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
