//! Plugin configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_host_socket_name() -> String {
    "orchestrator.sock".into()
}

fn default_protocol_version() -> String {
    "v1alpha".into()
}

fn default_register_timeout_seconds() -> u64 {
    5
}

fn default_probe_interval_seconds() -> u64 {
    60
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PluginConfig {
    /// Resource name announced to the host orchestrator (e.g. `vendor/cpu`).
    pub resource_name: String,
    /// Shared registration directory holding the orchestrator's well-known
    /// socket and this provider's socket.
    pub plugin_dir: PathBuf,
    /// File name (not path) of this provider's socket inside `plugin_dir`.
    pub socket_name: String,
    /// File name of the orchestrator's well-known socket inside `plugin_dir`.
    #[serde(default = "default_host_socket_name")]
    pub host_socket_name: String,
    /// Protocol version announced during registration.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Bound on the registration handshake, matching observed host behavior.
    #[serde(default = "default_register_timeout_seconds")]
    pub register_timeout_seconds: u64,
    /// Interval between periodic health probe runs.
    #[serde(default = "default_probe_interval_seconds")]
    pub probe_interval_seconds: u64,
}

impl PluginConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Full path to this provider's socket file.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.socket_name)
    }

    /// Full path to the orchestrator's well-known socket file.
    #[must_use]
    pub fn host_socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.host_socket_name)
    }

    /// Registration handshake bound as a [`Duration`].
    #[must_use]
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_seconds)
    }

    /// Periodic health probe interval as a [`Duration`].
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    // The plugin directory is deliberately not required to exist here: a
    // missing directory surfaces as a fatal WatchSetup error when the
    // lifecycle manager opens its watch, which is the contract callers
    // observe.
    fn validate(&self) -> Result<()> {
        if self.resource_name.is_empty() {
            return Err(AppError::Config("resource_name must not be empty".into()));
        }

        for (field, value) in [
            ("socket_name", &self.socket_name),
            ("host_socket_name", &self.host_socket_name),
        ] {
            if value.is_empty() {
                return Err(AppError::Config(format!("{field} must not be empty")));
            }
            if value.contains(std::path::MAIN_SEPARATOR) {
                return Err(AppError::Config(format!(
                    "{field} must be a bare file name, got '{value}'"
                )));
            }
        }

        if self.register_timeout_seconds == 0 {
            return Err(AppError::Config(
                "register_timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
