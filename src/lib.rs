#![forbid(unsafe_code)]

//! Device plugin harness.
//!
//! Embeds a resource provider: advertises allocatable hardware units to a
//! host orchestrator over a shared socket directory and keeps the
//! advertisement alive across orchestrator restarts, socket loss, and
//! process signals. The [`lifecycle::LifecycleManager`] owns the
//! bind/serve/register/stop cycle; device enumeration and health probing
//! are injected by the embedding application.

pub mod config;
pub mod errors;
pub mod fs_watcher;
pub mod lifecycle;
pub mod probe;
pub mod protocol;
pub mod registration;
pub mod registry;
pub mod session;
pub mod signal_watcher;

pub use config::PluginConfig;
pub use errors::{AppError, Result};
