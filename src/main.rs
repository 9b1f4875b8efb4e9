#![forbid(unsafe_code)]

//! `plugin-harness` — CPU device plugin binary.
//!
//! Embeds the lifecycle manager with a producer that advertises one device
//! per logical processor found in `/proc/cpuinfo`. Serves as both a usable
//! provider and the reference embedding of the harness.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use plugin_harness::config::PluginConfig;
use plugin_harness::lifecycle::LifecycleManager;
use plugin_harness::probe::HealthUpdate;
use plugin_harness::registry::{DeviceRecord, Health};
use plugin_harness::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "plugin-harness", about = "Device plugin harness for a host orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("plugin-harness bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = PluginConfig::load_from_path(&args.config)?;
    info!(
        resource = %config.resource_name,
        dir = %config.plugin_dir.display(),
        "configuration loaded"
    );

    let mut manager = LifecycleManager::new(config, cpu_devices).with_health_probe(cpu_health);
    manager.run().await
}

/// Enumerate logical processors from `/proc/cpuinfo` as healthy devices.
///
/// Fails soft on unreadable or unparsable input by returning an empty
/// inventory; the registry publishes it as "zero devices".
fn cpu_devices() -> Result<Vec<DeviceRecord>> {
    let cpuinfo = match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, "cannot read /proc/cpuinfo");
            return Ok(Vec::new());
        }
    };

    let processors = cpuinfo
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count();
    if processors == 0 {
        warn!("no processor entries found in /proc/cpuinfo");
        return Ok(Vec::new());
    }

    info!(count = processors, "enumerated logical processors");
    Ok((0..processors)
        .map(|index| DeviceRecord::healthy(index.to_string()))
        .collect())
}

/// Re-count online processors and flag advertised devices whose index fell
/// off the end (taken offline) as unhealthy, and back once they return.
fn cpu_health(devices: &[DeviceRecord]) -> Vec<HealthUpdate> {
    let online = match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(raw) => raw
            .lines()
            .filter(|line| line.starts_with("processor"))
            .count(),
        Err(err) => {
            warn!(%err, "cannot read /proc/cpuinfo; skipping health pass");
            return Vec::new();
        }
    };

    devices
        .iter()
        .filter_map(|device| {
            let index: usize = device.id.parse().ok()?;
            let expected = if index < online {
                Health::Healthy
            } else {
                Health::Unhealthy
            };
            (device.health != expected).then(|| HealthUpdate {
                id: device.id.clone(),
                health: expected,
            })
        })
        .collect()
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
