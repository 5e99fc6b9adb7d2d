//! # DSU Client
//!
//! Connect to one or more DSU servers and log the controllers they expose.
//!
//! This binary is a minimal host for the driver: it polls detect and update
//! on an interval and logs device arrivals, removals and button changes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use dsu_client::client::host::{HostInput, PowerLevel, SensorKind};
use dsu_client::config::{Config, LoggingConfig};
use dsu_client::driver::DsuDriver;

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Host poll rate in Hz
const POLL_RATE_HZ: u64 = 60;

/// Interval between status log messages
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Host that logs what the driver reports
#[derive(Default)]
struct LoggingHost {
    buttons: Mutex<HashMap<(u32, u8), bool>>,
    power: Mutex<HashMap<u32, PowerLevel>>,
}

impl HostInput for LoggingHost {
    fn add_device(&self, instance_id: u32) -> bool {
        info!("Controller added (instance {})", instance_id);
        true
    }

    fn remove_device(&self, instance_id: u32) {
        info!("Controller removed (instance {})", instance_id);
        self.buttons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _), _| *id != instance_id);
        self.power.lock().unwrap_or_else(PoisonError::into_inner).remove(&instance_id);
    }

    fn deliver_button(&self, _timestamp: Instant, instance_id: u32, button: u8, pressed: bool) {
        let mut buttons = self.buttons.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = buttons.insert((instance_id, button), pressed).unwrap_or(false);
        if previous != pressed {
            info!("Instance {} button {} {}", instance_id, button, if pressed { "pressed" } else { "released" });
        }
    }

    fn deliver_axis(&self, _timestamp: Instant, _instance_id: u32, _axis: u8, _value: i16) {}

    fn deliver_hat(&self, _timestamp: Instant, _instance_id: u32, _hat: u8, _value: u8) {}

    fn deliver_touch(
        &self,
        _timestamp: Instant,
        _instance_id: u32,
        _touchpad: u8,
        _finger: u8,
        _down: bool,
        _x: f32,
        _y: f32,
        _pressure: f32,
    ) {
    }

    fn deliver_sensor(
        &self,
        _timestamp: Instant,
        _instance_id: u32,
        _kind: SensorKind,
        _sensor_timestamp: u64,
        _values: [f32; 3],
    ) {
    }

    fn deliver_power(&self, _timestamp: Instant, instance_id: u32, level: PowerLevel) {
        let previous = self
            .power
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance_id, level);
        if previous != Some(level) {
            info!("Instance {} battery: {:?}", instance_id, level);
        }
    }
}

/// Load the configuration named on the command line, or the default file
///
/// A missing default file falls back to built-in defaults.
fn load_config() -> Result<Config> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            Config::load(&path).with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. When a log directory is set,
/// output is also written to a daily rolling file; the returned guard must
/// be held until exit so buffered lines are flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.directory.is_empty() {
        tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.directory, &config.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

/// Open newly connected devices, close vanished ones, update the rest
fn poll_devices(driver: &DsuDriver, opened: &mut HashSet<u32>) -> dsu_client::error::Result<()> {
    driver.detect()?;

    let mut present = HashSet::new();
    for index in 0..driver.count()? {
        let instance_id = driver.device_instance_id(index)?;
        present.insert(instance_id);

        if opened.insert(instance_id) {
            let caps = driver.open(index)?;
            info!(
                "Opened {} (guid {}, player {}): {} buttons, {} axes, {} touchpad(s), {} sensor(s)",
                driver.device_name(index)?,
                driver.device_guid(index)?,
                driver.device_player_index(index)?,
                caps.buttons,
                caps.axes,
                caps.touchpads.len(),
                caps.sensors.len()
            );
        }
    }

    opened.retain(|instance_id| {
        if present.contains(instance_id) {
            return true;
        }
        if let Err(e) = driver.close(*instance_id) {
            debug!("Failed to close instance {}: {}", instance_id, e);
        }
        false
    });

    for &instance_id in opened.iter() {
        driver.update(instance_id)?;
    }

    Ok(())
}

/// Main entry point for the DSU client
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, `config/default.toml`, or defaults)
///    - Set up logging
///    - Start the DSU session
///
/// 2. **Main Loop**
///    - Detect and update controllers at 60Hz
///    - Log a status line every 5 seconds
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop every receive worker and close the sockets
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    let _log_guard = init_logging(&config.logging);

    info!("DSU Client v{} starting...", env!("CARGO_PKG_VERSION"));

    let driver = DsuDriver::new();
    driver
        .init(&config, Arc::new(LoggingHost::default()))
        .context("Failed to start DSU session")?;

    if !driver.is_initialized() {
        warn!("DSU client is disabled, nothing to do");
        return Ok(());
    }

    info!("Polling DSU servers: {}", config.dsu.servers);
    info!("Press Ctrl+C to exit");

    let mut poll_interval = interval(Duration::from_millis(1000 / POLL_RATE_HZ));
    let mut status_interval = interval(STATUS_INTERVAL);
    let mut opened = HashSet::new();

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {
                if let Err(e) = poll_devices(&driver, &mut opened) {
                    debug!("Poll failed: {}", e);
                }
            }

            _ = status_interval.tick() => {
                info!("{} controller(s) connected", driver.count().unwrap_or(0));
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    driver.quit();
    Ok(())
}
