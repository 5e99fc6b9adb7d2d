//! # DSU Driver Façade
//!
//! The entry points a host input subsystem calls: enumerate, open, update,
//! rumble, close and quit. At most one session is active per driver.
//!
//! Device indices enumerate connected controllers in (server, slot) order.
//! Every operation fails with [`DsuError::NotInitialized`] when no session
//! is running.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use dsu_client::config::Config;
//! use dsu_client::driver::DsuDriver;
//! # use dsu_client::client::host::{HostInput, PowerLevel, SensorKind};
//! # use std::time::Instant;
//! # struct MyHost;
//! # impl HostInput for MyHost {
//! #     fn add_device(&self, _: u32) -> bool { true }
//! #     fn remove_device(&self, _: u32) {}
//! #     fn deliver_button(&self, _: Instant, _: u32, _: u8, _: bool) {}
//! #     fn deliver_axis(&self, _: Instant, _: u32, _: u8, _: i16) {}
//! #     fn deliver_hat(&self, _: Instant, _: u32, _: u8, _: u8) {}
//! #     fn deliver_touch(&self, _: Instant, _: u32, _: u8, _: u8, _: bool, _: f32, _: f32, _: f32) {}
//! #     fn deliver_sensor(&self, _: Instant, _: u32, _: SensorKind, _: u64, _: [f32; 3]) {}
//! #     fn deliver_power(&self, _: Instant, _: u32, _: PowerLevel) {}
//! # }
//!
//! let driver = DsuDriver::new();
//! driver.init(&Config::default(), Arc::new(MyHost))?;
//!
//! driver.detect()?;
//! for index in 0..driver.count()? {
//!     let caps = driver.open(index)?;
//!     driver.update(caps.instance_id)?;
//! }
//!
//! driver.quit();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, info};

use crate::client::host::{HostInput, SensorKind};
use crate::client::session::Session;
use crate::client::slot::{JoystickGuid, Slot, AXIS_COUNT, BUTTON_COUNT, TOUCH_POINTS};
use crate::config::Config;
use crate::error::{DsuError, Result};
use crate::protocol::protocol::DeviceModel;

/// Sensor report rate advertised at open
pub const SENSOR_RATE_HZ: f32 = 250.0;

/// Sensor advertised by an opened device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorInfo {
    pub kind: SensorKind,
    pub rate_hz: f32,
}

/// What an opened device exposes
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub instance_id: u32,
    pub buttons: u8,
    pub axes: u8,
    pub hats: u8,
    /// Touchpads with their finger count
    pub touchpads: Vec<u8>,
    pub sensors: Vec<SensorInfo>,
}

/// Optional features a device supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    pub rumble: bool,
    pub trigger_rumble: bool,
    pub led: bool,
}

struct ActiveSession {
    session: Session,
    host: Arc<dyn HostInput>,
}

/// Host-facing DSU driver
#[derive(Default)]
pub struct DsuDriver {
    active: RwLock<Option<Arc<ActiveSession>>>,
    opened: Mutex<HashMap<u32, DeviceCapabilities>>,
}

impl DsuDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session from configuration
    ///
    /// A disabled configuration leaves the driver uninitialized. Calling
    /// `init` on a running driver is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the server list does not resolve or no connection
    /// could be opened
    pub fn init(&self, config: &Config, host: Arc<dyn HostInput>) -> Result<()> {
        if !config.dsu.enabled {
            info!("DSU client disabled by configuration");
            return Ok(());
        }
        if self.is_initialized() {
            return Ok(());
        }

        let session = Session::start(config.session_config()?)?;
        self.attach(session, host);
        Ok(())
    }

    /// Install an already started session
    ///
    /// Replaces and shuts down any previous session.
    pub fn attach(&self, session: Session, host: Arc<dyn HostInput>) {
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(ActiveSession { session, host }));
        if let Some(previous) = previous {
            previous.session.shutdown();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.active.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn active(&self) -> Result<Arc<ActiveSession>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DsuError::NotInitialized)
    }

    fn opened(&self) -> MutexGuard<'_, HashMap<u32, DeviceCapabilities>> {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connected controllers
    pub fn count(&self) -> Result<usize> {
        Ok(self.active()?.session.device_count())
    }

    /// Run one detect cycle (re-subscribe, promote, sweep)
    pub fn detect(&self) -> Result<()> {
        let active = self.active()?;
        active.session.detect(active.host.as_ref());
        self.forget_removed(&active.session);
        Ok(())
    }

    /// Drop opened entries whose controller the session has removed
    fn forget_removed(&self, session: &Session) {
        let opened: Vec<u32> = self.opened().keys().copied().collect();
        let removed: Vec<u32> = opened
            .into_iter()
            .filter(|&id| !session.snapshot(id).is_some_and(|slot| slot.connected))
            .collect();

        if removed.is_empty() {
            return;
        }
        let mut opened = self.opened();
        for instance_id in removed {
            if opened.remove(&instance_id).is_some() {
                debug!("Forgot removed DSU device instance {}", instance_id);
            }
        }
    }

    fn with_device<R>(&self, index: usize, f: impl FnOnce(&Slot) -> R) -> Result<R> {
        let active = self.active()?;
        let slot = active.session.device(index).ok_or(DsuError::DeviceNotFound(index))?;
        Ok(f(&slot))
    }

    /// Display name, `DSUClient/<server>/<slot>`
    pub fn device_name(&self, index: usize) -> Result<String> {
        self.with_device(index, |slot| slot.name.clone())
    }

    /// DSU devices have no filesystem path
    pub fn device_path(&self, index: usize) -> Result<Option<String>> {
        self.with_device(index, |_| None)
    }

    /// Player index is the slot index on its server
    pub fn device_player_index(&self, index: usize) -> Result<i32> {
        self.with_device(index, |slot| slot.slot_id as i32)
    }

    /// Player indices are fixed by the server; accepted and ignored
    pub fn set_device_player_index(&self, index: usize, player_index: i32) -> Result<()> {
        self.active()?;
        debug!("Ignoring player index {} for device {}", player_index, index);
        Ok(())
    }

    pub fn device_guid(&self, index: usize) -> Result<JoystickGuid> {
        self.with_device(index, |slot| slot.guid)
    }

    pub fn device_instance_id(&self, index: usize) -> Result<u32> {
        self.with_device(index, |slot| slot.instance_id)
    }

    /// Open the device at `index`
    ///
    /// Gyro is advertised for full- and partial-gyro models (or when motion
    /// was already received); accel for full-gyro models likewise. Both are
    /// reported at 250 Hz.
    ///
    /// # Errors
    ///
    /// Returns `DsuError::DeviceNotFound` if `index` is out of range
    pub fn open(&self, index: usize) -> Result<DeviceCapabilities> {
        let active = self.active()?;
        let capabilities = active
            .session
            .with_device_mut(index, |slot| {
                if slot.has_gyro || matches!(slot.model, DeviceModel::FullGyro | DeviceModel::PartialGyro) {
                    slot.has_gyro = true;
                }
                if slot.has_accel || slot.model == DeviceModel::FullGyro {
                    slot.has_accel = true;
                }

                let mut sensors = Vec::new();
                if slot.has_gyro {
                    sensors.push(SensorInfo { kind: SensorKind::Gyro, rate_hz: SENSOR_RATE_HZ });
                }
                if slot.has_accel {
                    sensors.push(SensorInfo { kind: SensorKind::Accel, rate_hz: SENSOR_RATE_HZ });
                }

                DeviceCapabilities {
                    instance_id: slot.instance_id,
                    buttons: BUTTON_COUNT,
                    axes: AXIS_COUNT as u8,
                    hats: 1,
                    touchpads: if slot.has_touchpad { vec![TOUCH_POINTS as u8] } else { Vec::new() },
                    sensors,
                }
            })
            .ok_or(DsuError::DeviceNotFound(index))?;

        info!("Opened DSU device {} (instance {})", index, capabilities.instance_id);
        self.opened().insert(capabilities.instance_id, capabilities.clone());
        Ok(capabilities)
    }

    /// Deliver the latest state of an opened device to the host
    ///
    /// The slot is copied out under the lock; delivery happens after it is
    /// released. A device that is no longer connected delivers nothing.
    pub fn update(&self, instance_id: u32) -> Result<()> {
        let active = self.active()?;
        let capabilities = self
            .opened()
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| DsuError::NotAvailable(format!("instance {} is not open", instance_id)))?;

        let slot = match active.session.snapshot(instance_id) {
            Some(slot) if slot.connected => slot,
            _ => {
                self.opened().remove(&instance_id);
                return Ok(());
            }
        };

        let host = active.host.as_ref();
        let now = Instant::now();

        for button in 0..BUTTON_COUNT {
            host.deliver_button(now, instance_id, button, slot.button_pressed(button));
        }
        for axis in 0..AXIS_COUNT {
            host.deliver_axis(now, instance_id, axis as u8, slot.axis(axis));
        }
        host.deliver_hat(now, instance_id, 0, slot.hat);

        if slot.has_touchpad && !capabilities.touchpads.is_empty() {
            for finger in 0..TOUCH_POINTS {
                if let Some((down, x, y, pressure)) = slot.touch(finger) {
                    host.deliver_touch(now, instance_id, 0, finger as u8, down, x, y, pressure);
                }
            }
        }

        host.deliver_power(now, instance_id, slot.power_level());

        if slot.has_gyro {
            host.deliver_sensor(now, instance_id, SensorKind::Gyro, slot.motion.timestamp, slot.motion.gyro);
        }
        if slot.has_accel {
            host.deliver_sensor(now, instance_id, SensorKind::Accel, slot.motion.timestamp, slot.motion.accel);
        }

        Ok(())
    }

    /// Rumble, 16-bit motor intensities
    pub fn rumble(&self, instance_id: u32, low_frequency: u16, high_frequency: u16) -> Result<()> {
        self.active()?.session.rumble(instance_id, low_frequency, high_frequency)
    }

    pub fn rumble_triggers(&self, _instance_id: u32, _left: u16, _right: u16) -> Result<()> {
        self.active()?;
        Err(DsuError::Unsupported("trigger rumble"))
    }

    pub fn capabilities(&self, _instance_id: u32) -> Result<FeatureFlags> {
        self.active()?;
        Ok(FeatureFlags {
            rumble: true,
            ..Default::default()
        })
    }

    pub fn set_led(&self, _instance_id: u32, _red: u8, _green: u8, _blue: u8) -> Result<()> {
        self.active()?;
        Err(DsuError::Unsupported("LED"))
    }

    pub fn send_effect(&self, _instance_id: u32, _effect: &[u8]) -> Result<()> {
        self.active()?;
        Err(DsuError::Unsupported("effect packets"))
    }

    /// Motion sensors always stream when present
    pub fn set_sensors_enabled(&self, instance_id: u32, _enabled: bool) -> Result<()> {
        let has_sensors = self
            .active()?
            .session
            .with_instance_mut(instance_id, |slot| slot.has_gyro || slot.has_accel)
            .unwrap_or(false);

        if has_sensors {
            Ok(())
        } else {
            Err(DsuError::Unsupported("motion sensors"))
        }
    }

    /// Forget an opened device
    pub fn close(&self, instance_id: u32) -> Result<()> {
        self.active()?;
        if self.opened().remove(&instance_id).is_some() {
            debug!("Closed DSU device instance {}", instance_id);
        }
        Ok(())
    }

    /// Shut the session down
    ///
    /// The session is detached first so concurrent callers see "not
    /// initialized", then its workers are stopped and joined.
    pub fn quit(&self) {
        let active = self.active.write().unwrap_or_else(PoisonError::into_inner).take();
        self.opened().clear();

        if let Some(active) = active {
            active.session.shutdown();
            info!("DSU client shut down");
        }
    }
}

impl Drop for DsuDriver {
    fn drop(&mut self) {
        self.quit();
    }
}
