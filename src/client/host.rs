//! Callback interface into the host input subsystem
//!
//! The host owns the joystick objects and the device list. The client only
//! announces devices and pushes samples through [`HostInput`]; no method of
//! this trait is ever called while the slot lock is held.

use std::time::Instant;

/// Hat value: centered
pub const HAT_CENTERED: u8 = 0x00;
/// Hat bit: up
pub const HAT_UP: u8 = 0x01;
/// Hat bit: right
pub const HAT_RIGHT: u8 = 0x02;
/// Hat bit: down
pub const HAT_DOWN: u8 = 0x04;
/// Hat bit: left
pub const HAT_LEFT: u8 = 0x08;

/// Motion sensor kinds a DSU controller can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Angular rate in rad/s
    Gyro,
    /// Acceleration in m/s²
    Accel,
}

/// Host-side battery classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerLevel {
    #[default]
    Unknown,
    Low,
    Medium,
    Full,
    /// Powered by cable (charging or charged)
    Wired,
}

/// Host input subsystem callbacks
///
/// Implementations do their own locking. `add_device` may re-enter the
/// driver (for example to query a device name), so it is only called from
/// the detect path with no client lock held.
#[cfg_attr(test, mockall::automock)]
pub trait HostInput: Send + Sync {
    /// Announce a new device; returns false if the host rejects it
    fn add_device(&self, instance_id: u32) -> bool;

    /// Withdraw a previously added device
    fn remove_device(&self, instance_id: u32);

    /// Button state sample
    fn deliver_button(&self, timestamp: Instant, instance_id: u32, button: u8, pressed: bool);

    /// Axis sample in the signed 16-bit range
    fn deliver_axis(&self, timestamp: Instant, instance_id: u32, axis: u8, value: i16);

    /// Hat sample made of `HAT_*` bits
    fn deliver_hat(&self, timestamp: Instant, instance_id: u32, hat: u8, value: u8);

    /// Touchpad finger sample, coordinates normalized to [0, 1]
    #[allow(clippy::too_many_arguments)]
    fn deliver_touch(
        &self,
        timestamp: Instant,
        instance_id: u32,
        touchpad: u8,
        finger: u8,
        down: bool,
        x: f32,
        y: f32,
        pressure: f32,
    );

    /// Motion sample; `sensor_timestamp` is the device clock in microseconds
    fn deliver_sensor(
        &self,
        timestamp: Instant,
        instance_id: u32,
        kind: SensorKind,
        sensor_timestamp: u64,
        values: [f32; 3],
    );

    /// Battery sample
    fn deliver_power(&self, timestamp: Instant, instance_id: u32, level: PowerLevel);
}
