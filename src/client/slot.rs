//! # Controller Slot State
//!
//! Per-slot state machine and the translation from DSU wire samples to the
//! host's joystick ranges.
//!
//! ## Lifecycle
//!
//! ```text
//! absent ──Data(state=connected)──▶ detected ──host accepts──▶ connected
//!   ▲                                  │                           │
//!   └──────Data(state≠connected)───────┘                           │
//!   └────────────────────────timeout sweep─────────────────────────┘
//! ```
//!
//! - `connected` implies `detected`
//! - `instance_id != 0` exactly when the slot is detected or connected
//!
//! ## Field Translation
//!
//! | Wire | Host | Rule |
//! |------|------|------|
//! | Stick X (0-255) | axis 0 / 2 | `(raw - 128) * 257` |
//! | Stick Y (0-255) | axis 1 / 3 | `(raw - 128) * -257` |
//! | L2 / R2 analog (0-255) | axis 4 / 5 | `raw * 128` |
//! | D-pad bits | hat 0 | up / right / down / left bits |
//! | Gyro (deg/s) | gyro (rad/s) | `* π / 180` |
//! | Accel (g) | accel (m/s²) | `* 9.80665` |
//! | Touch (1920×943) | [0, 1] | divide, then clamp |
//!
//! ## Buttons
//!
//! | Index | Button |
//! |-------|--------|
//! | 0 | Cross |
//! | 1 | Circle |
//! | 2 | Square |
//! | 3 | Triangle |
//! | 4 | L1 |
//! | 5 | R1 |
//! | 6 | Share |
//! | 7 | Options |
//! | 8 | L3 |
//! | 9 | R3 |
//! | 10 | PS |
//! | 11 | Touchpad click |

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::host::{PowerLevel, HAT_CENTERED, HAT_DOWN, HAT_LEFT, HAT_RIGHT, HAT_UP};
use crate::protocol::crc::crc16;
use crate::protocol::protocol::*;

/// Buttons exposed per controller
pub const BUTTON_COUNT: u8 = 12;

/// Axes exposed per controller: LX, LY, RX, RY, L2, R2
pub const AXIS_COUNT: usize = 6;

/// Touch points per Data packet
pub const TOUCH_POINTS: usize = 2;

/// Touchpad reference resolution
pub const TOUCHPAD_WIDTH: f32 = 1920.0;
/// Touchpad reference resolution
pub const TOUCHPAD_HEIGHT: f32 = 943.0;

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// Name prefix for generated display names
pub const DRIVER_NAME: &str = "DSUClient";

/// GUID bus type: Bluetooth
const GUID_BUS_BLUETOOTH: u16 = 0x05;
/// Sony vendor id
const GUID_VENDOR_SONY: u16 = 0x054C;
/// DualShock 4 product id
const GUID_PRODUCT_DS4: u16 = 0x05C4;
/// DualShock 4 (second revision) product id, used for full-gyro devices
const GUID_PRODUCT_DS4_V2: u16 = 0x09CC;
/// Driver signature byte
const GUID_DRIVER_SIGNATURE: u8 = b'd';

/// 16-byte joystick GUID in the SDL layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JoystickGuid(pub [u8; 16]);

impl JoystickGuid {
    /// Build the GUID for a slot from its display name and device model
    ///
    /// Layout (little-endian `u16` words): bus, CRC-16 of the name, vendor,
    /// 0, product, 0, version, then the driver signature and data bytes.
    pub fn for_slot(name: &str, model: DeviceModel) -> Self {
        let product = if model == DeviceModel::FullGyro {
            GUID_PRODUCT_DS4_V2
        } else {
            GUID_PRODUCT_DS4
        };

        let words = [GUID_BUS_BLUETOOTH, crc16(name.as_bytes()), GUID_VENDOR_SONY, 0, product, 0, 0];
        let mut bytes = [0u8; 16];
        for (i, word) in words.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        bytes[14] = GUID_DRIVER_SIGNATURE;
        bytes[15] = 0;

        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for JoystickGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Motion sample converted to host units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSample {
    /// Device timestamp in microseconds
    pub timestamp: u64,
    /// Angular rate in rad/s: pitch, yaw, roll
    pub gyro: [f32; 3],
    /// Acceleration in m/s²: x, y, z
    pub accel: [f32; 3],
}

/// One controller slot (index 0-3) of one server
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    // Identity
    pub server_index: usize,
    pub slot_id: u8,
    pub mac: [u8; 6],
    pub model: DeviceModel,
    pub connection: ConnectionType,
    pub battery: BatteryState,

    // Host-facing identity
    pub instance_id: u32,
    pub guid: JoystickGuid,
    pub name: String,

    // Lifecycle
    /// Server reports a controller at this slot
    pub detected: bool,
    /// Host has accepted the device
    pub connected: bool,
    /// Promoted internally, not yet surfaced to the host
    pub pending_add: bool,

    // Live input state
    /// Unified button bitmask, see module docs for bit positions
    pub buttons: u16,
    /// Full-precision axes; saturated to `i16` on delivery
    pub axes: [i32; AXIS_COUNT],
    pub hat: u8,
    /// Raw touch points in wire coordinates
    pub touches: [TouchPoint; TOUCH_POINTS],
    pub motion: MotionSample,

    pub has_touchpad: bool,
    pub has_gyro: bool,
    pub has_accel: bool,

    // Liveness
    pub last_packet_time: Option<Instant>,
    pub packet_number: u32,
}

impl Slot {
    /// Create an absent slot
    pub fn new(server_index: usize, slot_id: u8) -> Self {
        Self {
            server_index,
            slot_id,
            mac: [0; 6],
            model: DeviceModel::default(),
            connection: ConnectionType::default(),
            battery: BatteryState::default(),
            instance_id: 0,
            guid: JoystickGuid::default(),
            name: String::new(),
            detected: false,
            connected: false,
            pending_add: false,
            buttons: 0,
            axes: [0; AXIS_COUNT],
            hat: HAT_CENTERED,
            touches: [TouchPoint::default(); TOUCH_POINTS],
            motion: MotionSample::default(),
            has_touchpad: false,
            has_gyro: false,
            has_accel: false,
            last_packet_time: None,
            packet_number: 0,
        }
    }

    /// Detected or connected
    pub fn is_present(&self) -> bool {
        self.detected || self.connected
    }

    /// Return to the absent state, dropping identity and input state
    fn reset(&mut self) {
        *self = Slot::new(self.server_index, self.slot_id);
    }

    /// Axis value in the host's signed 16-bit range
    pub fn axis(&self, axis: usize) -> i16 {
        self.axes
            .get(axis)
            .map(|&v| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .unwrap_or(0)
    }

    pub fn button_pressed(&self, button: u8) -> bool {
        button < BUTTON_COUNT && self.buttons & (1 << button) != 0
    }

    pub fn power_level(&self) -> PowerLevel {
        power_level(self.battery)
    }

    /// Touch point as (down, x, y, pressure) with coordinates in [0, 1]
    pub fn touch(&self, finger: usize) -> Option<(bool, f32, f32, f32)> {
        self.touches.get(finger).map(|touch| {
            let (x, y) = normalize_touch(touch.x, touch.y);
            let pressure = if touch.active { 1.0 } else { 0.0 };
            (touch.active, x, y, pressure)
        })
    }

    /// Copy identity and input fields out of a Data sample
    fn refresh(&mut self, data: &ControllerData, now: Instant) {
        self.mac = data.info.mac;
        self.battery = data.info.battery;
        self.model = data.info.model;
        self.connection = data.info.connection;
        self.name = display_name(self.server_index, self.slot_id);

        self.buttons = map_buttons(data);
        self.axes = [
            stick_x(data.left_stick_x),
            stick_y(data.left_stick_y),
            stick_x(data.right_stick_x),
            stick_y(data.right_stick_y),
            trigger(data.analog_l2),
            trigger(data.analog_r2),
        ];
        self.hat = hat_from_buttons(data.buttons1);

        if data.motion_timestamp != 0 {
            self.has_gyro = true;
            self.has_accel = true;
            self.motion = MotionSample {
                timestamp: data.motion_timestamp,
                gyro: data.gyro.map(|v| v.to_radians()),
                accel: data.accel.map(|v| v * STANDARD_GRAVITY),
            };
        }

        self.has_touchpad = true;
        self.touches = data.touches;

        self.last_packet_time = Some(now);
        self.packet_number = data.packet_number;
    }
}

/// A slot promoted to detected, waiting for the host to accept it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAdd {
    pub server_index: usize,
    pub slot_id: u8,
    pub instance_id: u32,
}

/// A slot cleared by the timeout sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub server_index: usize,
    pub slot_id: u8,
    /// Instance id captured before clearing
    pub instance_id: u32,
    /// The host knew about this device and must be told it is gone
    pub was_connected: bool,
}

/// All slots across every server of one session
///
/// Lives behind the session's single lock; every method assumes the
/// caller holds it.
#[derive(Debug)]
pub struct SlotTable {
    servers: Vec<[Slot; DSU_MAX_SLOTS]>,
    next_instance_id: u32,
}

impl SlotTable {
    /// Create a table with four absent slots per server
    pub fn new(server_count: usize) -> Self {
        let servers = (0..server_count)
            .map(|server| std::array::from_fn(|slot| Slot::new(server, slot as u8)))
            .collect();

        Self {
            servers,
            next_instance_id: 1,
        }
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn slot(&self, server_index: usize, slot_id: u8) -> Option<&Slot> {
        self.servers.get(server_index)?.get(slot_id as usize)
    }

    pub(crate) fn slot_mut(&mut self, server_index: usize, slot_id: u8) -> Option<&mut Slot> {
        self.servers.get_mut(server_index)?.get_mut(slot_id as usize)
    }

    /// Every slot in (server, slot) order
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.servers.iter().flat_map(|slots| slots.iter())
    }

    /// Connected slots in (server, slot) order; position is the device index
    pub fn connected(&self) -> impl Iterator<Item = &Slot> {
        self.iter().filter(|slot| slot.connected)
    }

    pub fn find_by_instance(&self, instance_id: u32) -> Option<&Slot> {
        if instance_id == 0 {
            return None;
        }
        self.iter().find(|slot| slot.instance_id == instance_id)
    }

    pub(crate) fn find_by_instance_mut(&mut self, instance_id: u32) -> Option<&mut Slot> {
        if instance_id == 0 {
            return None;
        }
        self.servers
            .iter_mut()
            .flat_map(|slots| slots.iter_mut())
            .find(|slot| slot.instance_id == instance_id)
    }

    /// Slots that should receive a Data subscription refresh
    pub fn present_slots(&self) -> Vec<(usize, u8)> {
        self.iter()
            .filter(|slot| slot.is_present())
            .map(|slot| (slot.server_index, slot.slot_id))
            .collect()
    }

    /// Every slot still waiting for the host, by scan
    pub fn pending(&self) -> Vec<PendingAdd> {
        self.iter()
            .filter(|slot| slot.pending_add && slot.detected && !slot.connected)
            .map(|slot| PendingAdd {
                server_index: slot.server_index,
                slot_id: slot.slot_id,
                instance_id: slot.instance_id,
            })
            .collect()
    }

    fn allocate_instance_id(&mut self) -> u32 {
        let id = self.next_instance_id;
        self.next_instance_id = self.next_instance_id.wrapping_add(1).max(1);
        id
    }

    /// Apply one inbound Data sample to its slot
    ///
    /// # Arguments
    ///
    /// * `server_index` - Connection the packet arrived on
    /// * `data` - Decoded sample
    /// * `now` - Receive time, recorded as the slot's liveness timestamp
    ///
    /// # Returns
    ///
    /// * `Some(PendingAdd)` - The slot just became detected and has a fresh
    ///   instance id; the caller must queue it for the host and subscribe
    /// * `None` - Otherwise (including rejected slot indices)
    pub fn apply_data(&mut self, server_index: usize, data: &ControllerData, now: Instant) -> Option<PendingAdd> {
        let slot_id = data.info.slot;
        if slot_id as usize >= DSU_MAX_SLOTS {
            warn!("Ignoring Data packet for invalid slot {} from server {}", slot_id, server_index);
            return None;
        }

        let next_id = self.next_instance_id;
        let slot = self.slot_mut(server_index, slot_id)?;
        let was_present = slot.is_present();

        if !slot.connected {
            slot.detected = data.info.slot_state == SlotState::Connected;
        }

        if !slot.is_present() {
            if was_present {
                debug!("Slot {}/{} no longer reported connected before the host saw it", server_index, slot_id);
                slot.reset();
            }
            return None;
        }

        slot.refresh(data, now);

        if was_present {
            return None;
        }

        // First transition into detected
        slot.instance_id = next_id;
        slot.guid = JoystickGuid::for_slot(&slot.name, slot.model);
        slot.pending_add = true;
        info!(
            "Detected controller {} (instance {}, {:?}, {:?})",
            slot.name, slot.instance_id, slot.model, slot.connection
        );

        let pending = PendingAdd {
            server_index,
            slot_id,
            instance_id: next_id,
        };
        self.allocate_instance_id();
        Some(pending)
    }

    /// Whether `pending` still names a slot waiting for the host
    pub fn is_pending(&self, pending: &PendingAdd) -> bool {
        self.slot(pending.server_index, pending.slot_id).is_some_and(|slot| {
            slot.pending_add && slot.detected && !slot.connected && slot.instance_id == pending.instance_id
        })
    }

    /// Flip a pending slot to connected after the host accepted it
    ///
    /// Returns false if the slot was cleared or re-identified since the
    /// promotion was collected.
    pub fn mark_connected(&mut self, pending: &PendingAdd) -> bool {
        if !self.is_pending(pending) {
            return false;
        }
        match self.slot_mut(pending.server_index, pending.slot_id) {
            Some(slot) => {
                slot.connected = true;
                slot.pending_add = false;
                true
            }
            None => false,
        }
    }

    /// Clear every present slot whose last packet is older than `timeout`
    ///
    /// Returns the cleared slots with their prior instance ids.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<Expired> {
        let mut expired = Vec::new();

        for slot in self.servers.iter_mut().flat_map(|slots| slots.iter_mut()) {
            if !slot.is_present() {
                continue;
            }
            let stale = match slot.last_packet_time {
                Some(last) => now.saturating_duration_since(last) > timeout,
                None => true,
            };
            if !stale {
                continue;
            }

            expired.push(Expired {
                server_index: slot.server_index,
                slot_id: slot.slot_id,
                instance_id: slot.instance_id,
                was_connected: slot.connected,
            });
            info!("Controller {} (instance {}) timed out", slot.name, slot.instance_id);
            slot.reset();
        }

        expired
    }
}

/// Display name: `DSUClient/<server>/<slot>`
pub fn display_name(server_index: usize, slot_id: u8) -> String {
    format!("{}/{}/{}", DRIVER_NAME, server_index, slot_id)
}

/// Map the DSU button bytes onto the unified 12-bit button mask
pub fn map_buttons(data: &ControllerData) -> u16 {
    const MAP: [(bool, u8, u8); 10] = [
        (false, DSU_BUTTON_CROSS, 0),
        (false, DSU_BUTTON_CIRCLE, 1),
        (false, DSU_BUTTON_SQUARE, 2),
        (false, DSU_BUTTON_TRIANGLE, 3),
        (false, DSU_BUTTON_L1, 4),
        (false, DSU_BUTTON_R1, 5),
        (true, DSU_BUTTON_SHARE, 6),
        (true, DSU_BUTTON_OPTIONS, 7),
        (true, DSU_BUTTON_L3, 8),
        (true, DSU_BUTTON_R3, 9),
    ];

    let mut buttons = 0u16;
    for (first_byte, mask, bit) in MAP {
        let byte = if first_byte { data.buttons1 } else { data.buttons2 };
        if byte & mask != 0 {
            buttons |= 1 << bit;
        }
    }
    if data.button_ps != 0 {
        buttons |= 1 << 10;
    }
    if data.button_touch != 0 {
        buttons |= 1 << 11;
    }
    buttons
}

/// Stick X: 0..255 centered at 128 → signed host range
pub fn stick_x(raw: u8) -> i32 {
    (raw as i32 - 128) * 257
}

/// Stick Y: inverted (wire up, host down)
pub fn stick_y(raw: u8) -> i32 {
    (raw as i32 - 128) * -257
}

/// Trigger pressure 0..255 → 0..32640
pub fn trigger(raw: u8) -> i32 {
    raw as i32 * 128
}

/// Synthesize the hat value from the D-pad bits of buttons byte 1
pub fn hat_from_buttons(buttons1: u8) -> u8 {
    let mut hat = HAT_CENTERED;
    if buttons1 & DSU_BUTTON_DPAD_UP != 0 {
        hat |= HAT_UP;
    }
    if buttons1 & DSU_BUTTON_DPAD_RIGHT != 0 {
        hat |= HAT_RIGHT;
    }
    if buttons1 & DSU_BUTTON_DPAD_DOWN != 0 {
        hat |= HAT_DOWN;
    }
    if buttons1 & DSU_BUTTON_DPAD_LEFT != 0 {
        hat |= HAT_LEFT;
    }
    hat
}

/// Wire touch coordinates → [0, 1]
pub fn normalize_touch(x: u16, y: u16) -> (f32, f32) {
    (
        (x as f32 / TOUCHPAD_WIDTH).clamp(0.0, 1.0),
        (y as f32 / TOUCHPAD_HEIGHT).clamp(0.0, 1.0),
    )
}

/// DSU battery state → host power level
pub fn power_level(battery: BatteryState) -> PowerLevel {
    match battery {
        BatteryState::Dying | BatteryState::Low => PowerLevel::Low,
        BatteryState::Medium => PowerLevel::Medium,
        BatteryState::High | BatteryState::Full => PowerLevel::Full,
        BatteryState::Charging | BatteryState::Charged => PowerLevel::Wired,
        BatteryState::NotApplicable => PowerLevel::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(slot: u8, state: SlotState) -> ControllerData {
        ControllerData {
            info: PortInfo {
                slot,
                slot_state: state,
                model: DeviceModel::FullGyro,
                connection: ConnectionType::Bluetooth,
                mac: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
                battery: BatteryState::High,
            },
            active: true,
            left_stick_x: 128,
            left_stick_y: 128,
            right_stick_x: 128,
            right_stick_y: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_axis_mapping() {
        assert_eq!(stick_x(0), -32896);
        assert_eq!(stick_x(128), 0);
        assert_eq!(stick_x(255), 32639);

        // Y is sign-inverted relative to X
        for raw in [0u8, 1, 64, 128, 200, 255] {
            assert_eq!(stick_y(raw), -stick_x(raw));
        }
    }

    #[test]
    fn test_axis_delivery_saturates() {
        let mut slot = Slot::new(0, 0);
        slot.axes[0] = stick_x(0);
        slot.axes[1] = stick_y(0);
        assert_eq!(slot.axis(0), i16::MIN);
        assert_eq!(slot.axis(1), i16::MAX);
        assert_eq!(slot.axis(99), 0);
    }

    #[test]
    fn test_trigger_mapping() {
        assert_eq!(trigger(0), 0);
        assert_eq!(trigger(1), 128);
        assert_eq!(trigger(255), 32640);
    }

    #[test]
    fn test_button_mapping() {
        let mut data = ControllerData::default();
        data.buttons2 = DSU_BUTTON_CROSS;
        assert_eq!(map_buttons(&data), 1 << 0);

        data.buttons2 = DSU_BUTTON_TRIANGLE | DSU_BUTTON_R1;
        assert_eq!(map_buttons(&data), (1 << 3) | (1 << 5));

        data.buttons2 = 0;
        data.buttons1 = DSU_BUTTON_SHARE | DSU_BUTTON_R3;
        assert_eq!(map_buttons(&data), (1 << 6) | (1 << 9));

        data.buttons1 = 0;
        data.button_ps = 1;
        data.button_touch = 1;
        assert_eq!(map_buttons(&data), (1 << 10) | (1 << 11));

        // L2/R2 digital bits and D-pad bits are not buttons
        let mut data = ControllerData::default();
        data.buttons2 = DSU_BUTTON_L2 | DSU_BUTTON_R2;
        data.buttons1 = DSU_BUTTON_DPAD_UP | DSU_BUTTON_DPAD_LEFT;
        assert_eq!(map_buttons(&data), 0);
    }

    #[test]
    fn test_hat_from_buttons() {
        assert_eq!(hat_from_buttons(0), HAT_CENTERED);
        assert_eq!(hat_from_buttons(DSU_BUTTON_DPAD_UP), HAT_UP);
        assert_eq!(hat_from_buttons(DSU_BUTTON_DPAD_DOWN | DSU_BUTTON_DPAD_LEFT), HAT_DOWN | HAT_LEFT);
        assert_eq!(hat_from_buttons(DSU_BUTTON_DPAD_RIGHT | DSU_BUTTON_SHARE), HAT_RIGHT);
    }

    #[test]
    fn test_touch_normalization_clamps() {
        assert_eq!(normalize_touch(0, 0), (0.0, 0.0));
        assert_eq!(normalize_touch(1920, 943), (1.0, 1.0));
        assert_eq!(normalize_touch(4000, 2000), (1.0, 1.0));
        let (x, y) = normalize_touch(960, 0);
        assert!((x - 0.5).abs() < f32::EPSILON);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn test_power_level_mapping() {
        assert_eq!(power_level(BatteryState::Dying), PowerLevel::Low);
        assert_eq!(power_level(BatteryState::Low), PowerLevel::Low);
        assert_eq!(power_level(BatteryState::Medium), PowerLevel::Medium);
        assert_eq!(power_level(BatteryState::High), PowerLevel::Full);
        assert_eq!(power_level(BatteryState::Full), PowerLevel::Full);
        assert_eq!(power_level(BatteryState::Charging), PowerLevel::Wired);
        assert_eq!(power_level(BatteryState::Charged), PowerLevel::Wired);
        assert_eq!(power_level(BatteryState::NotApplicable), PowerLevel::Unknown);
    }

    #[test]
    fn test_guid_layout() {
        let guid = JoystickGuid::for_slot("DSUClient/0/1", DeviceModel::FullGyro);
        let bytes = guid.0;
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x05);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), crc16(b"DSUClient/0/1"));
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 0x054C);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 0x09CC);
        assert_eq!(bytes[14], b'd');
        assert_eq!(bytes[15], 0);

        let ds4 = JoystickGuid::for_slot("DSUClient/0/1", DeviceModel::PartialGyro);
        assert_eq!(u16::from_le_bytes([ds4.0[8], ds4.0[9]]), 0x05C4);
        assert_eq!(guid.to_string().len(), 32);
    }

    #[test]
    fn test_first_detection_assigns_identity() {
        let mut table = SlotTable::new(2);
        let now = Instant::now();

        let pending = table.apply_data(1, &sample(2, SlotState::Connected), now).unwrap();
        assert_eq!(pending, PendingAdd { server_index: 1, slot_id: 2, instance_id: 1 });

        let slot = table.slot(1, 2).unwrap();
        assert!(slot.detected && !slot.connected && slot.pending_add);
        assert_eq!(slot.name, "DSUClient/1/2");
        assert!(!slot.guid.is_zero());
        assert_eq!(slot.last_packet_time, Some(now));

        // Subsequent packets keep the same identity
        assert!(table.apply_data(1, &sample(2, SlotState::Connected), now).is_none());
        assert_eq!(table.slot(1, 2).unwrap().instance_id, 1);

        // A different slot gets the next id
        let second = table.apply_data(0, &sample(0, SlotState::Connected), now).unwrap();
        assert_eq!(second.instance_id, 2);
    }

    #[test]
    fn test_invalid_slot_index_ignored() {
        let mut table = SlotTable::new(1);
        assert!(table.apply_data(0, &sample(4, SlotState::Connected), Instant::now()).is_none());
        assert!(table.apply_data(0, &sample(0xFF, SlotState::Connected), Instant::now()).is_none());
        assert!(table.apply_data(3, &sample(0, SlotState::Connected), Instant::now()).is_none());
        assert!(table.iter().all(|slot| !slot.is_present()));
    }

    #[test]
    fn test_disconnected_sample_leaves_slot_absent() {
        let mut table = SlotTable::new(1);
        assert!(table.apply_data(0, &sample(0, SlotState::Disconnected), Instant::now()).is_none());
        let slot = table.slot(0, 0).unwrap();
        assert!(!slot.is_present());
        assert_eq!(slot.instance_id, 0);
        assert!(slot.name.is_empty());
    }

    #[test]
    fn test_detected_falls_back_to_absent() {
        let mut table = SlotTable::new(1);
        let now = Instant::now();
        let pending = table.apply_data(0, &sample(0, SlotState::Connected), now).unwrap();

        table.apply_data(0, &sample(0, SlotState::Reserved), now);
        let slot = table.slot(0, 0).unwrap();
        assert!(!slot.detected && !slot.pending_add);
        assert_eq!(slot.instance_id, 0);
        assert!(!table.is_pending(&pending));
        assert!(!table.mark_connected(&pending));
    }

    #[test]
    fn test_state_machine_monotonicity() {
        let mut table = SlotTable::new(1);
        let start = Instant::now();
        let timeout = Duration::from_millis(5000);

        // absent → detected
        let pending = table.apply_data(0, &sample(0, SlotState::Connected), start).unwrap();

        // detected → connected
        assert!(table.mark_connected(&pending));
        assert!(!table.mark_connected(&pending));
        let slot = table.slot(0, 0).unwrap();
        assert!(slot.connected && slot.detected);

        // A connected slot ignores the reported state; it never regresses to detected-only
        table.apply_data(0, &sample(0, SlotState::Disconnected), start);
        let slot = table.slot(0, 0).unwrap();
        assert!(slot.connected && slot.detected);

        // connected → absent, only via the sweep
        let expired = table.expire(start + Duration::from_millis(6000), timeout);
        assert_eq!(expired.len(), 1);
        let slot = table.slot(0, 0).unwrap();
        assert!(!slot.connected && !slot.detected);
        assert_eq!(slot.instance_id, 0);

        // Re-detection starts over with a fresh id
        let again = table.apply_data(0, &sample(0, SlotState::Connected), start).unwrap();
        assert_ne!(again.instance_id, pending.instance_id);
        assert!(!table.slot(0, 0).unwrap().connected);
    }

    #[test]
    fn test_expire_reports_prior_identity_once() {
        let mut table = SlotTable::new(1);
        let start = Instant::now();
        let timeout = Duration::from_millis(5000);

        let pending = table.apply_data(0, &sample(3, SlotState::Connected), start).unwrap();
        table.mark_connected(&pending);

        assert!(table.expire(start + Duration::from_millis(5000), timeout).is_empty());

        let expired = table.expire(start + Duration::from_millis(6000), timeout);
        assert_eq!(
            expired,
            vec![Expired { server_index: 0, slot_id: 3, instance_id: pending.instance_id, was_connected: true }]
        );
        assert!(table.expire(start + Duration::from_millis(7000), timeout).is_empty());
    }

    #[test]
    fn test_expire_detected_only_slot() {
        let mut table = SlotTable::new(1);
        let start = Instant::now();
        table.apply_data(0, &sample(1, SlotState::Connected), start);

        let expired = table.expire(start + Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(expired.len(), 1);
        assert!(!expired[0].was_connected);
        assert!(table.pending().is_empty());
    }

    #[test]
    fn test_motion_applied_only_with_timestamp() {
        let mut table = SlotTable::new(1);
        let now = Instant::now();

        let mut data = sample(0, SlotState::Connected);
        data.gyro = [180.0, 90.0, -180.0];
        data.accel = [0.0, 1.0, -1.0];
        table.apply_data(0, &data, now);
        let slot = table.slot(0, 0).unwrap();
        assert!(!slot.has_gyro && !slot.has_accel);
        assert_eq!(slot.motion, MotionSample::default());

        data.motion_timestamp = 12345;
        table.apply_data(0, &data, now);
        let slot = table.slot(0, 0).unwrap();
        assert!(slot.has_gyro && slot.has_accel);
        assert_eq!(slot.motion.timestamp, 12345);
        assert!((slot.motion.gyro[0] - std::f32::consts::PI).abs() < 1e-5);
        assert!((slot.motion.gyro[1] - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!((slot.motion.accel[1] - 9.80665).abs() < 1e-5);
        assert!((slot.motion.accel[2] + 9.80665).abs() < 1e-5);
    }

    #[test]
    fn test_sample_fields_applied() {
        let mut table = SlotTable::new(1);
        let mut data = sample(0, SlotState::Connected);
        data.left_stick_x = 0;
        data.right_stick_y = 255;
        data.analog_l2 = 255;
        data.buttons1 = DSU_BUTTON_DPAD_UP;
        data.packet_number = 42;
        data.touches[0] = TouchPoint { active: true, id: 7, x: 960, y: 943 };
        table.apply_data(0, &data, Instant::now());

        let slot = table.slot(0, 0).unwrap();
        assert_eq!(slot.axes, [-32896, 0, 0, -32639, 32640, 0]);
        assert_eq!(slot.hat, HAT_UP);
        assert_eq!(slot.packet_number, 42);
        assert_eq!(slot.battery, BatteryState::High);
        assert_eq!(slot.mac, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert!(slot.has_touchpad);

        let (down, x, y, pressure) = slot.touch(0).unwrap();
        assert!(down);
        assert!((x - 0.5).abs() < f32::EPSILON);
        assert_eq!(y, 1.0);
        assert_eq!(pressure, 1.0);
        assert_eq!(slot.touch(1), Some((false, 0.0, 0.0, 0.0)));
        assert_eq!(slot.touch(2), None);
    }

    #[test]
    fn test_connected_order_and_lookup() {
        let mut table = SlotTable::new(2);
        let now = Instant::now();
        let b = table.apply_data(1, &sample(0, SlotState::Connected), now).unwrap();
        let a = table.apply_data(0, &sample(3, SlotState::Connected), now).unwrap();
        table.mark_connected(&b);
        table.mark_connected(&a);

        let order: Vec<_> = table.connected().map(|s| (s.server_index, s.slot_id)).collect();
        assert_eq!(order, vec![(0, 3), (1, 0)]);

        assert_eq!(table.find_by_instance(b.instance_id).unwrap().server_index, 1);
        assert!(table.find_by_instance(0).is_none());
        assert_eq!(table.present_slots(), vec![(0, 3), (1, 0)]);
    }
}
