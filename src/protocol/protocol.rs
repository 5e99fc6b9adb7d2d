//! # DSU Protocol Constants and Types
//!
//! Core protocol definitions for DSU (DualShock UDP) communication.

/// Magic tag on client → server packets
pub const DSU_MAGIC_CLIENT: [u8; 4] = *b"DSUC";

/// Magic tag on server → client packets
pub const DSU_MAGIC_SERVER: [u8; 4] = *b"DSUS";

/// Protocol version carried in every header
pub const DSU_PROTOCOL_VERSION: u16 = 1001;

/// Default server UDP port
pub const DSU_SERVER_PORT_DEFAULT: u16 = 26760;

/// Default local (client) UDP port
pub const DSU_CLIENT_PORT_DEFAULT: u16 = 26761;

/// Default server address
pub const DSU_SERVER_ADDRESS_DEFAULT: &str = "127.0.0.1";

/// Controller slots exposed by one server
pub const DSU_MAX_SLOTS: usize = 4;

/// Servers one session may talk to
pub const DSU_MAX_SERVERS: usize = 4;

/// Upper bound on controllers across all servers
pub const DSU_MAX_CONTROLLERS: usize = DSU_MAX_SLOTS * DSU_MAX_SERVERS;

/// Slot sentinel meaning "every slot"
pub const DSU_ALL_SLOTS: u8 = 0xFF;

/// Size of magic + version + length + crc + id
///
/// The header `length` field counts the bytes that follow this prefix.
pub const DSU_BASE_HEADER_SIZE: usize = 16;

/// Full header size including the message type
pub const DSU_HEADER_SIZE: usize = 20;

/// Byte offset of the CRC32 field inside the header
pub const DSU_CRC_OFFSET: usize = 8;

/// Port info block size (response payload and Data packet prefix)
pub const DSU_PORT_INFO_SIZE: usize = 12;

/// Minimum port info bytes needed to read slot id and slot state
pub const DSU_PORT_INFO_MIN_SIZE: usize = 4;

/// Complete Data packet size (header + payload)
pub const DSU_DATA_PACKET_SIZE: usize = 100;

/// Receive buffer size
pub const DSU_MAX_PACKET_SIZE: usize = 1024;

/// Data request registration flag: subscribe by slot
pub const DSU_REGISTER_BY_SLOT: u8 = 0x01;

/// Buttons byte 1 bit masks
pub const DSU_BUTTON_SHARE: u8 = 0x01;
pub const DSU_BUTTON_L3: u8 = 0x02;
pub const DSU_BUTTON_R3: u8 = 0x04;
pub const DSU_BUTTON_OPTIONS: u8 = 0x08;
pub const DSU_BUTTON_DPAD_UP: u8 = 0x10;
pub const DSU_BUTTON_DPAD_RIGHT: u8 = 0x20;
pub const DSU_BUTTON_DPAD_DOWN: u8 = 0x40;
pub const DSU_BUTTON_DPAD_LEFT: u8 = 0x80;

/// Buttons byte 2 bit masks
pub const DSU_BUTTON_L2: u8 = 0x01;
pub const DSU_BUTTON_R2: u8 = 0x02;
pub const DSU_BUTTON_L1: u8 = 0x04;
pub const DSU_BUTTON_R1: u8 = 0x08;
pub const DSU_BUTTON_SQUARE: u8 = 0x10;
pub const DSU_BUTTON_CIRCLE: u8 = 0x20;
pub const DSU_BUTTON_CROSS: u8 = 0x40;
pub const DSU_BUTTON_TRIANGLE: u8 = 0x80;

/// Message type identifiers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    VersionInfo = 0x10_0000,
    PortsInfo = 0x10_0001,
    Data = 0x10_0002,
    RumbleInfo = 0x11_0001,
    Rumble = 0x11_0002,
}

impl MessageType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x10_0000 => Some(MessageType::VersionInfo),
            0x10_0001 => Some(MessageType::PortsInfo),
            0x10_0002 => Some(MessageType::Data),
            0x11_0001 => Some(MessageType::RumbleInfo),
            0x11_0002 => Some(MessageType::Rumble),
            _ => None,
        }
    }
}

/// Slot occupancy as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Disconnected,
    Reserved,
    Connected,
}

impl From<u8> for SlotState {
    fn from(v: u8) -> Self {
        match v {
            1 => SlotState::Reserved,
            2 => SlotState::Connected,
            _ => SlotState::Disconnected,
        }
    }
}

impl From<SlotState> for u8 {
    fn from(state: SlotState) -> Self {
        match state {
            SlotState::Disconnected => 0,
            SlotState::Reserved => 1,
            SlotState::Connected => 2,
        }
    }
}

/// Motion capability of the remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceModel {
    #[default]
    NotApplicable,
    PartialGyro,
    FullGyro,
    NoGyro,
}

impl From<u8> for DeviceModel {
    fn from(v: u8) -> Self {
        match v {
            1 => DeviceModel::PartialGyro,
            2 => DeviceModel::FullGyro,
            3 => DeviceModel::NoGyro,
            _ => DeviceModel::NotApplicable,
        }
    }
}

impl From<DeviceModel> for u8 {
    fn from(model: DeviceModel) -> Self {
        match model {
            DeviceModel::NotApplicable => 0,
            DeviceModel::PartialGyro => 1,
            DeviceModel::FullGyro => 2,
            DeviceModel::NoGyro => 3,
        }
    }
}

/// Link between the remote device and its server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    NotApplicable,
    Usb,
    Bluetooth,
}

impl From<u8> for ConnectionType {
    fn from(v: u8) -> Self {
        match v {
            1 => ConnectionType::Usb,
            2 => ConnectionType::Bluetooth,
            _ => ConnectionType::NotApplicable,
        }
    }
}

impl From<ConnectionType> for u8 {
    fn from(connection: ConnectionType) -> Self {
        match connection {
            ConnectionType::NotApplicable => 0,
            ConnectionType::Usb => 1,
            ConnectionType::Bluetooth => 2,
        }
    }
}

/// Battery state as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryState {
    #[default]
    NotApplicable,
    Dying,
    Low,
    Medium,
    High,
    Full,
    Charging,
    Charged,
}

impl From<u8> for BatteryState {
    fn from(v: u8) -> Self {
        match v {
            0x01 => BatteryState::Dying,
            0x02 => BatteryState::Low,
            0x03 => BatteryState::Medium,
            0x04 => BatteryState::High,
            0x05 => BatteryState::Full,
            0xEE => BatteryState::Charging,
            0xEF => BatteryState::Charged,
            _ => BatteryState::NotApplicable,
        }
    }
}

impl From<BatteryState> for u8 {
    fn from(battery: BatteryState) -> Self {
        match battery {
            BatteryState::NotApplicable => 0x00,
            BatteryState::Dying => 0x01,
            BatteryState::Low => 0x02,
            BatteryState::Medium => 0x03,
            BatteryState::High => 0x04,
            BatteryState::Full => 0x05,
            BatteryState::Charging => 0xEE,
            BatteryState::Charged => 0xEF,
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender tag (`DSUC` or `DSUS`)
    pub magic: [u8; 4],

    /// Protocol version
    pub version: u16,

    /// Bytes following the 16-byte base header
    pub length: u16,

    /// CRC32 as carried on the wire
    pub crc32: u32,

    /// Client or server id of the sender
    pub sender_id: u32,

    /// Raw message type; see [`MessageType::from_u32`]
    pub message_type: u32,
}

impl Header {
    /// Total frame size declared by the header
    pub fn frame_len(&self) -> usize {
        DSU_BASE_HEADER_SIZE + self.length as usize
    }
}

/// Slot description shared by PortsInfo responses and Data packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortInfo {
    pub slot: u8,
    pub slot_state: SlotState,
    pub model: DeviceModel,
    pub connection: ConnectionType,
    pub mac: [u8; 6],
    pub battery: BatteryState,
}

/// One touch point as carried in a Data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchPoint {
    pub active: bool,
    pub id: u8,
    pub x: u16,
    pub y: u16,
}

/// Full controller sample (Data message)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerData {
    pub info: PortInfo,

    /// Server-side "controller is active" flag
    pub active: bool,

    /// Monotonic per-slot packet counter
    pub packet_number: u32,

    pub buttons1: u8,
    pub buttons2: u8,
    pub button_ps: u8,
    pub button_touch: u8,

    pub left_stick_x: u8,
    pub left_stick_y: u8,
    pub right_stick_x: u8,
    pub right_stick_y: u8,

    /// Analog D-pad pressure: left, down, right, up
    pub analog_dpad: [u8; 4],

    /// Analog face button pressure: triangle, circle, cross, square
    pub analog_face: [u8; 4],

    pub analog_r1: u8,
    pub analog_l1: u8,
    pub analog_r2: u8,
    pub analog_l2: u8,

    pub touches: [TouchPoint; 2],

    /// Motion timestamp in microseconds; zero means no motion sample
    pub motion_timestamp: u64,

    /// Acceleration in g: x, y, z
    pub accel: [f32; 3],

    /// Angular rate in deg/s: pitch, yaw, roll
    pub gyro: [f32; 3],
}
