//! # DSU Packet Decoder
//!
//! Validates inbound server frames (size, magic, declared length, CRC32) and
//! decodes PortsInfo, VersionInfo and Data payloads.

use bytes::Buf;

use super::crc::Crc32;
use super::protocol::*;
use crate::error::{DsuError, Result};

/// A validated inbound frame
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: Header,

    /// Bytes after the message type, bounded by the declared length
    pub payload: &'a [u8],
}

/// Decode and validate a server frame header
///
/// # Arguments
///
/// * `packet` - Received datagram bytes
///
/// # Returns
///
/// * `Result<Header>` - Decoded header, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - Datagram is shorter than a header
/// - Magic is not the server tag
/// - Declared length is shorter than a message type or runs past the datagram
/// - CRC check fails
pub fn decode_header(packet: &[u8]) -> Result<Header> {
    if packet.len() < DSU_HEADER_SIZE {
        return Err(DsuError::PacketTooShort {
            expected: DSU_HEADER_SIZE,
            actual: packet.len(),
        });
    }

    let mut buf = packet;
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);

    if magic != DSU_MAGIC_SERVER {
        return Err(DsuError::InvalidMagic(magic));
    }

    let header = Header {
        magic,
        version: buf.get_u16_le(),
        length: buf.get_u16_le(),
        crc32: buf.get_u32_le(),
        sender_id: buf.get_u32_le(),
        message_type: buf.get_u32_le(),
    };

    let declared = header.frame_len();
    if declared < DSU_HEADER_SIZE {
        return Err(DsuError::PacketTooShort {
            expected: DSU_HEADER_SIZE,
            actual: declared,
        });
    }
    if declared > packet.len() {
        return Err(DsuError::Truncated {
            declared,
            available: packet.len(),
        });
    }

    // CRC covers the declared frame with the CRC field read as zero
    let calculated = Crc32::new()
        .update(&packet[..DSU_CRC_OFFSET])
        .update(&[0u8; 4])
        .update(&packet[DSU_CRC_OFFSET + 4..declared])
        .finalize();

    if calculated != header.crc32 {
        return Err(DsuError::CrcMismatch {
            expected: calculated,
            actual: header.crc32,
        });
    }

    Ok(header)
}

/// Decode a server frame into its header and bounded payload
pub fn decode_frame(packet: &[u8]) -> Result<Frame<'_>> {
    let header = decode_header(packet)?;
    Ok(Frame {
        header,
        payload: &packet[DSU_HEADER_SIZE..header.frame_len()],
    })
}

/// Decode a VersionInfo payload into the server's maximum protocol version
pub fn decode_version_info(payload: &[u8]) -> Result<u16> {
    if payload.len() < 2 {
        return Err(DsuError::PacketTooShort {
            expected: 2,
            actual: payload.len(),
        });
    }

    let mut buf = payload;
    Ok(buf.get_u16_le())
}

/// Decode a slot description
///
/// Only slot id and slot state are required; model, connection, MAC and
/// battery are filled in when present.
pub fn decode_port_info(payload: &[u8]) -> Result<PortInfo> {
    if payload.len() < DSU_PORT_INFO_MIN_SIZE {
        return Err(DsuError::PacketTooShort {
            expected: DSU_PORT_INFO_MIN_SIZE,
            actual: payload.len(),
        });
    }

    let mut buf = payload;
    let mut info = PortInfo {
        slot: buf.get_u8(),
        slot_state: SlotState::from(buf.get_u8()),
        model: DeviceModel::from(buf.get_u8()),
        connection: ConnectionType::from(buf.get_u8()),
        ..PortInfo::default()
    };

    if buf.remaining() >= 7 {
        buf.copy_to_slice(&mut info.mac);
        info.battery = BatteryState::from(buf.get_u8());
    }

    Ok(info)
}

/// Decode a Data payload (everything after the 20-byte header)
pub fn decode_controller_data(payload: &[u8]) -> Result<ControllerData> {
    let expected = DSU_DATA_PACKET_SIZE - DSU_HEADER_SIZE;
    if payload.len() < expected {
        return Err(DsuError::PacketTooShort {
            expected,
            actual: payload.len(),
        });
    }

    let info = decode_port_info(&payload[..DSU_PORT_INFO_SIZE - 1])?;
    let mut buf = &payload[DSU_PORT_INFO_SIZE - 1..];

    let mut data = ControllerData {
        info,
        active: buf.get_u8() != 0,
        packet_number: buf.get_u32_le(),
        buttons1: buf.get_u8(),
        buttons2: buf.get_u8(),
        button_ps: buf.get_u8(),
        button_touch: buf.get_u8(),
        left_stick_x: buf.get_u8(),
        left_stick_y: buf.get_u8(),
        right_stick_x: buf.get_u8(),
        right_stick_y: buf.get_u8(),
        ..ControllerData::default()
    };

    buf.copy_to_slice(&mut data.analog_dpad);
    buf.copy_to_slice(&mut data.analog_face);
    data.analog_r1 = buf.get_u8();
    data.analog_l1 = buf.get_u8();
    data.analog_r2 = buf.get_u8();
    data.analog_l2 = buf.get_u8();

    for touch in data.touches.iter_mut() {
        touch.active = buf.get_u8() != 0;
        touch.id = buf.get_u8();
        touch.x = buf.get_u16_le();
        touch.y = buf.get_u16_le();
    }

    data.motion_timestamp = buf.get_u64_le();
    for value in data.accel.iter_mut() {
        *value = buf.get_f32_le();
    }
    for value in data.gyro.iter_mut() {
        *value = buf.get_f32_le();
    }

    Ok(data)
}
