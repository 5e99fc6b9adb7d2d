//! # DSU Packet Encoder
//!
//! Builds complete, CRC-stamped DSU frames. Client requests (PortsInfo,
//! Data subscription, Rumble) are what the session sends; the server-side
//! encoders produce inbound traffic for simulators and tests.

use bytes::{BufMut, BytesMut};

use super::crc::crc32;
use super::protocol::*;

/// Encode a complete frame with an explicit sender tag
///
/// Fills the header (magic, version, length, sender id, message type),
/// appends `payload`, then computes the CRC32 over the whole frame with the
/// CRC field zeroed and writes it back.
///
/// # Arguments
///
/// * `magic` - [`DSU_MAGIC_CLIENT`] or [`DSU_MAGIC_SERVER`]
/// * `sender_id` - Client id (or server id for server frames)
/// * `message_type` - Message type
/// * `payload` - Bytes following the message type
///
/// # Returns
///
/// * `Vec<u8>` - Complete frame (20-byte header + payload)
pub fn encode_frame(magic: [u8; 4], sender_id: u32, message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(DSU_HEADER_SIZE + payload.len());
    frame.put_slice(&magic);
    frame.put_u16_le(DSU_PROTOCOL_VERSION);
    // Length covers message type + payload
    frame.put_u16_le((DSU_HEADER_SIZE - DSU_BASE_HEADER_SIZE + payload.len()) as u16);
    frame.put_u32_le(0); // CRC placeholder
    frame.put_u32_le(sender_id);
    frame.put_u32_le(message_type as u32);
    frame.put_slice(payload);

    let crc = crc32(&frame);
    frame[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

    frame.to_vec()
}

/// Encode a client → server frame
pub fn encode_request(client_id: u32, message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    encode_frame(DSU_MAGIC_CLIENT, client_id, message_type, payload)
}

/// Encode a PortsInfo request
///
/// # Arguments
///
/// * `client_id` - Local client id
/// * `slot` - Slot 0-3, or [`DSU_ALL_SLOTS`] to ask about every slot
///
/// # Examples
///
/// ```
/// use dsu_client::protocol::encoder::encode_ports_info_request;
/// use dsu_client::protocol::protocol::DSU_ALL_SLOTS;
///
/// let packet = encode_ports_info_request(7, DSU_ALL_SLOTS);
/// assert_eq!(packet.len(), 20 + 4 + 4);
/// ```
pub fn encode_ports_info_request(client_id: u32, slot: u8) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(4 + DSU_MAX_SLOTS);

    if slot == DSU_ALL_SLOTS {
        payload.put_i32_le(DSU_MAX_SLOTS as i32);
        for s in 0..DSU_MAX_SLOTS as u8 {
            payload.put_u8(s);
        }
    } else {
        payload.put_i32_le(1);
        payload.put_u8(slot);
    }

    encode_request(client_id, MessageType::PortsInfo, &payload)
}

/// Encode a Data subscription request for one slot
pub fn encode_data_request(client_id: u32, slot: u8) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(8);
    payload.put_u8(DSU_REGISTER_BY_SLOT);
    payload.put_u8(slot);
    payload.put_slice(&[0u8; 6]); // MAC unused for slot registration

    encode_request(client_id, MessageType::Data, &payload)
}

/// Encode a Rumble packet
///
/// Motor intensities arrive in the 16-bit host range and are downshifted to
/// the protocol's 8-bit range by keeping the high byte.
pub fn encode_rumble(client_id: u32, slot: u8, low_frequency: u16, high_frequency: u16) -> Vec<u8> {
    let payload = [slot, motor_intensity(low_frequency), motor_intensity(high_frequency)];
    encode_request(client_id, MessageType::Rumble, &payload)
}

/// 16-bit host motor value → 8-bit wire value
pub fn motor_intensity(value: u16) -> u8 {
    (value >> 8) as u8
}

/// Write the 11-byte slot description prefix
fn put_port_info(buf: &mut BytesMut, info: &PortInfo) {
    buf.put_u8(info.slot);
    buf.put_u8(info.slot_state.into());
    buf.put_u8(info.model.into());
    buf.put_u8(info.connection.into());
    buf.put_slice(&info.mac);
    buf.put_u8(info.battery.into());
}

/// Encode a server → client PortsInfo response
pub fn encode_port_info_response(server_id: u32, info: &PortInfo) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(DSU_PORT_INFO_SIZE);
    put_port_info(&mut payload, info);
    payload.put_u8(0); // reserved

    encode_frame(DSU_MAGIC_SERVER, server_id, MessageType::PortsInfo, &payload)
}

/// Encode a server → client Data packet (100 bytes)
pub fn encode_controller_data(server_id: u32, data: &ControllerData) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(DSU_DATA_PACKET_SIZE - DSU_HEADER_SIZE);
    put_port_info(&mut payload, &data.info);
    payload.put_u8(data.active as u8);
    payload.put_u32_le(data.packet_number);

    payload.put_u8(data.buttons1);
    payload.put_u8(data.buttons2);
    payload.put_u8(data.button_ps);
    payload.put_u8(data.button_touch);

    payload.put_u8(data.left_stick_x);
    payload.put_u8(data.left_stick_y);
    payload.put_u8(data.right_stick_x);
    payload.put_u8(data.right_stick_y);

    payload.put_slice(&data.analog_dpad);
    payload.put_slice(&data.analog_face);
    payload.put_u8(data.analog_r1);
    payload.put_u8(data.analog_l1);
    payload.put_u8(data.analog_r2);
    payload.put_u8(data.analog_l2);

    for touch in &data.touches {
        payload.put_u8(touch.active as u8);
        payload.put_u8(touch.id);
        payload.put_u16_le(touch.x);
        payload.put_u16_le(touch.y);
    }

    payload.put_u64_le(data.motion_timestamp);
    for value in data.accel {
        payload.put_f32_le(value);
    }
    for value in data.gyro {
        payload.put_f32_le(value);
    }

    encode_frame(DSU_MAGIC_SERVER, server_id, MessageType::Data, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    #[test]
    fn test_encode_request_header_layout() {
        let packet = encode_request(0xA1B2_C3D4, MessageType::Data, &[1, 2, 3]);

        assert_eq!(&packet[0..4], b"DSUC");
        assert_eq!(u16::from_le_bytes([packet[4], packet[5]]), DSU_PROTOCOL_VERSION);
        assert_eq!(u16::from_le_bytes([packet[6], packet[7]]), 4 + 3);
        assert_eq!(read_u32_le(&packet, 12), 0xA1B2_C3D4);
        assert_eq!(read_u32_le(&packet, 16), 0x10_0002);
        assert_eq!(&packet[20..], &[1, 2, 3]);
    }

    #[test]
    fn test_encode_request_crc_computed_with_field_zeroed() {
        let packet = encode_request(1, MessageType::PortsInfo, &[0xAA; 8]);
        let embedded = read_u32_le(&packet, DSU_CRC_OFFSET);

        let mut zeroed = packet.clone();
        zeroed[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].fill(0);
        assert_eq!(embedded, crc32(&zeroed));
    }

    #[test]
    fn test_encode_ports_info_request_all_slots() {
        let packet = encode_ports_info_request(5, DSU_ALL_SLOTS);
        assert_eq!(read_u32_le(&packet, 16), MessageType::PortsInfo as u32);
        assert_eq!(read_u32_le(&packet, 20), 4);
        assert_eq!(&packet[24..], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_encode_ports_info_request_single_slot() {
        let packet = encode_ports_info_request(5, 2);
        assert_eq!(read_u32_le(&packet, 20), 1);
        assert_eq!(&packet[24..], &[2]);
    }

    #[test]
    fn test_encode_data_request() {
        let packet = encode_data_request(9, 3);
        assert_eq!(packet.len(), DSU_HEADER_SIZE + 8);
        assert_eq!(read_u32_le(&packet, 16), MessageType::Data as u32);
        assert_eq!(packet[20], DSU_REGISTER_BY_SLOT);
        assert_eq!(packet[21], 3);
        assert_eq!(&packet[22..28], &[0u8; 6]);
    }

    #[test]
    fn test_encode_rumble_downshifts_motors() {
        let packet = encode_rumble(9, 1, 0xFFFF, 0x80FF);
        assert_eq!(read_u32_le(&packet, 16), MessageType::Rumble as u32);
        assert_eq!(&packet[20..], &[1, 0xFF, 0x80]);
    }

    #[test]
    fn test_motor_intensity() {
        assert_eq!(motor_intensity(0), 0);
        assert_eq!(motor_intensity(0x00FF), 0);
        assert_eq!(motor_intensity(0x0100), 1);
        assert_eq!(motor_intensity(u16::MAX), 0xFF);
    }

    #[test]
    fn test_encode_controller_data_size() {
        let packet = encode_controller_data(1, &ControllerData::default());
        assert_eq!(packet.len(), DSU_DATA_PACKET_SIZE);
        assert_eq!(&packet[0..4], b"DSUS");
        assert_eq!(u16::from_le_bytes([packet[6], packet[7]]) as usize, DSU_DATA_PACKET_SIZE - DSU_BASE_HEADER_SIZE);
    }

    #[test]
    fn test_encode_port_info_response_layout() {
        let info = PortInfo {
            slot: 1,
            slot_state: SlotState::Connected,
            model: DeviceModel::FullGyro,
            connection: ConnectionType::Bluetooth,
            mac: [1, 2, 3, 4, 5, 6],
            battery: BatteryState::Charging,
        };
        let packet = encode_port_info_response(1, &info);
        assert_eq!(packet.len(), DSU_HEADER_SIZE + DSU_PORT_INFO_SIZE);
        assert_eq!(&packet[20..24], &[1, 2, 2, 2]);
        assert_eq!(&packet[24..30], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(packet[30], 0xEE);
    }
}
