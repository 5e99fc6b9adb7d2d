//! # Server Connection
//!
//! One UDP socket, one background receive worker and the outbound requests
//! for one configured DSU server.
//!
//! ## Receive Loop
//!
//! The worker blocks in `recv` for at most the socket's wait interval, which
//! doubles as the cancellation check interval. Timeouts and transient errors
//! loop; a fatal error (closed socket) ends the worker. Malformed datagrams
//! are dropped at trace level since the server keeps resending state.
//!
//! ## Shutdown
//!
//! Cancel the token, close the socket so an in-progress wait returns, then
//! join the worker.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::session::SharedState;
use crate::error::{DsuError, Result};
use crate::protocol::decoder::{decode_controller_data, decode_frame, decode_port_info, decode_version_info};
use crate::protocol::encoder::{encode_data_request, encode_ports_info_request, encode_rumble};
use crate::protocol::protocol::{MessageType, SlotState, DSU_MAX_PACKET_SIZE, DSU_MAX_SLOTS};
use crate::transport::{classify_recv_error, DatagramSocket, RecvOutcome, UdpTransport};

/// Per-connection protocol logic shared between the worker and callers
pub struct ConnectionCore {
    /// Server index (position in the configured server list)
    index: usize,
    server: SocketAddr,
    client_id: u32,
    socket: Arc<dyn DatagramSocket>,
    shared: Arc<SharedState>,
}

impl ConnectionCore {
    pub fn new(
        index: usize,
        server: SocketAddr,
        client_id: u32,
        socket: Arc<dyn DatagramSocket>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            index,
            server,
            client_id,
            socket,
            shared,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Best-effort send; failures are logged and dropped
    fn send(&self, packet: &[u8], what: &str) {
        if let Err(e) = self.socket.send_to(packet, self.server) {
            warn!("Failed to send {} to {}: {}", what, self.server, e);
        }
    }

    /// Ask which controllers occupy `slot` (0-3, or `DSU_ALL_SLOTS`)
    pub fn request_ports_info(&self, slot: u8) {
        trace!("PortsInfo request for slot {:#04x} to {}", slot, self.server);
        self.send(&encode_ports_info_request(self.client_id, slot), "PortsInfo request");
    }

    /// Subscribe to Data packets for one slot
    pub fn request_data(&self, slot: u8) {
        trace!("Data request for slot {} to {}", slot, self.server);
        self.send(&encode_data_request(self.client_id, slot), "Data request");
    }

    /// Send a rumble packet for a connected slot
    ///
    /// # Arguments
    ///
    /// * `slot` - Slot index on this server
    /// * `low_frequency` - Left (low frequency) motor, 16-bit host range
    /// * `high_frequency` - Right (high frequency) motor, 16-bit host range
    ///
    /// # Errors
    ///
    /// Returns `DsuError::NotAvailable` if the slot is not connected
    pub fn send_rumble(&self, slot: u8, low_frequency: u16, high_frequency: u16) -> Result<()> {
        let connected = self
            .shared
            .lock_slots()
            .slot(self.index, slot)
            .is_some_and(|s| s.connected);

        if !connected {
            return Err(DsuError::NotAvailable(format!(
                "slot {} on server {} is not connected",
                slot, self.index
            )));
        }

        self.send(&encode_rumble(self.client_id, slot, low_frequency, high_frequency), "Rumble");
        Ok(())
    }

    /// Process one inbound datagram received now
    pub fn handle_datagram(&self, datagram: &[u8]) {
        self.handle_datagram_at(datagram, Instant::now());
    }

    /// Process one inbound datagram received at `now`
    pub fn handle_datagram_at(&self, datagram: &[u8], now: Instant) {
        let frame = match decode_frame(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("Dropping datagram from {}: {}", self.server, e);
                return;
            }
        };

        match MessageType::from_u32(frame.header.message_type) {
            Some(MessageType::PortsInfo) => match decode_port_info(frame.payload) {
                Ok(info) if info.slot_state == SlotState::Connected && (info.slot as usize) < DSU_MAX_SLOTS => {
                    debug!("Server {} reports slot {} connected", self.index, info.slot);
                    self.request_data(info.slot);
                }
                Ok(_) => {}
                Err(e) => trace!("Dropping PortsInfo from {}: {}", self.server, e),
            },
            Some(MessageType::Data) => match decode_controller_data(frame.payload) {
                Ok(data) => {
                    let detected = self.shared.lock_slots().apply_data(self.index, &data, now);
                    if let Some(pending) = detected {
                        self.shared.queue_pending(pending);
                        self.request_data(pending.slot_id);
                    }
                }
                Err(e) => trace!("Dropping Data from {}: {}", self.server, e),
            },
            Some(MessageType::VersionInfo) => match decode_version_info(frame.payload) {
                Ok(version) => debug!("Server {} supports protocol version {}", self.server, version),
                Err(e) => trace!("Dropping VersionInfo from {}: {}", self.server, e),
            },
            _ => trace!("Ignoring message type {:#x} from {}", frame.header.message_type, self.server),
        }
    }

    /// Receive loop; returns when cancelled or the socket is closed
    pub fn run(&self, cancel: &CancellationToken) {
        let mut buf = [0u8; DSU_MAX_PACKET_SIZE];
        debug!("Receive worker for {} started", self.server);

        while !cancel.is_cancelled() {
            match self.socket.recv(&mut buf) {
                Ok(received) => self.handle_datagram(&buf[..received]),
                Err(e) => match classify_recv_error(&e) {
                    RecvOutcome::Timeout | RecvOutcome::Transient => continue,
                    RecvOutcome::Fatal => {
                        if !cancel.is_cancelled() {
                            warn!("Receive from {} failed: {}", self.server, e);
                        }
                        break;
                    }
                },
            }
        }

        debug!("Receive worker for {} exiting", self.server);
    }
}

/// A running connection: core plus its receive worker
pub struct ServerConnection {
    core: Arc<ConnectionCore>,
    socket: Arc<dyn DatagramSocket>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ServerConnection {
    /// Open a UDP connection to `server` and start its receive worker
    ///
    /// # Arguments
    ///
    /// * `index` - Server index
    /// * `server` - Remote DSU server address
    /// * `local_port_hint` - Preferred local port (0 for ephemeral)
    /// * `recv_wait` - Upper bound on one receive wait
    /// * `shared` - Session state the worker writes into
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be created or the worker thread
    /// cannot be spawned
    pub fn open(
        index: usize,
        server: SocketAddr,
        local_port_hint: u16,
        recv_wait: Duration,
        shared: Arc<SharedState>,
    ) -> Result<Self> {
        let socket = UdpTransport::bind(server, local_port_hint, recv_wait)?;
        Self::with_socket(index, server, Arc::new(socket), shared)
    }

    /// Start a connection over an already created socket
    pub fn with_socket(
        index: usize,
        server: SocketAddr,
        socket: Arc<dyn DatagramSocket>,
        shared: Arc<SharedState>,
    ) -> Result<Self> {
        let client_id = rand::random::<u32>();
        let core = Arc::new(ConnectionCore::new(index, server, client_id, socket.clone(), shared));
        let cancel = CancellationToken::new();

        let worker = {
            let core = core.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(format!("dsu-recv-{}", index))
                .spawn(move || core.run(&cancel))?
        };

        info!("DSU connection {} to {} opened (client id {:#010x})", index, server, client_id);

        Ok(Self {
            core,
            socket,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn core(&self) -> &ConnectionCore {
        &self.core
    }

    /// Signal the worker to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Close the socket, unblocking any in-progress wait
    pub fn close_socket(&self) {
        self.socket.close();
    }

    /// Wait for the worker to exit
    pub fn join(&self) {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Receive worker for {} panicked", self.core.server);
            } else {
                debug!("DSU connection {} closed", self.core.index);
            }
        }
    }

    /// Cancel, close the socket, then join; idempotent
    pub fn close(&self) {
        self.cancel();
        self.close_socket();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::session::SharedState;
    use crate::protocol::decoder::decode_header;
    use crate::protocol::encoder::{encode_controller_data, encode_port_info_response, encode_request};
    use crate::protocol::protocol::*;
    use crate::transport::socket_trait::mocks::MockSocket;

    fn server_addr() -> SocketAddr {
        "127.0.0.1:26760".parse().unwrap()
    }

    fn core_with_mock() -> (ConnectionCore, Arc<MockSocket>, Arc<SharedState>) {
        let socket = Arc::new(MockSocket::new());
        let shared = Arc::new(SharedState::new(1));
        let core = ConnectionCore::new(0, server_addr(), 0x1234, socket.clone(), shared.clone());
        (core, socket, shared)
    }

    fn port_info(slot: u8, state: SlotState) -> PortInfo {
        PortInfo {
            slot,
            slot_state: state,
            model: DeviceModel::FullGyro,
            connection: ConnectionType::Usb,
            mac: [1, 2, 3, 4, 5, 6],
            battery: BatteryState::Full,
        }
    }

    fn message_types(packets: &[Vec<u8>]) -> Vec<u32> {
        packets.iter().map(|p| decode_client_header(p).message_type).collect()
    }

    /// Client frames carry `DSUC`, which `decode_header` rejects; swap the tag
    fn decode_client_header(packet: &[u8]) -> Header {
        let mut patched = packet.to_vec();
        patched[0..4].copy_from_slice(&DSU_MAGIC_SERVER);
        let crc = crate::protocol::crc::crc32(&{
            let mut zeroed = patched.clone();
            zeroed[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].fill(0);
            zeroed
        });
        patched[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        decode_header(&patched).unwrap()
    }

    #[test]
    fn test_ports_info_connected_triggers_data_request() {
        let (core, socket, _) = core_with_mock();

        core.handle_datagram(&encode_port_info_response(9, &port_info(0, SlotState::Connected)));

        let sent = socket.take_sent();
        assert_eq!(message_types(&sent), vec![MessageType::Data as u32]);
        assert_eq!(sent[0][20], DSU_REGISTER_BY_SLOT);
        assert_eq!(sent[0][21], 0);
        assert_eq!(decode_client_header(&sent[0]).sender_id, 0x1234);
    }

    #[test]
    fn test_ports_info_not_connected_ignored() {
        let (core, socket, _) = core_with_mock();

        core.handle_datagram(&encode_port_info_response(9, &port_info(1, SlotState::Reserved)));
        core.handle_datagram(&encode_port_info_response(9, &port_info(1, SlotState::Disconnected)));
        core.handle_datagram(&encode_port_info_response(9, &port_info(7, SlotState::Connected)));

        assert!(socket.sent_packets().is_empty());
    }

    #[test]
    fn test_first_data_packet_queues_and_subscribes() {
        let (core, socket, shared) = core_with_mock();
        let data = ControllerData {
            info: port_info(2, SlotState::Connected),
            ..Default::default()
        };

        core.handle_datagram(&encode_controller_data(9, &data));
        core.handle_datagram(&encode_controller_data(9, &data));

        // Subscribed once, on first detection
        assert_eq!(message_types(&socket.take_sent()), vec![MessageType::Data as u32]);

        let drained = shared.drain_pending();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].slot_id, 2);
        assert!(shared.lock_slots().slot(0, 2).unwrap().detected);
    }

    #[test]
    fn test_malformed_datagrams_dropped() {
        let (core, socket, shared) = core_with_mock();
        let data = ControllerData {
            info: port_info(0, SlotState::Connected),
            ..Default::default()
        };
        let mut packet = encode_controller_data(9, &data);

        // Truncated, corrupted, short, wrong magic, unknown type
        core.handle_datagram(&packet[..packet.len() - 1]);
        packet[40] ^= 0x01;
        core.handle_datagram(&packet);
        core.handle_datagram(&[0u8; 8]);
        core.handle_datagram(&encode_request(1, MessageType::Data, &[0u8; 80]));
        core.handle_datagram(&crate::protocol::encoder::encode_frame(
            DSU_MAGIC_SERVER,
            9,
            MessageType::RumbleInfo,
            &[],
        ));

        assert!(socket.sent_packets().is_empty());
        assert!(shared.drain_pending().is_empty());
        assert!(shared.lock_slots().iter().all(|slot| !slot.is_present()));
    }

    #[test]
    fn test_rumble_requires_connected_slot() {
        let (core, socket, shared) = core_with_mock();

        assert!(matches!(core.send_rumble(0, 0xFFFF, 0xFFFF), Err(DsuError::NotAvailable(_))));
        assert!(socket.sent_packets().is_empty());

        let data = ControllerData {
            info: port_info(0, SlotState::Connected),
            ..Default::default()
        };
        core.handle_datagram(&encode_controller_data(9, &data));
        socket.take_sent();

        // Detected is not enough
        assert!(core.send_rumble(0, 0xFFFF, 0xFFFF).is_err());

        let pending = shared.drain_pending();
        assert!(shared.lock_slots().mark_connected(&pending[0]));
        core.send_rumble(0, 0x1234, 0xFF00).unwrap();

        let sent = socket.take_sent();
        assert_eq!(message_types(&sent), vec![MessageType::Rumble as u32]);
        assert_eq!(&sent[0][20..], &[0, 0x12, 0xFF]);
    }

    #[test]
    fn test_send_failure_is_not_fatal() {
        let (core, socket, _) = core_with_mock();
        socket.set_send_error(std::io::ErrorKind::PermissionDenied);

        core.request_ports_info(DSU_ALL_SLOTS);
        core.request_data(1);
        assert!(socket.sent_packets().is_empty());
    }

    #[test]
    fn test_worker_processes_and_stops_on_close() {
        let socket = Arc::new(MockSocket::new());
        let shared = Arc::new(SharedState::new(1));
        let connection = ServerConnection::with_socket(0, server_addr(), socket.clone(), shared.clone()).unwrap();

        socket.set_recv_error(std::io::ErrorKind::Interrupted);
        socket.push_inbound(encode_port_info_response(9, &port_info(3, SlotState::Connected)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while socket.sent_packets().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(message_types(&socket.sent_packets()), vec![MessageType::Data as u32]);
        assert!(connection.is_running());

        connection.close();
        assert!(socket.is_closed());
        assert!(!connection.is_running());

        // Second close is a no-op
        connection.close();
    }

    #[test]
    fn test_worker_exits_on_fatal_error() {
        let socket = Arc::new(MockSocket::new());
        let shared = Arc::new(SharedState::new(1));
        let connection = ServerConnection::with_socket(0, server_addr(), socket.clone(), shared).unwrap();

        socket.set_recv_error(std::io::ErrorKind::InvalidInput);

        let deadline = Instant::now() + Duration::from_secs(2);
        while connection.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!connection.is_running());
    }
}
