//! # DSU Session
//!
//! Owns every server connection, the single lock over all slot data and the
//! periodic detect cycle.
//!
//! ## Detect Cycle
//!
//! Called from the host's polling thread, never concurrently with itself:
//!
//! 1. **Re-subscribe** - after the resubscribe interval, send PortsInfo(all)
//!    to every server and a Data request for every present slot
//! 2. **Promote** - drain pending promotions queued by the receive workers,
//!    call the host's `add_device` with no lock held, then mark accepted
//!    slots connected
//! 3. **Sweep** - clear slots silent for longer than the timeout and tell
//!    the host about the ones it had accepted
//!
//! Each phase takes the slot lock on its own and releases it before any
//! host callback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::connection::ServerConnection;
use super::host::HostInput;
use super::slot::{PendingAdd, Slot, SlotTable};
use crate::error::{DsuError, Result};
use crate::protocol::protocol::{DSU_ALL_SLOTS, DSU_MAX_CONTROLLERS, DSU_MAX_SERVERS, DSU_SERVER_PORT_DEFAULT};
use crate::transport::{DatagramSocket, UdpTransport, DEFAULT_RECV_WAIT};

/// Capacity of the pending promotion queue
pub const PENDING_QUEUE_CAPACITY: usize = DSU_MAX_CONTROLLERS;

/// Default interval between re-subscription bursts
pub const DEFAULT_RESUBSCRIBE_INTERVAL: Duration = Duration::from_millis(500);

/// Default silence after which a slot is removed
pub const DEFAULT_SLOT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the receive workers and the detect path
pub struct SharedState {
    slots: Mutex<SlotTable>,
    pending_tx: mpsc::Sender<PendingAdd>,
    pending_rx: Mutex<mpsc::Receiver<PendingAdd>>,
    /// A promotion could not be queued; the next drain falls back to a scan
    pending_overflow: AtomicBool,
}

impl SharedState {
    pub fn new(server_count: usize) -> Self {
        let (pending_tx, pending_rx) = mpsc::channel(PENDING_QUEUE_CAPACITY);
        Self {
            slots: Mutex::new(SlotTable::new(server_count)),
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
            pending_overflow: AtomicBool::new(false),
        }
    }

    /// Take the slot lock
    pub fn lock_slots(&self) -> MutexGuard<'_, SlotTable> {
        lock(&self.slots)
    }

    /// Queue a promotion for the detect path
    pub fn queue_pending(&self, pending: PendingAdd) {
        if let Err(e) = self.pending_tx.try_send(pending) {
            debug!("Pending queue unavailable ({}), falling back to slot scan", e);
            self.pending_overflow.store(true, Ordering::Release);
        }
    }

    /// Collect queued promotions, deduplicated by instance id
    ///
    /// Entries are not checked against the slot table; see
    /// [`SlotTable::is_pending`].
    pub fn drain_pending(&self) -> Vec<PendingAdd> {
        let mut drained = Vec::new();
        {
            let mut rx = lock(&self.pending_rx);
            while let Ok(pending) = rx.try_recv() {
                drained.push(pending);
            }
        }

        if self.pending_overflow.swap(false, Ordering::AcqRel) {
            drained.extend(self.lock_slots().pending());
        }

        drained.sort_by_key(|p| (p.instance_id, p.server_index, p.slot_id));
        drained.dedup();
        drained
    }
}

/// Parameters for starting a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Resolved server addresses, at most four
    pub servers: Vec<SocketAddr>,
    /// Base local port; server `i` binds `client_port + i`. 0 = ephemeral
    pub client_port: u16,
    pub resubscribe_interval: Duration,
    pub timeout: Duration,
    pub recv_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            servers: vec![SocketAddr::from(([127, 0, 0, 1], DSU_SERVER_PORT_DEFAULT))],
            client_port: crate::protocol::protocol::DSU_CLIENT_PORT_DEFAULT,
            resubscribe_interval: DEFAULT_RESUBSCRIBE_INTERVAL,
            timeout: DEFAULT_SLOT_TIMEOUT,
            recv_wait: DEFAULT_RECV_WAIT,
        }
    }
}

impl SessionConfig {
    /// Local port hint for server `index`
    pub fn local_port_for(&self, index: usize) -> u16 {
        if self.client_port == 0 {
            return 0;
        }
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.client_port.checked_add(offset))
            .unwrap_or(0)
    }
}

/// A running DSU client session
pub struct Session {
    shared: Arc<SharedState>,
    connections: Vec<ServerConnection>,
    last_request: Mutex<Option<Instant>>,
    resubscribe_interval: Duration,
    timeout: Duration,
}

impl Session {
    /// Start a session with one UDP connection per configured server
    ///
    /// A server whose socket cannot be opened is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `DsuError::NoServers` if the list is empty or no connection
    /// could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dsu_client::client::session::{Session, SessionConfig};
    ///
    /// let session = Session::start(SessionConfig::default())?;
    /// println!("{} connection(s)", session.connection_count());
    /// session.shutdown();
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn start(config: SessionConfig) -> Result<Self> {
        let recv_wait = config.recv_wait;
        Self::start_with(config.clone(), |index, server| {
            let socket = UdpTransport::bind(server, config.local_port_for(index), recv_wait)?;
            Ok(Arc::new(socket) as Arc<dyn DatagramSocket>)
        })
    }

    /// Start a session over caller-provided sockets
    ///
    /// `open_socket` is called once per server with its index and address.
    pub fn start_with<F>(config: SessionConfig, mut open_socket: F) -> Result<Self>
    where
        F: FnMut(usize, SocketAddr) -> Result<Arc<dyn DatagramSocket>>,
    {
        if config.servers.is_empty() {
            return Err(DsuError::NoServers);
        }
        if config.servers.len() > DSU_MAX_SERVERS {
            warn!(
                "{} DSU servers configured, only the first {} are used",
                config.servers.len(),
                DSU_MAX_SERVERS
            );
        }
        let servers = &config.servers[..config.servers.len().min(DSU_MAX_SERVERS)];

        let shared = Arc::new(SharedState::new(servers.len()));
        let mut connections = Vec::with_capacity(servers.len());

        for (index, &server) in servers.iter().enumerate() {
            let connection = open_socket(index, server)
                .and_then(|socket| ServerConnection::with_socket(index, server, socket, shared.clone()));
            match connection {
                Ok(connection) => connections.push(connection),
                Err(e) => warn!("Failed to open DSU connection to {}: {}", server, e),
            }
        }

        if connections.is_empty() {
            return Err(DsuError::NoServers);
        }

        let now = Instant::now();
        for connection in &connections {
            connection.core().request_ports_info(DSU_ALL_SLOTS);
        }

        info!("DSU session started with {} connection(s)", connections.len());

        Ok(Self {
            shared,
            connections,
            last_request: Mutex::new(Some(now)),
            resubscribe_interval: config.resubscribe_interval,
            timeout: config.timeout,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    fn connection(&self, server_index: usize) -> Option<&ServerConnection> {
        self.connections.iter().find(|c| c.core().index() == server_index)
    }

    /// Run one detect cycle now
    pub fn detect(&self, host: &dyn HostInput) {
        self.detect_at(host, Instant::now());
    }

    /// Run one detect cycle at `now`: re-subscribe, promote, sweep
    pub fn detect_at(&self, host: &dyn HostInput, now: Instant) {
        self.resubscribe(now);
        self.promote(host);
        self.sweep(host, now);
    }

    fn resubscribe(&self, now: Instant) {
        {
            let mut last = lock(&self.last_request);
            let due = match *last {
                Some(at) => now.saturating_duration_since(at) >= self.resubscribe_interval,
                None => true,
            };
            if !due {
                return;
            }
            *last = Some(now);
        }

        let present = self.shared.lock_slots().present_slots();
        trace!("Re-subscribing ({} present slot(s))", present.len());

        for connection in &self.connections {
            connection.core().request_ports_info(DSU_ALL_SLOTS);
        }
        for (server_index, slot_id) in present {
            if let Some(connection) = self.connection(server_index) {
                connection.core().request_data(slot_id);
            }
        }
    }

    fn promote(&self, host: &dyn HostInput) {
        let drained = self.shared.drain_pending();
        if drained.is_empty() {
            return;
        }

        let ready: Vec<PendingAdd> = {
            let table = self.shared.lock_slots();
            drained.into_iter().filter(|p| table.is_pending(p)).collect()
        };

        for pending in ready {
            if !host.add_device(pending.instance_id) {
                debug!("Host deferred instance {}, retrying next cycle", pending.instance_id);
                self.shared.queue_pending(pending);
                continue;
            }

            let marked = self.shared.lock_slots().mark_connected(&pending);
            if marked {
                info!(
                    "Controller {}/{} connected as instance {}",
                    pending.server_index, pending.slot_id, pending.instance_id
                );
            } else {
                // Slot went away while the host was adding it
                debug!("Instance {} vanished during add, removing", pending.instance_id);
                host.remove_device(pending.instance_id);
            }
        }
    }

    fn sweep(&self, host: &dyn HostInput, now: Instant) {
        let expired = self.shared.lock_slots().expire(now, self.timeout);

        for slot in expired.into_iter().filter(|e| e.was_connected) {
            host.remove_device(slot.instance_id);
        }
    }

    /// Number of host-visible controllers
    pub fn device_count(&self) -> usize {
        self.shared.lock_slots().connected().count()
    }

    /// Copy of the connected slot at device `index`
    pub fn device(&self, index: usize) -> Option<Slot> {
        self.shared.lock_slots().connected().nth(index).cloned()
    }

    /// Copy of the slot holding `instance_id`
    pub fn snapshot(&self, instance_id: u32) -> Option<Slot> {
        self.shared.lock_slots().find_by_instance(instance_id).cloned()
    }

    /// Mutate the connected slot at device `index` under the lock
    pub(crate) fn with_device_mut<R>(&self, index: usize, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let mut table = self.shared.lock_slots();
        let (server_index, slot_id) = {
            let slot = table.connected().nth(index)?;
            (slot.server_index, slot.slot_id)
        };
        table.slot_mut(server_index, slot_id).map(f)
    }

    /// Mutate the slot holding `instance_id` under the lock
    pub(crate) fn with_instance_mut<R>(&self, instance_id: u32, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        self.shared.lock_slots().find_by_instance_mut(instance_id).map(f)
    }

    /// Send a rumble packet to the controller holding `instance_id`
    ///
    /// # Errors
    ///
    /// Returns `DsuError::NotAvailable` if the controller is not connected
    /// or its connection is gone
    pub fn rumble(&self, instance_id: u32, low_frequency: u16, high_frequency: u16) -> Result<()> {
        let target = self
            .shared
            .lock_slots()
            .find_by_instance(instance_id)
            .filter(|slot| slot.connected)
            .map(|slot| (slot.server_index, slot.slot_id));

        let (server_index, slot_id) =
            target.ok_or_else(|| DsuError::NotAvailable(format!("instance {} is not connected", instance_id)))?;

        let connection = self
            .connection(server_index)
            .ok_or_else(|| DsuError::NotAvailable(format!("server {} has no connection", server_index)))?;

        connection.core().send_rumble(slot_id, low_frequency, high_frequency)
    }

    /// Stop every worker: cancel all, close all sockets, then join all
    pub fn shutdown(&self) {
        for connection in &self.connections {
            connection.cancel();
        }
        for connection in &self.connections {
            connection.close_socket();
        }
        for connection in &self.connections {
            connection.join();
        }
        debug!("DSU session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
