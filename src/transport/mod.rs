//! # UDP Transport Module
//!
//! Handles the datagram socket each server connection talks through.
//!
//! This module handles:
//! - Binding a UDP socket to the configured client port, falling back to an
//!   ephemeral port when the bind fails
//! - Bounded receive waits that double as the cancellation check interval
//! - Closing the socket so a blocked receive loop returns promptly
//! - Classifying receive errors as timeout, transient or fatal

pub mod socket_trait;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
pub use socket_trait::DatagramSocket;

/// Default receive wait (~10ms)
pub const DEFAULT_RECV_WAIT: Duration = Duration::from_millis(10);

/// How a failed receive should be treated by the receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Wait interval elapsed with nothing to read
    Timeout,
    /// Interrupted or a stray ICMP error; keep looping
    Transient,
    /// Socket is closed or unusable; stop the loop
    Fatal,
}

/// Classify a receive error
pub fn classify_recv_error(err: &io::Error) -> RecvOutcome {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RecvOutcome::Timeout,
        // Windows reports ICMP port-unreachable on UDP sockets as a reset
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused => {
            RecvOutcome::Transient
        }
        _ => RecvOutcome::Fatal,
    }
}

/// UDP socket bound for one DSU server connection
pub struct UdpTransport {
    /// Socket handle
    socket: UdpSocket,
    /// Set once `close` has been called
    closed: AtomicBool,
    /// Locally bound port
    local_port: u16,
    /// Loopback address of this socket, target of the close wake-up
    wake_addr: SocketAddr,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_port", &self.local_port)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl UdpTransport {
    /// Create a UDP socket for talking to `server`
    ///
    /// The socket binds the unspecified address of the server's family.
    /// A bind failure on the hinted port is not fatal: the socket falls back
    /// to an ephemeral port. `0` asks for an ephemeral port directly.
    ///
    /// # Arguments
    ///
    /// * `server` - Remote DSU server the socket will send to
    /// * `local_port_hint` - Preferred local port, or 0
    /// * `recv_wait` - Upper bound on one receive wait
    ///
    /// # Errors
    ///
    /// Returns error if no socket can be created at all
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dsu_client::transport::{UdpTransport, DEFAULT_RECV_WAIT};
    ///
    /// let server = "127.0.0.1:26760".parse()?;
    /// let transport = UdpTransport::bind(server, 26761, DEFAULT_RECV_WAIT)?;
    /// println!("Listening on port {}", transport.local_port());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn bind(server: SocketAddr, local_port_hint: u16, recv_wait: Duration) -> Result<Self> {
        let unspecified = unspecified_for(&server);

        let socket = if local_port_hint == 0 {
            UdpSocket::bind((unspecified, 0))?
        } else {
            match UdpSocket::bind((unspecified, local_port_hint)) {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("Failed to bind UDP port {}: {}, using an ephemeral port", local_port_hint, e);
                    UdpSocket::bind((unspecified, 0))?
                }
            }
        };

        socket.set_read_timeout(Some(recv_wait))?;
        let local_port = socket.local_addr()?.port();
        debug!("DSU socket for {} bound to [{}]:{}", server, unspecified, local_port);

        Ok(Self {
            socket,
            closed: AtomicBool::new(false),
            local_port,
            wake_addr: SocketAddr::new(loopback_for(&server), local_port),
        })
    }

    /// Locally bound port
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "DSU socket closed")
    }
}

fn unspecified_for(server: &SocketAddr) -> IpAddr {
    match server {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    }
}

fn loopback_for(server: &SocketAddr) -> IpAddr {
    match server {
        SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
        SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
    }
}

impl DatagramSocket for UdpTransport {
    fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }
        self.socket.send_to(packet, target)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }
        self.socket.recv_from(buf).map(|(received, _)| received)
    }

    /// Mark the socket closed and wake a receive blocked on it
    ///
    /// A blocking `recv_from` cannot be interrupted by dropping the handle
    /// from another thread, so an empty datagram is sent to the socket's own
    /// port. The woken receive returns it as zero bytes, which the decoder
    /// drops.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.socket.send_to(&[], self.wake_addr) {
            debug!("Failed to wake DSU socket on port {}: {}", self.local_port, e);
        }
    }
}
