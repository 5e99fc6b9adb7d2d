//! Trait abstraction for datagram socket operations to enable testing

use std::io;
use std::net::SocketAddr;

/// Datagram socket with a bounded receive wait
///
/// `recv` blocks for at most the socket's configured wait interval and
/// reports an elapsed wait as `WouldBlock`/`TimedOut`. After `close`, every
/// operation fails with `NotConnected` so a receive loop stops promptly.
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram to `target`
    fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buf`, returning its length
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the socket; idempotent
    fn close(&self);
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock datagram socket for testing
    ///
    /// Inbound datagrams are queued by the test; outbound datagrams are
    /// recorded with their target.
    #[derive(Default)]
    pub struct MockSocket {
        pub inbound: Mutex<VecDeque<Vec<u8>>>,
        pub sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
        pub send_error: Mutex<Option<io::ErrorKind>>,
        pub recv_error: Mutex<Option<io::ErrorKind>>,
        pub closed: AtomicBool,
    }

    impl MockSocket {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_inbound(&self, datagram: Vec<u8>) {
            self.inbound.lock().unwrap().push_back(datagram);
        }

        pub fn sent_packets(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().iter().map(|(packet, _)| packet.clone()).collect()
        }

        pub fn take_sent(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.sent.lock().unwrap())
                .into_iter()
                .map(|(packet, _)| packet)
                .collect()
        }

        pub fn set_send_error(&self, error: io::ErrorKind) {
            *self.send_error.lock().unwrap() = Some(error);
        }

        pub fn set_recv_error(&self, error: io::ErrorKind) {
            *self.recv_error.lock().unwrap() = Some(error);
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl DatagramSocket for MockSocket {
        fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize> {
            if self.is_closed() {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "Mock socket closed"));
            }
            if let Some(error) = *self.send_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock send error"));
            }
            self.sent.lock().unwrap().push((packet.to_vec(), target));
            Ok(packet.len())
        }

        fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            if self.is_closed() {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "Mock socket closed"));
            }
            if let Some(error) = self.recv_error.lock().unwrap().take() {
                return Err(io::Error::new(error, "Mock recv error"));
            }
            if let Some(datagram) = self.inbound.lock().unwrap().pop_front() {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                return Ok(len);
            }
            std::thread::sleep(Duration::from_millis(1));
            Err(io::Error::new(io::ErrorKind::WouldBlock, "Mock wait elapsed"))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
