//! UDP socket layer encoding and decoding overlay packets.

use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::common::Packet;

/// Largest UDP payload.
pub const MTU: usize = 65_507;

pub trait Udp: Debug + Send {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()>;
}

pub mod real {
    use super::*;

    #[derive(Debug)]
    pub struct UdpSocket(pub(crate) std::net::UdpSocket);

    impl UdpSocket {
        pub fn bind(port: u16) -> io::Result<Box<Self>> {
            let socket = std::net::UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?;

            Ok(Box::new(Self(socket)))
        }
    }

    impl Udp for UdpSocket {
        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.0.recv_from(buf)
        }
        fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
            self.0.send_to(buf, addr)
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.0.local_addr()
        }
        fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
            self.0.set_read_timeout(dur)
        }
    }
}

/// In-memory sockets on `127.0.0.1`, shared by every simulated node of this process.
pub mod sim {
    pub use super::*;

    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

    use flume::{Receiver, RecvTimeoutError, Sender};
    use rand::Rng;

    type Datagram = (Box<[u8]>, SocketAddr);

    static CHANNELS: OnceLock<Mutex<HashMap<SocketAddr, Sender<Datagram>>>> = OnceLock::new();

    fn channels() -> MutexGuard<'static, HashMap<SocketAddr, Sender<Datagram>>> {
        CHANNELS
            .get_or_init(|| Mutex::new(Default::default()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[derive(Debug)]
    pub struct UdpSocket {
        local_addr: SocketAddr,
        receiver: Receiver<Datagram>,
        read_timeout: Option<Duration>,
    }

    impl UdpSocket {
        /// Bind `127.0.0.1:port`, or a random free port if `port` is `0`.
        pub fn bind(port: u16) -> io::Result<Box<Self>> {
            let mut channels = channels();

            let local_addr = if port == 0 {
                let mut rng = rand::thread_rng();

                loop {
                    let candidate =
                        SocketAddr::from((Ipv4Addr::LOCALHOST, rng.gen_range(1024..=u16::MAX)));

                    if !channels.contains_key(&candidate) {
                        break candidate;
                    }
                }
            } else {
                SocketAddr::from((Ipv4Addr::LOCALHOST, port))
            };

            if channels.contains_key(&local_addr) {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("simulated address {local_addr} is in use"),
                ));
            }

            let (sender, receiver) = flume::unbounded();
            channels.insert(local_addr, sender);

            Ok(Box::new(Self {
                local_addr,
                receiver,
                read_timeout: None,
            }))
        }
    }

    impl Drop for UdpSocket {
        fn drop(&mut self) {
            channels().remove(&self.local_addr);
        }
    }

    impl Udp for UdpSocket {
        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let received = match self.read_timeout {
                Some(timeout) => self.receiver.recv_timeout(timeout),
                None => self
                    .receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok((datagram, from)) => {
                    let size = datagram.len().min(buf.len());
                    buf[..size].copy_from_slice(&datagram[..size]);

                    Ok((size, from))
                }
                Err(RecvTimeoutError::Timeout) => Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "udp::sim::UdpSocket recv timeout",
                )),
                Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "udp::sim::UdpSocket was unbound",
                )),
            }
        }
        fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
            let size = buf.len();

            if size > MTU {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("datagram of {size} bytes is larger than {MTU} bytes"),
                ));
            }

            if let Some(channel) = channels().get(&addr) {
                let _ = channel.send((buf.into(), self.local_addr));
            } else {
                // UDP packet sent to the void.
            }

            Ok(size)
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.local_addr)
        }
        fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
            self.read_timeout = dur;
            Ok(())
        }
    }
}

/// A [Udp] wrapper that sends and receives [Packet]s.
#[derive(Debug)]
pub struct OverlaySocket {
    socket: Box<dyn Udp>,
    local_addr: SocketAddr,
    buf: Box<[u8]>,
}

impl OverlaySocket {
    pub fn new(mut socket: Box<dyn Udp>, read_timeout: Duration) -> io::Result<Self> {
        socket.set_read_timeout(Some(read_timeout))?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            buf: vec![0; MTU].into_boxed_slice(),
        })
    }

    /// Returns the address the socket is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a packet, logging instead of failing.
    pub fn send(&self, address: SocketAddr, packet: &Packet) {
        trace!(context = "socket_packet_sending", ?packet, %address);

        let bytes = match packet.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(?error, "Failed to encode packet");
                return;
            }
        };

        if bytes.len() > MTU {
            warn!(size = bytes.len(), %address, "Dropping packet larger than a datagram");
            return;
        }

        let _ = self.socket.send_to(&bytes, address).map_err(|error| {
            debug!(?error, %address, "Error sending packet");
        });
    }

    /// Receives a single packet, waiting at most the read timeout.
    /// On success, returns the packet and its origin.
    pub fn recv_from(&mut self) -> Option<(Packet, SocketAddr)> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((amt, from)) => {
                let bytes = &self.buf[..amt];

                match Packet::from_bytes(bytes) {
                    Ok(packet) => {
                        trace!(context = "socket_packet_receiving", ?packet, %from);
                        Some((packet, from))
                    }
                    Err(error) => {
                        trace!(
                            context = "socket_error",
                            ?error,
                            %from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid packet."
                        );
                        None
                    }
                }
            }
            Err(error) => {
                if !matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) {
                    trace!(context = "socket_error", ?error, "recv_from failed");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::common::{DataPacket, Key, Message, MAX_PAYLOAD_SIZE};

    use super::*;

    #[test]
    fn sim_sockets_exchange_packets() {
        let a = OverlaySocket::new(
            sim::UdpSocket::bind(0).unwrap(),
            Duration::from_millis(100),
        )
        .unwrap();
        let mut b = OverlaySocket::new(
            sim::UdpSocket::bind(0).unwrap(),
            Duration::from_millis(100),
        )
        .unwrap();

        let packet = Packet::Leave {
            key: Key::hash(b"a"),
        };

        a.send(b.local_addr(), &packet);

        let (received, from) = b.recv_from().unwrap();

        assert_eq!(received, packet);
        assert_eq!(from, a.local_addr());
        assert!(b.recv_from().is_none());
    }

    #[test]
    fn sim_port_in_use() {
        let socket = sim::UdpSocket::bind(0).unwrap();
        let port = socket.local_addr().unwrap().port();

        let error = sim::UdpSocket::bind(port).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::AddrInUse);

        drop(socket);
        assert!(sim::UdpSocket::bind(port).is_ok());
    }

    #[test]
    fn largest_payload_fits_a_datagram() {
        let a = OverlaySocket::new(
            sim::UdpSocket::bind(0).unwrap(),
            Duration::from_millis(100),
        )
        .unwrap();
        let mut b = OverlaySocket::new(
            sim::UdpSocket::bind(0).unwrap(),
            Duration::from_millis(100),
        )
        .unwrap();

        let packet = Packet::Data(DataPacket {
            id: i64::MAX as u64 - 1,
            message: Message::new(Key::random(), u32::MAX, vec![7; MAX_PAYLOAD_SIZE]),
            hops: u8::MAX,
        });
        assert!(packet.to_bytes().unwrap().len() <= MTU);

        a.send(b.local_addr(), &packet);

        let (received, _) = b.recv_from().unwrap();
        assert_eq!(received, packet);
    }

    #[test]
    fn sim_rejects_oversized_datagrams() {
        let a = sim::UdpSocket::bind(0).unwrap();
        let b = sim::UdpSocket::bind(0).unwrap();

        let error = a
            .send_to(&vec![0; MTU + 1], b.local_addr().unwrap())
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }
}
