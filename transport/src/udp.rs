use crate::{Endpoint, ReceivedPacket, TransportConfig, TransportError, TransportKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// Unconnected UDP endpoint, the mandatory transport.
///
/// One instance owns at most one socket. `close` is idempotent and dropping
/// a closed endpoint is a no-op.
pub struct UdpEndpoint {
    config: TransportConfig,
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
}

impl UdpEndpoint {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            socket: None,
            local_addr: None,
        }
    }

    /// Create and immediately open an endpoint bound to `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let mut endpoint = Self::new(TransportConfig::udp(addr.ip(), addr.port()));
        endpoint.open()?;
        Ok(endpoint)
    }

    fn socket(&self) -> Result<&UdpSocket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::Closed)
    }
}

impl Endpoint for UdpEndpoint {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            // already open
            return Ok(());
        }

        if self.config.kind != TransportKind::Udp {
            return Err(TransportError::UnsupportedKind(self.config.kind));
        }

        let bind_addr = SocketAddr::new(self.config.effective_bind_addr(), self.config.bind_port);

        let socket = UdpSocket::bind(bind_addr)?;
        let local_addr = socket.local_addr()?;

        if self.config.nonblocking {
            socket.set_nonblocking(true)?;
        }

        log::debug!("bound udp endpoint to {local_addr}");

        self.socket = Some(socket);
        self.local_addr = Some(local_addr);

        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn send(&mut self, data: &[u8], to: Option<SocketAddr>) -> Result<usize, TransportError> {
        let to = to.ok_or(TransportError::InvalidAddress)?;

        Ok(self.socket()?.send_to(data, to)?)
    }

    fn run(
        &mut self,
        budget: Duration,
        on_packet: &mut dyn FnMut(ReceivedPacket),
    ) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;

        let deadline = Instant::now() + budget;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        // bounds a nonblocking socket which never runs dry
        let mut remaining_packets = 256u32;

        loop {
            if self.config.nonblocking {
                if remaining_packets == 0 && Instant::now() >= deadline {
                    return Ok(());
                }

                remaining_packets = remaining_packets.saturating_sub(1);
            } else {
                let remaining = deadline
                    .checked_duration_since(Instant::now())
                    .unwrap_or(Duration::ZERO);

                if remaining.is_zero() {
                    return Ok(());
                }

                socket.set_read_timeout(Some(remaining))?;
            }

            match socket.recv_from(&mut buf) {
                Ok((len, source)) => on_packet(ReceivedPacket {
                    data: buf[..len].to_vec(),
                    source,
                }),
                Err(e) => {
                    return match TransportError::from(e) {
                        // budget elapsed or nothing ready
                        TransportError::WouldBlock | TransportError::Timeout => Ok(()),
                        // ICMP errors surface on unconnected sockets on some
                        // platforms, they refer to an earlier send
                        TransportError::ConnectionReset | TransportError::ConnectionRefused => {
                            Ok(())
                        }
                        e => Err(e),
                    };
                }
            }
        }
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bound_port_is_observable() {
        let mut endpoint = UdpEndpoint::new(TransportConfig::udp("127.0.0.1".parse().unwrap(), 0));

        assert!(endpoint.local_addr().is_none());

        endpoint.open().unwrap();
        let addr = endpoint.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn send_without_target_is_an_error() {
        let mut endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        assert!(matches!(
            endpoint.send(b"x", None),
            Err(TransportError::InvalidAddress)
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        endpoint.close();
        endpoint.close();

        assert!(matches!(
            endpoint.send(b"x", Some("127.0.0.1:9".parse().unwrap())),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn datagram_round_trip() {
        let mut a = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        let sent = a.send(b"hello", b.local_addr()).unwrap();
        assert_eq!(sent, 5);

        let mut received = vec![];
        b.run(Duration::from_millis(500), &mut |pkt| {
            received.push(pkt);
        })
        .unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data, b"hello");
        assert_eq!(received[0].source, a.local_addr().unwrap());
    }
}
