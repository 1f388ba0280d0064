use crate::{Endpoint, ReceivedPacket, TransportConfig, TransportError, TransportKind};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Connected TCP stream endpoint, the optional stream transport.
///
/// The stream is opaque to this type; message framing (for SIP the
/// Content-Length header) is the consumer's concern. `run` hands out chunks
/// as they arrive.
pub struct TcpEndpoint {
    config: TransportConfig,
    peer: SocketAddr,
    stream: Option<TcpStream>,
    local_addr: Option<SocketAddr>,
}

impl TcpEndpoint {
    pub fn new(config: TransportConfig, peer: SocketAddr) -> Self {
        Self {
            config,
            peer,
            stream: None,
            local_addr: None,
        }
    }

    /// Create and immediately open an endpoint connected to `peer`
    pub fn connect(peer: SocketAddr) -> Result<Self, TransportError> {
        let mut config = TransportConfig::default();
        config.kind = TransportKind::TcpClient;

        let mut endpoint = Self::new(config, peer);
        endpoint.open()?;
        Ok(endpoint)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Endpoint for TcpEndpoint {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        match self.config.kind {
            TransportKind::Tcp | TransportKind::TcpClient => {}
            kind => return Err(TransportError::UnsupportedKind(kind)),
        }

        let stream = TcpStream::connect(self.peer)?;
        stream.set_nodelay(true)?;

        let local_addr = stream.local_addr()?;
        log::debug!("connected tcp endpoint {local_addr} -> {}", self.peer);

        self.stream = Some(stream);
        self.local_addr = Some(local_addr);

        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn send(&mut self, data: &[u8], _to: Option<SocketAddr>) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        stream.write_all(data)?;

        Ok(data.len())
    }

    fn run(
        &mut self,
        budget: Duration,
        on_packet: &mut dyn FnMut(ReceivedPacket),
    ) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let deadline = Instant::now() + budget;
        let mut buf = vec![0u8; 16 * 1024];

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(());
            };

            if remaining.is_zero() {
                return Ok(());
            }

            stream.set_read_timeout(Some(remaining))?;

            match stream.read(&mut buf) {
                Ok(0) => {
                    // peer closed the connection
                    self.stream = None;
                    return Ok(());
                }
                Ok(len) => on_packet(ReceivedPacket {
                    data: buf[..len].to_vec(),
                    source: self.peer,
                }),
                Err(e) => {
                    return match TransportError::from(e) {
                        TransportError::WouldBlock | TransportError::Timeout => Ok(()),
                        e => {
                            self.stream = None;
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn stream_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server_addr = listener.local_addr().unwrap();

        let mut endpoint = TcpEndpoint::connect(server_addr).unwrap();

        let (mut accepted, _) = listener.accept().unwrap();

        endpoint.send(b"ping", None).unwrap();

        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        accepted.write_all(b"pong").unwrap();

        let mut received = vec![];
        endpoint
            .run(Duration::from_millis(500), &mut |pkt| received.push(pkt))
            .unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data, b"pong");
    }

    #[test]
    fn connect_refused_maps_to_error() {
        // bind a listener and drop it so the port is closed
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            TcpEndpoint::connect(addr),
            Err(TransportError::ConnectionRefused)
        ));
    }
}
