//! Transports carrying SIP signaling and media datagrams.
//!
//! A single UDP socket may carry SIP, STUN, RTP and RTCP at the same time.
//! The transport itself never demultiplexes, the socket's owner classifies
//! each datagram with [`PacketKind::identify`] and routes it upwards.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

mod config;
mod tcp;
mod udp;

pub use config::{MqttOptions, TransportConfig, TransportKind};
pub use tcp::TcpEndpoint;
pub use udp::UdpEndpoint;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("operation would block")]
    WouldBlock,
    #[error("destination unreachable")]
    Unreachable,
    #[error("invalid or missing address")]
    InvalidAddress,
    #[error("operation timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("endpoint is not open")]
    Closed,
    #[error("transport kind {0:?} has no built-in implementation")]
    UnsupportedKind(TransportKind),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportError::ConnectionReset
            }
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
                TransportError::InvalidAddress
            }
            _ => TransportError::Io(e),
        }
    }
}

/// One datagram (or stream chunk) handed to the receive callback
#[derive(Debug)]
pub struct ReceivedPacket {
    pub data: Vec<u8>,
    pub source: SocketAddr,
}

/// Common operation set of all endpoints: open, send, pump, close.
///
/// `run` drains ready input for at most `budget`, invoking `on_packet`
/// exactly once per received datagram.
pub trait Endpoint {
    fn open(&mut self) -> Result<(), TransportError>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn send(&mut self, data: &[u8], to: Option<SocketAddr>) -> Result<usize, TransportError>;

    fn run(
        &mut self,
        budget: Duration,
        on_packet: &mut dyn FnMut(ReceivedPacket),
    ) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Protocol family of a datagram on a shared socket, derived from its first
/// bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Sip,
    Stun,
    Rtp,
    Rtcp,
    /// Double CRLF keep-alive probe, must be answered with [`PacketKind::KeepAliveReply`]
    KeepAliveProbe,
    /// Single CRLF, answer to a keep-alive probe
    KeepAliveReply,
    Unknown,
}

impl PacketKind {
    pub fn identify(bytes: &[u8]) -> Self {
        if bytes == b"\r\n\r\n" {
            return PacketKind::KeepAliveProbe;
        }

        if bytes == b"\r\n" {
            return PacketKind::KeepAliveReply;
        }

        if bytes.len() < 8 {
            return PacketKind::Unknown;
        }

        match bytes[0] >> 6 {
            // first two bits zero: STUN, confirmed by the magic cookie
            0 if bytes[4..8] == [0x21, 0x12, 0xA4, 0x42] => PacketKind::Stun,
            // RTP version 2; RTCP payload types 200..=204 share the prefix
            2 => {
                if (200..=204).contains(&bytes[1]) {
                    PacketKind::Rtcp
                } else {
                    PacketKind::Rtp
                }
            }
            _ if bytes[0].is_ascii_alphabetic() => {
                // SIP requests start with a method token, responses with "SIP/2.0"
                PacketKind::Sip
            }
            _ => PacketKind::Unknown,
        }
    }
}

#[cfg(test)]
mod test {
    use super::PacketKind;

    #[test]
    fn identify_families() {
        assert_eq!(
            PacketKind::identify(b"INVITE sip:bob@example.org SIP/2.0\r\n"),
            PacketKind::Sip
        );
        assert_eq!(
            PacketKind::identify(b"SIP/2.0 200 OK\r\n"),
            PacketKind::Sip
        );

        let stun = [
            0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xA4, 0x42, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        assert_eq!(PacketKind::identify(&stun), PacketKind::Stun);

        let rtp = [0x80, 8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(PacketKind::identify(&rtp), PacketKind::Rtp);

        let rtcp = [0x80, 200, 0, 6, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(PacketKind::identify(&rtcp), PacketKind::Rtcp);

        assert_eq!(PacketKind::identify(b"\r\n\r\n"), PacketKind::KeepAliveProbe);
        assert_eq!(PacketKind::identify(b"\r\n"), PacketKind::KeepAliveReply);

        assert_eq!(PacketKind::identify(&[0x40, 0, 0, 0, 0, 0, 0, 0]), PacketKind::Unknown);
    }
}
