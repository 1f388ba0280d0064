use crate::{RtpTimestamp, SequenceNumber, Ssrc};
use bytes::Bytes;
use rtp_types::RtpPacketBuilder;

/// A single RTP packet, decoupled from its wire representation.
///
/// Header extensions are not carried, nothing in this stack negotiates them.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub pt: u8,
    pub sequence_number: SequenceNumber,
    pub ssrc: Ssrc,
    pub timestamp: RtpTimestamp,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, rtp_types::RtpParseError> {
        let bytes: Bytes = bytes.into();

        let parsed = rtp_types::RtpPacket::parse(&bytes[..])?;

        Ok(Self {
            pt: parsed.payload_type(),
            sequence_number: SequenceNumber(parsed.sequence_number()),
            ssrc: Ssrc(parsed.ssrc()),
            timestamp: RtpTimestamp(parsed.timestamp()),
            payload: bytes.slice_ref(parsed.payload()),
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        RtpPacketBuilder::<_, &[u8]>::new()
            .payload_type(self.pt)
            .sequence_number(self.sequence_number.0)
            .ssrc(self.ssrc.0)
            .timestamp(self.timestamp.0)
            .payload(&self.payload[..])
            .write_vec()
            .expect("packet fits in a vec")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serialize_parse_round_trip() {
        let packet = RtpPacket {
            pt: 8,
            sequence_number: SequenceNumber(1000),
            ssrc: Ssrc(0xC0FFEE),
            timestamp: RtpTimestamp(160),
            payload: Bytes::from_static(&[0x55; 160]),
        };

        let bytes = packet.to_vec();

        // version 2 in the two most significant bits
        assert_eq!(bytes[0] >> 6, 2);

        let parsed = RtpPacket::parse(bytes).unwrap();

        assert_eq!(parsed.pt, 8);
        assert_eq!(parsed.sequence_number, SequenceNumber(1000));
        assert_eq!(parsed.ssrc, Ssrc(0xC0FFEE));
        assert_eq!(parsed.timestamp, RtpTimestamp(160));
        assert_eq!(parsed.payload.len(), 160);
    }
}
