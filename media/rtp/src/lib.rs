//! RTP session bookkeeping: packet (de)serialization, sequence/timestamp
//! extension, jitter buffering and RTCP report generation.

mod codec;
mod jitter_buffer;
mod ntp_timestamp;
mod rtp_packet;
mod session;

pub use codec::Codec;
pub use ntp_timestamp::NtpTimestamp;
pub use rtp_packet::RtpPacket;
pub use session::{RtpSession, RtpStats};

pub use rtcp_types;
pub use rtp_types;

/// RTP synchronization source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ssrc(pub u32);

impl Ssrc {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// 16 bit RTP sequence number as found on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u16);

/// 32 bit RTP timestamp as found on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RtpTimestamp(pub u32);

/// Sequence number extended to 64 bit by tracking rollovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedSequenceNumber(pub u64);

impl ExtendedSequenceNumber {
    pub fn increment(&mut self) -> SequenceNumber {
        self.0 += 1;
        self.truncated()
    }

    pub fn truncated(&self) -> SequenceNumber {
        SequenceNumber(self.0 as u16)
    }

    /// Extend a wire sequence number, assuming it is close to `self`
    pub fn extend(&self, got: SequenceNumber) -> ExtendedSequenceNumber {
        ExtendedSequenceNumber(extend_wrapping(self.0, u64::from(got.0), 16))
    }
}

impl From<SequenceNumber> for ExtendedSequenceNumber {
    fn from(seq: SequenceNumber) -> Self {
        ExtendedSequenceNumber(u64::from(seq.0))
    }
}

/// RTP timestamp extended to 64 bit by tracking rollovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedRtpTimestamp(pub u64);

impl ExtendedRtpTimestamp {
    pub fn truncated(&self) -> RtpTimestamp {
        RtpTimestamp(self.0 as u32)
    }

    /// Extend a wire timestamp, assuming it is close to `self`
    pub fn extend(&self, got: RtpTimestamp) -> ExtendedRtpTimestamp {
        ExtendedRtpTimestamp(extend_wrapping(self.0, u64::from(got.0), 32))
    }
}

impl From<RtpTimestamp> for ExtendedRtpTimestamp {
    fn from(ts: RtpTimestamp) -> Self {
        ExtendedRtpTimestamp(u64::from(ts.0))
    }
}

/// Map a truncated wire counter onto the 64 bit counter line, choosing the
/// value closest to `reference`. `bits` is the wire counter width.
fn extend_wrapping(reference: u64, got: u64, bits: u32) -> u64 {
    let modulus = 1u64 << bits;
    let mask = modulus - 1;

    let base = (reference & !mask) | got;

    let candidates = [
        base,
        base.wrapping_add(modulus),
        base.wrapping_sub(modulus),
    ];

    candidates
        .into_iter()
        .min_by_key(|c| c.abs_diff(reference))
        .expect("candidates is never empty")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extend_forward_and_backward() {
        let reference = ExtendedSequenceNumber(65535);

        assert_eq!(reference.extend(SequenceNumber(65534)).0, 65534);
        assert_eq!(reference.extend(SequenceNumber(65535)).0, 65535);
        assert_eq!(reference.extend(SequenceNumber(0)).0, 65536);
        assert_eq!(reference.extend(SequenceNumber(1)).0, 65537);
    }

    #[test]
    fn extend_across_multiple_rollovers() {
        let reference = ExtendedSequenceNumber(3 * 65536 - 1);

        assert_eq!(reference.extend(SequenceNumber(65533)).0, 3 * 65536 - 3);
        assert_eq!(reference.extend(SequenceNumber(0)).0, 3 * 65536);
        assert_eq!(reference.extend(SequenceNumber(1)).0, 3 * 65536 + 1);
    }

    #[test]
    fn extend_timestamp() {
        let reference = ExtendedRtpTimestamp(u64::from(u32::MAX));

        assert_eq!(
            reference.extend(RtpTimestamp(0)).0,
            u64::from(u32::MAX) + 1
        );
    }
}
