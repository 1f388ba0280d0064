use crate::{ExtendedRtpTimestamp, ExtendedSequenceNumber, RtpPacket};
use std::collections::BTreeMap;

/// Reordering buffer for received RTP packets.
///
/// Packets are held back until [`pop`](JitterBuffer::pop) considers them due,
/// which gives late packets a chance to slot into their place.
pub(crate) struct JitterBuffer {
    max_entries: usize,
    queue: BTreeMap<ExtendedSequenceNumber, Entry>,

    last_popped: Option<ExtendedSequenceNumber>,

    /// packets dropped as duplicate, too late, or due to overflow
    pub(crate) dropped: u64,
    /// packets accepted into the buffer
    pub(crate) received: u64,
    /// packets skipped over because they never arrived
    pub(crate) lost: u64,
}

struct Entry {
    timestamp: ExtendedRtpTimestamp,
    packet: RtpPacket,
}

impl Default for JitterBuffer {
    fn default() -> Self {
        JitterBuffer {
            max_entries: 512,
            queue: BTreeMap::new(),
            last_popped: None,
            dropped: 0,
            received: 0,
            lost: 0,
        }
    }
}

impl JitterBuffer {
    pub(crate) fn push(
        &mut self,
        timestamp: ExtendedRtpTimestamp,
        sequence_number: ExtendedSequenceNumber,
        packet: RtpPacket,
    ) {
        if let Some(last) = self.last_popped {
            if sequence_number <= last {
                self.dropped += 1;
                return;
            }
        }

        if self
            .queue
            .insert(sequence_number, Entry { timestamp, packet })
            .is_some()
        {
            // duplicate, the newer copy replaced the older one
            self.dropped += 1;
        } else {
            self.received += 1;
        }

        if self.queue.len() > self.max_entries {
            self.queue.pop_first();
            self.dropped += 1;
        }
    }

    /// Remove and return the oldest packet whose timestamp is due.
    ///
    /// Skipped-over gaps in the sequence number space count as lost.
    pub(crate) fn pop(&mut self, max_timestamp: ExtendedRtpTimestamp) -> Option<RtpPacket> {
        let (&seq, entry) = self.queue.first_key_value()?;

        if entry.timestamp > max_timestamp {
            return None;
        }

        let entry = self.queue.remove(&seq).expect("first_key_value was Some");

        if let Some(last) = self.last_popped {
            self.lost += seq.0 - last.0 - 1;
        }

        self.last_popped = Some(seq);

        Some(entry.packet)
    }

    pub(crate) fn earliest_timestamp(&self) -> Option<ExtendedRtpTimestamp> {
        self.queue.values().next().map(|e| e.timestamp)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{RtpTimestamp, SequenceNumber, Ssrc};
    use bytes::Bytes;

    fn packet(seq: u16) -> RtpPacket {
        RtpPacket {
            pt: 0,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(0),
            timestamp: RtpTimestamp(0),
            payload: Bytes::new(),
        }
    }

    fn push(jb: &mut JitterBuffer, seq: u64, ts: u64) {
        jb.push(
            ExtendedRtpTimestamp(ts),
            ExtendedSequenceNumber(seq),
            packet(seq as u16),
        );
    }

    #[test]
    fn reorders_and_counts_loss() {
        let mut jb = JitterBuffer::default();

        push(&mut jb, 1, 100);
        push(&mut jb, 4, 400);
        push(&mut jb, 3, 300);

        assert!(jb.pop(ExtendedRtpTimestamp(99)).is_none());

        assert_eq!(jb.pop(ExtendedRtpTimestamp(100)).unwrap().sequence_number.0, 1);
        assert!(jb.pop(ExtendedRtpTimestamp(200)).is_none());
        assert_eq!(jb.pop(ExtendedRtpTimestamp(500)).unwrap().sequence_number.0, 3);
        assert_eq!(jb.pop(ExtendedRtpTimestamp(500)).unwrap().sequence_number.0, 4);

        // packet 2 never arrived
        assert_eq!(jb.lost, 1);
        assert_eq!(jb.received, 3);
    }

    #[test]
    fn drops_late_and_duplicate_packets() {
        let mut jb = JitterBuffer::default();

        push(&mut jb, 5, 500);
        assert_eq!(jb.pop(ExtendedRtpTimestamp(500)).unwrap().sequence_number.0, 5);

        // late
        push(&mut jb, 4, 400);
        assert_eq!(jb.dropped, 1);

        // duplicate
        push(&mut jb, 6, 600);
        push(&mut jb, 6, 600);
        assert_eq!(jb.dropped, 2);
    }
}
