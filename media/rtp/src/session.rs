use crate::jitter_buffer::JitterBuffer;
use crate::{
    ExtendedRtpTimestamp, ExtendedSequenceNumber, NtpTimestamp, RtpPacket, Ssrc,
};
use rtcp_types::{
    Compound, CompoundBuilder, Packet as RtcpPacket, ReceiverReport, ReportBlock,
    RtcpPacketWriter as _, SdesBuilder, SdesChunk, SdesItem, SenderReport,
};
use std::time::{Duration, Instant};

const DEFAULT_JITTER_BUFFER_LEN: Duration = Duration::from_millis(50);
const SDES_CNAME: u8 = 1;

/// One RTP session: a single local sender plus any number of remote sources.
///
/// Consumes received RTP/RTCP, reorders packets through a jitter buffer and
/// produces RTCP sender/receiver reports on a fixed interval.
pub struct RtpSession {
    ssrc: Ssrc,
    clock_rate: u32,
    cname: Option<String>,

    sender: Option<SenderState>,
    receivers: Vec<ReceiverState>,

    report_interval: Duration,
    last_report_at: Option<Instant>,

    stats: RtpStats,
}

struct SenderState {
    last_packet_at: Instant,
    last_rtp_timestamp: ExtendedRtpTimestamp,
    packet_count: u32,
    octet_count: u32,
}

struct ReceiverState {
    ssrc: Ssrc,
    jitter_buffer: JitterBuffer,

    last_received: Option<(Instant, ExtendedRtpTimestamp, ExtendedSequenceNumber)>,
    /// Interarrival jitter in RTP ticks, RFC 3550 appendix A.8
    jitter: f32,

    last_sr: Option<NtpTimestamp>,

    /// Snapshot of the jitter buffer counters at the last report
    reported_lost: u64,
    reported_received: u64,
}

/// Counters of an [`RtpSession`], spanning all remote sources
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,

    pub last_sent_at: Option<Instant>,
    pub last_received_at: Option<Instant>,

    /// Packets which never made it out of the jitter buffers
    pub packets_lost: u64,
    /// Fraction of packets lost over the whole session, 0.0 to 1.0
    pub loss_rate: f32,
    /// Interarrival jitter in RTP timestamp ticks
    pub jitter: f32,

    pub rtcp_sent: u64,
    pub rtcp_received: u64,

    /// Loss fraction the peer reported for our outbound stream
    pub remote_reported_loss: Option<f32>,
}

impl RtpSession {
    pub fn new(ssrc: Ssrc, clock_rate: u32) -> Self {
        Self {
            ssrc,
            clock_rate,
            cname: None,
            sender: None,
            receivers: vec![],
            report_interval: Duration::from_secs(5),
            last_report_at: None,
            stats: RtpStats::default(),
        }
    }

    pub fn with_cname(mut self, cname: String) -> Self {
        self.cname = Some(cname);
        self
    }

    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn stats(&self) -> RtpStats {
        let mut stats = self.stats;

        let (mut lost, mut received) = (0u64, 0u64);
        let mut jitter: f32 = 0.0;

        for receiver in &self.receivers {
            lost += receiver.jitter_buffer.lost;
            received += receiver.jitter_buffer.received;
            jitter = jitter.max(receiver.jitter);
        }

        stats.packets_lost = lost;
        stats.loss_rate = if lost + received > 0 {
            lost as f32 / (lost + received) as f32
        } else {
            0.0
        };
        stats.jitter = jitter;

        stats
    }

    /// Register an outgoing packet before it is put on the wire
    pub fn send_rtp(&mut self, now: Instant, packet: &RtpPacket) {
        let sender = self.sender.get_or_insert(SenderState {
            last_packet_at: now,
            last_rtp_timestamp: ExtendedRtpTimestamp::from(packet.timestamp),
            packet_count: 0,
            octet_count: 0,
        });

        sender.last_packet_at = now;
        sender.last_rtp_timestamp = sender.last_rtp_timestamp.extend(packet.timestamp);
        sender.packet_count = sender.packet_count.wrapping_add(1);
        sender.octet_count = sender.octet_count.wrapping_add(packet.payload.len() as u32);

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += packet.payload.len() as u64;
        self.stats.last_sent_at = Some(now);
    }

    /// Consume a received packet, buffering it for [`pop_rtp`](Self::pop_rtp)
    pub fn recv_rtp(&mut self, now: Instant, packet: RtpPacket) {
        self.stats.packets_received += 1;
        self.stats.bytes_received += packet.payload.len() as u64;
        self.stats.last_received_at = Some(now);

        let receiver = match self.receivers.iter_mut().find(|r| r.ssrc == packet.ssrc) {
            Some(receiver) => receiver,
            None => {
                // cap the number of tracked remote sources
                if self.receivers.len() > 32 {
                    return;
                }

                self.receivers.push(ReceiverState {
                    ssrc: packet.ssrc,
                    jitter_buffer: JitterBuffer::default(),
                    last_received: None,
                    jitter: 0.0,
                    last_sr: None,
                    reported_lost: 0,
                    reported_received: 0,
                });

                self.receivers.last_mut().unwrap()
            }
        };

        let (timestamp, sequence_number) = match receiver.last_received {
            Some((last_at, last_ts, last_seq)) => {
                let timestamp = last_ts.extend(packet.timestamp);
                let sequence_number = last_seq.extend(packet.sequence_number);

                if timestamp > last_ts {
                    // interarrival jitter, J += (|D| - J) / 16
                    let arrival_diff = (now - last_at).as_secs_f32() * self.clock_rate as f32;
                    let rtp_diff = (timestamp.0 as i64 - last_ts.0 as i64) as f32;
                    let d = (arrival_diff - rtp_diff).abs();

                    receiver.jitter += (d - receiver.jitter) / 16.0;
                }

                (timestamp, sequence_number)
            }
            None => (
                ExtendedRtpTimestamp::from(packet.timestamp),
                ExtendedSequenceNumber::from(packet.sequence_number),
            ),
        };

        receiver.last_received = Some((now, timestamp, sequence_number));
        receiver.jitter_buffer.push(timestamp, sequence_number, packet);
    }

    /// Pop the next due packet out of the jitter buffers
    pub fn pop_rtp(
        &mut self,
        now: Instant,
        jitter_buffer_len: Option<Duration>,
    ) -> Option<RtpPacket> {
        let hold_back = jitter_buffer_len.unwrap_or(DEFAULT_JITTER_BUFFER_LEN);

        for receiver in &mut self.receivers {
            let Some((last_at, last_ts, _)) = receiver.last_received else {
                continue;
            };

            // Packets older than `hold_back` relative to the newest received
            // timestamp are due
            let Some(due_instant) = now.checked_sub(hold_back) else {
                continue;
            };

            let max_timestamp = if due_instant >= last_at {
                let ahead = (due_instant - last_at).as_secs_f32() * self.clock_rate as f32;
                ExtendedRtpTimestamp(last_ts.0 + ahead as u64)
            } else {
                let behind = (last_at - due_instant).as_secs_f32() * self.clock_rate as f32;
                ExtendedRtpTimestamp(last_ts.0.saturating_sub(behind as u64))
            };

            if let Some(packet) = receiver.jitter_buffer.pop(max_timestamp) {
                return Some(packet);
            }
        }

        None
    }

    /// Consume a received RTCP compound packet
    pub fn recv_rtcp(&mut self, data: &[u8]) {
        let compound = match Compound::parse(data) {
            Ok(compound) => compound,
            Err(e) => {
                log::debug!("Failed to parse RTCP compound packet, {e:?}");
                return;
            }
        };

        self.stats.rtcp_received += 1;

        for packet in compound {
            let packet = match packet {
                Ok(packet) => packet,
                Err(e) => {
                    log::debug!("Invalid packet in RTCP compound, {e:?}");
                    return;
                }
            };

            match packet {
                RtcpPacket::Sr(sr) => {
                    if let Some(receiver) =
                        self.receivers.iter_mut().find(|r| r.ssrc.0 == sr.ssrc())
                    {
                        receiver.last_sr = Some(NtpTimestamp::now());
                    }

                    for block in sr.report_blocks() {
                        self.handle_report_block(&block);
                    }
                }
                RtcpPacket::Rr(rr) => {
                    for block in rr.report_blocks() {
                        self.handle_report_block(&block);
                    }
                }
                _ => { /* SDES, BYE, APP, feedback: ignored */ }
            }
        }
    }

    fn handle_report_block(&mut self, block: &ReportBlock<'_>) {
        if block.ssrc() != self.ssrc.0 {
            return;
        }

        self.stats.remote_reported_loss = Some(f32::from(block.fraction_lost()) / 255.0);
    }

    /// Returns the serialized RTCP report once the report interval elapsed
    pub fn poll_rtcp(&mut self, now: Instant) -> Option<Vec<u8>> {
        match self.last_report_at {
            Some(last) if now < last + self.report_interval => return None,
            _ => {}
        }

        self.last_report_at = Some(now);
        self.stats.rtcp_sent += 1;

        Some(self.build_report(now))
    }

    /// Duration until the next RTCP report is due
    pub fn rtcp_timeout(&self, now: Instant) -> Option<Duration> {
        match self.last_report_at {
            Some(last) => Some(
                (last + self.report_interval)
                    .checked_duration_since(now)
                    .unwrap_or(Duration::ZERO),
            ),
            None => Some(Duration::ZERO),
        }
    }

    fn build_report(&mut self, now: Instant) -> Vec<u8> {
        let ntp_now = NtpTimestamp::now();
        let clock_rate = self.clock_rate;

        let mut report_blocks = vec![];

        for receiver in &mut self.receivers {
            let lost = receiver.jitter_buffer.lost - receiver.reported_lost;
            let received = receiver.jitter_buffer.received - receiver.reported_received;

            receiver.reported_lost = receiver.jitter_buffer.lost;
            receiver.reported_received = receiver.jitter_buffer.received;

            let expected = lost + received;
            let fraction_lost = if expected > 0 {
                ((lost as f64 / expected as f64) * 255.0) as u8
            } else {
                0
            };

            let (lsr, dlsr) = match receiver.last_sr {
                Some(last_sr) => {
                    let delay = ntp_now.saturating_since(last_sr);
                    (
                        last_sr.to_fixed_u32(),
                        (delay.as_secs_f64() * 65536.0) as u32,
                    )
                }
                None => (0, 0),
            };

            let last_seq = receiver
                .last_received
                .map(|(_, _, seq)| (seq.0 & u64::from(u32::MAX)) as u32)
                .unwrap_or(0);

            report_blocks.push(
                ReportBlock::builder(receiver.ssrc.0)
                    .fraction_lost(fraction_lost)
                    .cumulative_lost(receiver.jitter_buffer.lost as u32)
                    .extended_sequence_number(last_seq)
                    .interarrival_jitter(receiver.jitter as u32)
                    .last_sender_report_timestamp(lsr)
                    .delay_since_last_sender_report_timestamp(dlsr),
            );
        }

        let mut compound = CompoundBuilder::default();

        if let Some(sender) = &self.sender {
            // extrapolate the RTP timestamp to `now`
            let elapsed = (now - sender.last_packet_at).as_secs_f32();
            let rtp_now = sender.last_rtp_timestamp.0 + (elapsed * clock_rate as f32) as u64;

            let mut sr = SenderReport::builder(self.ssrc.0)
                .ntp_timestamp(ntp_now.to_fixed_u64())
                .rtp_timestamp((rtp_now & u64::from(u32::MAX)) as u32)
                .packet_count(sender.packet_count)
                .octet_count(sender.octet_count);

            for block in report_blocks {
                sr = sr.add_report_block(block);
            }

            compound = compound.add_packet(sr);
        } else {
            let mut rr = ReceiverReport::builder(self.ssrc.0);

            for block in report_blocks {
                rr = rr.add_report_block(block);
            }

            compound = compound.add_packet(rr);
        }

        if let Some(cname) = &self.cname {
            compound = compound.add_packet(
                SdesBuilder::default().add_chunk(
                    SdesChunk::builder(self.ssrc.0)
                        .add_item(SdesItem::builder(SDES_CNAME, cname)),
                ),
            );
        }

        let size = compound.calculate_size().expect("report size is bounded");
        let mut buf = vec![0u8; size];
        let len = compound.write_into_unchecked(&mut buf);
        buf.truncate(len);
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{RtpTimestamp, SequenceNumber};
    use bytes::Bytes;

    fn packet(ssrc: u32, seq: u16, ts: u32) -> RtpPacket {
        RtpPacket {
            pt: 0,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(ssrc),
            timestamp: RtpTimestamp(ts),
            payload: Bytes::from_static(&[0; 160]),
        }
    }

    #[test]
    fn receiver_report_round_trip() {
        let mut session = RtpSession::new(Ssrc(1), 8000).with_cname("test@host".into());
        let now = Instant::now();

        session.recv_rtp(now, packet(99, 1, 0));
        session.recv_rtp(now, packet(99, 2, 160));

        let report = session.poll_rtcp(now).unwrap();

        // must parse back as a valid compound starting with an RR
        let mut compound = Compound::parse(&report).unwrap();
        let first = compound.next().unwrap().unwrap();
        assert!(matches!(first, RtcpPacket::Rr(_)));

        // next report only after the interval
        assert!(session.poll_rtcp(now).is_none());
    }

    #[test]
    fn sender_report_after_sending() {
        let mut session = RtpSession::new(Ssrc(7), 8000);
        let now = Instant::now();

        session.send_rtp(now, &packet(7, 10, 1600));

        let report = session.poll_rtcp(now).unwrap();

        let mut compound = Compound::parse(&report).unwrap();
        let first = compound.next().unwrap().unwrap();
        assert!(matches!(first, RtcpPacket::Sr(_)));

        let stats = session.stats();
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.bytes_sent, 160);
        assert_eq!(stats.rtcp_sent, 1);
    }

    #[test]
    fn jitter_buffer_delays_playout() {
        let mut session = RtpSession::new(Ssrc(1), 8000);
        let now = Instant::now();

        session.recv_rtp(now, packet(99, 1, 8000));

        // not due yet with a 50ms jitter buffer
        assert!(session.pop_rtp(now, None).is_none());

        // due once the hold back time passed
        let later = now + Duration::from_millis(120);
        assert!(session.pop_rtp(later, None).is_some());
    }

    #[test]
    fn loss_rate_accounts_for_gaps() {
        let mut session = RtpSession::new(Ssrc(1), 8000);
        let now = Instant::now();

        session.recv_rtp(now, packet(99, 1, 0));
        // packet 2 lost
        session.recv_rtp(now, packet(99, 3, 320));

        let later = now + Duration::from_millis(200);
        assert!(session.pop_rtp(later, None).is_some());
        assert!(session.pop_rtp(later, None).is_some());

        let stats = session.stats();
        assert_eq!(stats.packets_lost, 1);
        assert!(stats.loss_rate > 0.0);
    }
}
