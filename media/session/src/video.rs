//! Video pump: encoded frames move between devices and RTP unmodified

use crate::config::VideoConfig;
use bytes::Bytes;
use rtp::{Codec, ExtendedSequenceNumber, RtpPacket, RtpSession, RtpStats, RtpTimestamp, Ssrc};
use std::time::{Duration, Instant};

pub(crate) struct VideoStream {
    codec: Codec,
    fps: u32,

    pub(crate) session: RtpSession,

    capture: Option<Box<dyn crate::device::VideoSource>>,
    display: Option<Box<dyn crate::device::VideoSink>>,

    sequence_number: ExtendedSequenceNumber,
    rtp_timestamp: u64,
    next_frame_at: Option<Instant>,

    remote_pt: u8,
}

impl VideoStream {
    pub(crate) fn new(config: VideoConfig) -> Self {
        Self {
            codec: config.codec,
            fps: config.fps.max(1),
            session: RtpSession::new(Ssrc::random(), config.codec.clock_rate()),
            capture: config.capture,
            display: config.display,
            sequence_number: ExtendedSequenceNumber(u64::from(rand::random::<u16>())),
            rtp_timestamp: u64::from(rand::random::<u16>()),
            next_frame_at: None,
            remote_pt: config.codec.pt(),
        }
    }

    pub(crate) fn codec(&self) -> Codec {
        self.codec
    }

    pub(crate) fn accepts_pt(&self, pt: u8) -> bool {
        pt == self.codec.pt() || pt == self.remote_pt
    }

    pub(crate) fn set_remote_pt(&mut self, pt: u8) {
        self.remote_pt = pt;
    }

    pub(crate) fn stats(&self) -> RtpStats {
        self.session.stats()
    }

    fn ticks_per_frame(&self) -> u64 {
        u64::from(90000 / self.fps)
    }

    pub(crate) fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_frame_at
            .map(|at| at.checked_duration_since(now).unwrap_or(Duration::ZERO))
    }

    pub(crate) fn pump_capture(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out = vec![];

        let ticks = self.ticks_per_frame();
        let frame_interval = Duration::from_millis(u64::from(1000 / self.fps));
        let pt = self.remote_pt;

        let Some(capture) = &mut self.capture else {
            return out;
        };

        let next = *self.next_frame_at.get_or_insert(now);

        if next > now {
            return out;
        }

        match capture.read_frame() {
            Ok(Some(frame)) => {
                let packet = RtpPacket {
                    pt,
                    sequence_number: self.sequence_number.increment(),
                    ssrc: self.session.ssrc(),
                    timestamp: RtpTimestamp(self.rtp_timestamp as u32),
                    payload: Bytes::from(frame),
                };

                self.rtp_timestamp += ticks;

                self.session.send_rtp(now, &packet);
                out.push(packet.to_vec());
            }
            Ok(None) => {}
            Err(e) => log::debug!("video capture failed, {e}"),
        }

        self.next_frame_at = Some(now + frame_interval);

        out
    }

    pub(crate) fn pump_playout(&mut self, now: Instant, jitter: Duration) {
        while let Some(packet) = self.session.pop_rtp(now, Some(jitter)) {
            if let Some(display) = &mut self.display {
                if let Err(e) = display.write_frame(&packet.payload) {
                    log::debug!("video sink write failed, {e}");
                }
            }
        }
    }
}
