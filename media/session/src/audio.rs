//! Audio pump: capture device -> RTP and RTP -> playback/record devices,
//! including G.711 transcoding where device and codec formats differ

use crate::config::AudioConfig;
use crate::device::{AudioSink, AudioSource, SampleFormat};
use bytes::Bytes;
use rtp::{Codec, ExtendedSequenceNumber, RtpPacket, RtpSession, RtpStats, RtpTimestamp, Ssrc};
use std::time::{Duration, Instant};

pub(crate) struct AudioStream {
    codec: Codec,
    sample_rate: u32,
    channels: u32,
    frame_ms: u32,

    pub(crate) session: RtpSession,

    capture: Option<Box<dyn AudioSource>>,
    playback: Option<Box<dyn AudioSink>>,
    record: Option<Box<dyn AudioSink>>,

    sequence_number: ExtendedSequenceNumber,
    rtp_timestamp: u64,
    next_frame_at: Option<Instant>,

    /// Payload type the peer expects, from its SDP answer
    remote_pt: u8,

    read_buf: Vec<u8>,
}

impl AudioStream {
    pub(crate) fn new(config: AudioConfig) -> Self {
        let ssrc = Ssrc::random();

        Self {
            codec: config.codec,
            sample_rate: config.sample_rate,
            channels: config.channels.max(1),
            frame_ms: config.frame_ms.max(10),
            session: RtpSession::new(ssrc, config.codec.clock_rate()),
            capture: config.capture,
            playback: config.playback,
            record: config.record,
            sequence_number: ExtendedSequenceNumber(u64::from(rand::random::<u16>())),
            rtp_timestamp: u64::from(rand::random::<u16>()),
            next_frame_at: None,
            remote_pt: config.codec.pt(),
            read_buf: vec![],
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

    pub(crate) fn set_capture(&mut self, capture: Box<dyn AudioSource>) {
        self.capture = Some(capture);
    }

    pub(crate) fn set_playback(&mut self, playback: Box<dyn AudioSink>) {
        self.playback = Some(playback);
    }

    pub(crate) fn set_record(&mut self, record: Box<dyn AudioSink>) {
        self.record = Some(record);
    }

    pub(crate) fn stats(&self) -> RtpStats {
        self.session.stats()
    }

    fn samples_per_frame(&self) -> usize {
        (self.sample_rate * self.frame_ms / 1000) as usize * self.channels as usize
    }

    /// RTP timestamp ticks covered by one frame (counted per channel)
    fn ticks_per_frame(&self) -> u64 {
        u64::from(self.sample_rate * self.frame_ms / 1000)
    }

    pub(crate) fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_frame_at.map(|at| {
            at.checked_duration_since(now).unwrap_or(Duration::ZERO)
        })
    }

    /// Read frames which are due from the capture device, returning the
    /// serialized RTP packets to send
    pub(crate) fn pump_capture(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out = vec![];

        let samples = self.samples_per_frame();
        let ticks = self.ticks_per_frame();
        let frame = Duration::from_millis(u64::from(self.frame_ms));
        let codec = self.codec;
        let pt = self.remote_pt;

        let Some(capture) = &mut self.capture else {
            return out;
        };

        let sample_size = capture.format().sample_size();

        // start clocking frames with the first pump
        let mut next = *self.next_frame_at.get_or_insert(now);

        // catch up at most a few frames, drop the rest of the backlog
        if now.saturating_duration_since(next) > 4 * frame {
            next = now;
        }

        while next <= now {
            self.read_buf.resize(samples * sample_size, 0);

            let read = match capture.read_audio(&mut self.read_buf, samples) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    log::debug!("audio capture failed, {e}");
                    break;
                }
            };

            let payload =
                encode_payload(codec, capture.format(), &self.read_buf[..read * sample_size]);

            let packet = RtpPacket {
                pt,
                sequence_number: self.sequence_number.increment(),
                ssrc: self.session.ssrc(),
                timestamp: RtpTimestamp(self.rtp_timestamp as u32),
                payload: Bytes::from(payload),
            };

            self.rtp_timestamp += ticks;

            self.session.send_rtp(now, &packet);
            out.push(packet.to_vec());

            next += frame;
        }

        self.next_frame_at = Some(next);

        out
    }

    /// Deliver due packets from the jitter buffer to playback and record
    pub(crate) fn pump_playout(&mut self, now: Instant, jitter: Duration) {
        while let Some(packet) = self.session.pop_rtp(now, Some(jitter)) {
            let codec = self.codec;

            if let Some(playback) = &mut self.playback {
                write_payload(codec, playback.as_mut(), &packet.payload);
            }

            if let Some(record) = &mut self.record {
                write_payload(codec, record.as_mut(), &packet.payload);
            }
        }
    }
}

/// Convert captured device samples into codec payload bytes
fn encode_payload(codec: Codec, format: SampleFormat, data: &[u8]) -> Vec<u8> {
    let encode = match (codec, format) {
        (Codec::Pcmu, SampleFormat::S16Le | SampleFormat::S16Be) => g711::mulaw::encode,
        (Codec::Pcma, SampleFormat::S16Le | SampleFormat::S16Be) => g711::alaw::encode,
        // device already delivers wire format
        _ => return data.to_vec(),
    };

    let mut samples = Vec::with_capacity(data.len() / 2);

    for pair in data.chunks_exact(2) {
        let sample = match format {
            SampleFormat::S16Be => i16::from_be_bytes([pair[0], pair[1]]),
            _ => i16::from_le_bytes([pair[0], pair[1]]),
        };
        samples.push(sample);
    }

    let mut out = Vec::new();
    g711::encode_slice(&samples, &mut out, encode);
    out
}

/// Convert received payload bytes into the sink's sample format
fn write_payload(codec: Codec, sink: &mut dyn AudioSink, payload: &[u8]) {
    let decode = match (codec, sink.format()) {
        (Codec::Pcmu, SampleFormat::S16Le | SampleFormat::S16Be) => {
            Some(g711::mulaw::decode as fn(u8) -> i16)
        }
        (Codec::Pcma, SampleFormat::S16Le | SampleFormat::S16Be) => {
            Some(g711::alaw::decode as fn(u8) -> i16)
        }
        _ => None,
    };

    let result = match decode {
        Some(decode) => {
            let mut samples = Vec::new();
            g711::decode_slice(payload, &mut samples, decode);

            let mut data = Vec::with_capacity(samples.len() * 2);
            for sample in &samples {
                match sink.format() {
                    SampleFormat::S16Be => data.extend_from_slice(&sample.to_be_bytes()),
                    _ => data.extend_from_slice(&sample.to_le_bytes()),
                }
            }

            sink.write_audio(&data, samples.len())
        }
        None => sink.write_audio(payload, payload.len()),
    };

    if let Err(e) = result {
        log::debug!("audio sink write failed, {e}");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    struct ToneSource;

    impl AudioSource for ToneSource {
        fn format(&self) -> SampleFormat {
            SampleFormat::S16Le
        }

        fn read_audio(&mut self, buf: &mut [u8], samples: usize) -> io::Result<usize> {
            buf[..samples * 2].fill(0x11);
            Ok(samples)
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink(Arc<Mutex<Vec<u8>>>);

    impl AudioSink for CollectingSink {
        fn format(&self) -> SampleFormat {
            SampleFormat::S16Le
        }

        fn write_audio(&mut self, data: &[u8], samples: usize) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(samples)
        }
    }

    fn stream_with_devices() -> (AudioStream, CollectingSink, CollectingSink) {
        let playback = CollectingSink::default();
        let record = CollectingSink::default();

        let mut config = AudioConfig::new(Codec::Pcma);
        config.capture = Some(Box::new(ToneSource));
        config.playback = Some(Box::new(playback.clone()));
        config.record = Some(Box::new(record.clone()));

        (AudioStream::new(config), playback, record)
    }

    #[test]
    fn capture_produces_g711_frames() {
        let (mut stream, _, _) = stream_with_devices();
        let now = Instant::now();

        let packets = stream.pump_capture(now);
        assert_eq!(packets.len(), 1);

        // 20ms at 8kHz mono, encoded to one byte per sample, plus the
        // 12 byte RTP header
        assert_eq!(packets[0].len(), 160 + 12);

        // no new frame is due yet
        assert!(stream.pump_capture(now).is_empty());

        // two more frames after 40ms
        let later = now + Duration::from_millis(40);
        assert_eq!(stream.pump_capture(later).len(), 2);
    }

    #[test]
    fn timestamps_advance_by_frame_duration() {
        let (mut stream, _, _) = stream_with_devices();
        let now = Instant::now();

        let first = stream.pump_capture(now);
        let second = stream.pump_capture(now + Duration::from_millis(20));

        let first = RtpPacket::parse(first[0].clone()).unwrap();
        let second = RtpPacket::parse(second[0].clone()).unwrap();

        assert_eq!(
            second.timestamp.0.wrapping_sub(first.timestamp.0),
            160,
            "8000 Hz * 20ms"
        );
        assert_eq!(
            second.sequence_number.0.wrapping_sub(first.sequence_number.0),
            1
        );
    }

    #[test]
    fn playout_feeds_playback_and_record() {
        let (mut stream, playback, record) = stream_with_devices();
        let now = Instant::now();

        let packet = RtpPacket {
            pt: 8,
            sequence_number: rtp::SequenceNumber(1),
            ssrc: Ssrc(99),
            timestamp: RtpTimestamp(8000),
            payload: Bytes::from_static(&[0xD5; 160]),
        };

        stream.session.recv_rtp(now, packet);

        stream.pump_playout(now + Duration::from_millis(100), Duration::from_millis(50));

        // G.711 decoded to 16 bit samples
        assert_eq!(playback.0.lock().unwrap().len(), 320);
        assert_eq!(record.0.lock().unwrap().len(), 320);
    }
}
