use crate::device::{AudioSink, AudioSource, VideoSink, VideoSource};
use rtp::Codec;
use sdp_types::Direction;

/// Configuration of a [`MediaSession`](crate::MediaSession).
///
/// Devices are trait objects moved into the session; everything else is
/// plain data.
pub struct MediaSessionConfig {
    /// STUN server used to gather server-reflexive candidates
    pub stun_host: Option<String>,
    pub stun_port: u16,

    /// TURN configuration is accepted but relay gathering is delegated out
    /// of this stack; candidates stay host/server-reflexive
    pub turn_host: Option<String>,
    pub turn_port: u16,
    pub turn_user: Option<String>,
    pub turn_pass: Option<String>,

    /// Emit candidates one by one while gathering instead of only the final
    /// SDP
    pub trickle_ice: bool,

    pub audio: Option<AudioConfig>,
    pub video: Option<VideoConfig>,

    pub direction: Direction,

    pub enable_rtcp: bool,
    /// Run RTCP over the RTP socket instead of its own component
    pub rtcp_mux: bool,

    /// Jitter buffer hold-back for received audio/video
    pub jitter_buffer_ms: u32,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            stun_host: None,
            stun_port: 3478,
            turn_host: None,
            turn_port: 3478,
            turn_user: None,
            turn_pass: None,
            trickle_ice: false,
            audio: None,
            video: None,
            direction: Direction::SendRecv,
            enable_rtcp: true,
            rtcp_mux: false,
            jitter_buffer_ms: 50,
        }
    }
}

pub struct AudioConfig {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u32,
    /// Packetization interval
    pub frame_ms: u32,

    pub capture: Option<Box<dyn AudioSource>>,
    pub playback: Option<Box<dyn AudioSink>>,
    /// Extra sink fed with everything that is delivered to playback
    pub record: Option<Box<dyn AudioSink>>,
}

impl AudioConfig {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            sample_rate: 8000,
            channels: 1,
            frame_ms: 20,
            capture: None,
            playback: None,
            record: None,
        }
    }
}

pub struct VideoConfig {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    pub capture: Option<Box<dyn VideoSource>>,
    pub display: Option<Box<dyn VideoSink>>,
}

impl VideoConfig {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            width: 640,
            height: 480,
            fps: 30,
            capture: None,
            display: None,
        }
    }
}
