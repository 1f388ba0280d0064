use media_session::{
    AudioConfig, AudioSink, AudioSource, MediaSessionConfig, VideoConfig, VideoSink, VideoSource,
};
use rtp::Codec;
use sdp_types::Direction;
use std::net::{IpAddr, Ipv4Addr};

/// Configuration of an [`Agent`](crate::Agent)
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub username: String,
    pub password: String,
    /// Display name presented to peers
    pub display_name: Option<String>,
    /// SIP domain of the account; defaults to the registrar host
    pub domain: Option<String>,

    pub registrar_host: String,
    pub registrar_port: u16,

    /// Register when the agent starts and keep the binding refreshed
    pub auto_register: bool,
    pub register_expires: u32,

    pub user_agent: String,

    /// Local address of the signaling socket; port 0 picks an ephemeral one
    pub bind_addr: IpAddr,
    pub bind_port: u16,

    /// Incoming calls beyond this are answered 486 without surfacing
    pub max_dialogs: usize,

    pub media: MediaDefaults,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            display_name: None,
            domain: None,
            registrar_host: String::new(),
            registrar_port: 5060,
            auto_register: true,
            register_expires: 3600,
            user_agent: concat!("sipkit/", env!("CARGO_PKG_VERSION")).to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 0,
            max_dialogs: 4,
            media: MediaDefaults::default(),
        }
    }
}

/// Media parameters applied to every call's media session.
///
/// Devices are per call, see [`CallDevices`].
#[derive(Debug, Clone)]
pub struct MediaDefaults {
    pub stun_host: Option<String>,
    pub stun_port: u16,
    pub turn_host: Option<String>,
    pub turn_port: u16,
    pub turn_user: Option<String>,
    pub turn_pass: Option<String>,
    pub trickle_ice: bool,

    pub enable_audio: bool,
    pub audio_codec: Codec,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,

    pub enable_video: bool,
    pub video_codec: Codec,
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,

    pub direction: Direction,
    pub enable_rtcp: bool,
    pub rtcp_mux: bool,
    pub jitter_buffer_ms: u32,
}

impl Default for MediaDefaults {
    fn default() -> Self {
        Self {
            stun_host: None,
            stun_port: 3478,
            turn_host: None,
            turn_port: 3478,
            turn_user: None,
            turn_pass: None,
            trickle_ice: false,
            enable_audio: true,
            audio_codec: Codec::Pcmu,
            audio_sample_rate: 8000,
            audio_channels: 1,
            enable_video: false,
            video_codec: Codec::H264,
            video_width: 640,
            video_height: 480,
            video_fps: 30,
            direction: Direction::SendRecv,
            enable_rtcp: true,
            rtcp_mux: false,
            jitter_buffer_ms: 50,
        }
    }
}

impl MediaDefaults {
    /// Instantiate the per-call media session configuration
    pub(crate) fn session_config(&self, devices: CallDevices) -> MediaSessionConfig {
        let audio = self.enable_audio.then(|| {
            let mut audio = AudioConfig::new(self.audio_codec);
            audio.sample_rate = self.audio_sample_rate;
            audio.channels = self.audio_channels;
            audio.capture = devices.audio_capture;
            audio.playback = devices.audio_playback;
            audio.record = devices.audio_record;
            audio
        });

        let video = self.enable_video.then(|| {
            let mut video = VideoConfig::new(self.video_codec);
            video.width = self.video_width;
            video.height = self.video_height;
            video.fps = self.video_fps;
            video.capture = devices.video_capture;
            video.display = devices.video_display;
            video
        });

        MediaSessionConfig {
            stun_host: self.stun_host.clone(),
            stun_port: self.stun_port,
            turn_host: self.turn_host.clone(),
            turn_port: self.turn_port,
            turn_user: self.turn_user.clone(),
            turn_pass: self.turn_pass.clone(),
            trickle_ice: self.trickle_ice,
            audio,
            video,
            direction: self.direction,
            enable_rtcp: self.enable_rtcp,
            rtcp_mux: self.rtcp_mux,
            jitter_buffer_ms: self.jitter_buffer_ms,
        }
    }
}

/// Devices wired into one call's media session.
///
/// The default has no devices: media still negotiates and flows statistics,
/// frames are just not produced or consumed.
#[derive(Default)]
pub struct CallDevices {
    pub audio_capture: Option<Box<dyn AudioSource>>,
    pub audio_playback: Option<Box<dyn AudioSink>>,
    pub audio_record: Option<Box<dyn AudioSink>>,
    pub video_capture: Option<Box<dyn VideoSource>>,
    pub video_display: Option<Box<dyn VideoSink>>,
}
