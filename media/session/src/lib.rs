//! Media session coordinator.
//!
//! One [`MediaSession`] owns an ICE agent, the RTP/RTCP sockets and up to
//! two RTP streams (audio, video). It gathers candidates, produces and
//! consumes SDP, runs ICE connectivity checks and pumps frames between the
//! attached devices and the network.
//!
//! Everything happens on the caller's thread: the owner drives the session
//! with [`run`](MediaSession::run) and drains [`pop_event`](MediaSession::pop_event).

use ice::{
    Component, ConnectionState, GatheringState, IceAgent, IceCredentials, IceEvent, ReceivedPkt,
};
use rtp::RtpStats;
use sdp_types::{Direction, MediaType, SessionDescription};
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use transport::{Endpoint as _, PacketKind, TransportConfig, UdpEndpoint};

mod audio;
mod config;
mod device;
mod sdp;
mod video;

use audio::AudioStream;
use video::VideoStream;

pub use config::{AudioConfig, MediaSessionConfig, VideoConfig};
pub use device::{AudioSink, AudioSource, SampleFormat, VideoFormat, VideoSink, VideoSource};

/// How long candidate gathering may take before the session continues with
/// what it has
const GATHER_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum MediaSessionError {
    #[error("operation invalid in state {0:?}")]
    InvalidState(MediaSessionState),
    #[error("no media configured")]
    NoMedia,
    #[error("remote description is missing ICE credentials")]
    NoRemoteCredentials,
    #[error("failed to parse remote session description: {0}")]
    InvalidRemoteSdp(#[from] sdp_types::ParseSessionDescriptionError),
    #[error("connectivity failure")]
    IceFailed,
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}

/// Lifecycle of a media session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSessionState {
    Idle,
    Gathering,
    Gathered,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl MediaSessionState {
    /// States in which the local description exists
    fn has_local_sdp(self) -> bool {
        matches!(
            self,
            MediaSessionState::Gathered
                | MediaSessionState::Connecting
                | MediaSessionState::Connected
                | MediaSessionState::Disconnected
        )
    }
}

#[derive(Debug)]
pub enum MediaSessionEvent {
    StateChanged {
        old: MediaSessionState,
        new: MediaSessionState,
    },
    /// The local description is complete and can be put into signaling
    SdpReady(Box<SessionDescription>),
    /// Trickle-ICE only: a candidate became available while gathering
    NewCandidate(sdp_types::IceCandidate),
    /// ICE nominated a pair, media is flowing
    Connected,
    Disconnected,
    Error(MediaSessionError),
}

pub struct MediaSession {
    state: MediaSessionState,
    controlling: bool,

    stun_host: Option<String>,
    stun_port: u16,
    turn_host: Option<String>,
    trickle_ice: bool,
    direction: Direction,
    enable_rtcp: bool,
    rtcp_mux: bool,
    jitter: Duration,

    audio_config: Option<AudioConfig>,
    video_config: Option<VideoConfig>,

    ice: Option<IceAgent>,
    rtp_socket: Option<UdpEndpoint>,
    rtcp_socket: Option<UdpEndpoint>,
    local_ip: IpAddr,

    audio: Option<AudioStream>,
    video: Option<VideoStream>,

    session_id: u64,
    local_sdp: Option<SessionDescription>,
    remote_sdp: Option<SessionDescription>,
    remote: Option<sdp::RemoteMedia>,

    gather_deadline: Option<Instant>,
    emitted_candidates: Vec<(SocketAddr, u32)>,

    events: VecDeque<MediaSessionEvent>,
}

impl MediaSession {
    /// Create a session in `idle`. `controlling` is true for the offering
    /// side of the call.
    pub fn new(config: MediaSessionConfig, controlling: bool) -> Self {
        Self {
            state: MediaSessionState::Idle,
            controlling,
            stun_host: config.stun_host,
            stun_port: config.stun_port,
            turn_host: config.turn_host,
            trickle_ice: config.trickle_ice,
            direction: config.direction,
            enable_rtcp: config.enable_rtcp,
            rtcp_mux: config.rtcp_mux,
            jitter: Duration::from_millis(u64::from(config.jitter_buffer_ms)),
            audio_config: config.audio,
            video_config: config.video,
            ice: None,
            rtp_socket: None,
            rtcp_socket: None,
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            audio: None,
            video: None,
            session_id: rand::random::<u32>() as u64,
            local_sdp: None,
            remote_sdp: None,
            remote: None,
            gather_deadline: None,
            emitted_candidates: vec![],
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> MediaSessionState {
        self.state
    }

    /// The local description; only available once gathering finished
    pub fn local_sdp(&self) -> Option<&SessionDescription> {
        if self.state.has_local_sdp() {
            self.local_sdp.as_ref()
        } else {
            None
        }
    }

    pub fn remote_sdp(&self) -> Option<&SessionDescription> {
        self.remote_sdp.as_ref()
    }

    pub fn audio_stats(&self) -> Option<RtpStats> {
        self.audio.as_ref().map(|a| a.stats())
    }

    pub fn video_stats(&self) -> Option<RtpStats> {
        self.video.as_ref().map(|v| v.stats())
    }

    pub fn pop_event(&mut self) -> Option<MediaSessionEvent> {
        self.events.pop_front()
    }

    /// Attach or replace the audio capture device
    pub fn attach_audio_capture(&mut self, capture: Box<dyn AudioSource>) {
        match (&mut self.audio, &mut self.audio_config) {
            (Some(stream), _) => stream.set_capture(capture),
            (None, Some(config)) => config.capture = Some(capture),
            (None, None) => log::warn!("no audio configured, dropping capture device"),
        }
    }

    /// Attach or replace the audio playback device
    pub fn attach_audio_playback(&mut self, playback: Box<dyn AudioSink>) {
        match (&mut self.audio, &mut self.audio_config) {
            (Some(stream), _) => stream.set_playback(playback),
            (None, Some(config)) => config.playback = Some(playback),
            (None, None) => log::warn!("no audio configured, dropping playback device"),
        }
    }

    /// Attach or replace the audio record sink
    pub fn attach_audio_record(&mut self, record: Box<dyn AudioSink>) {
        match (&mut self.audio, &mut self.audio_config) {
            (Some(stream), _) => stream.set_record(record),
            (None, Some(config)) => config.record = Some(record),
            (None, None) => log::warn!("no audio configured, dropping record device"),
        }
    }

    fn set_state(&mut self, new: MediaSessionState) {
        if self.state == new {
            return;
        }

        let old = self.state;
        self.state = new;
        self.events
            .push_back(MediaSessionEvent::StateChanged { old, new });
    }

    /// Bind the media sockets and start gathering candidates.
    ///
    /// Emits [`MediaSessionEvent::SdpReady`] when done (or when the
    /// gathering deadline passes, with whatever was found until then).
    pub fn gather_candidates(&mut self) -> Result<(), MediaSessionError> {
        if self.state != MediaSessionState::Idle {
            return Err(MediaSessionError::InvalidState(self.state));
        }

        if self.audio_config.is_none() && self.video_config.is_none() {
            return Err(MediaSessionError::NoMedia);
        }

        let now = Instant::now();

        self.local_ip = local_ip_address::local_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let mut rtp_socket = UdpEndpoint::new(nonblocking_udp());
        rtp_socket.open()?;
        let rtp_port = rtp_socket.local_addr().map(|a| a.port()).unwrap_or(0);

        // Without RTCP there is no second component to gather for
        let single_component = self.rtcp_mux || !self.enable_rtcp;

        let mut ice = IceAgent::new(IceCredentials::random(), self.controlling, single_component);

        ice.add_host_addr(Component::Rtp, SocketAddr::new(self.local_ip, rtp_port));

        if self.enable_rtcp && !self.rtcp_mux {
            let mut rtcp_socket = UdpEndpoint::new(nonblocking_udp());
            rtcp_socket.open()?;
            let rtcp_port = rtcp_socket.local_addr().map(|a| a.port()).unwrap_or(0);

            ice.add_host_addr(Component::Rtcp, SocketAddr::new(self.local_ip, rtcp_port));
            self.rtcp_socket = Some(rtcp_socket);
        }

        if let Some(stun_host) = &self.stun_host {
            match resolve(stun_host, self.stun_port) {
                Some(server) => ice.add_stun_server(server),
                None => log::warn!("failed to resolve STUN server {stun_host}"),
            }
        }

        if self.turn_host.is_some() {
            log::debug!("TURN is configured but relay gathering is not performed");
        }

        // RTP streams exist from here on, their SSRCs and payload types are
        // part of the offer
        if let Some(config) = self.audio_config.take() {
            let mut stream = AudioStream::new(config);

            if let Some(pt) = self.remote.as_ref().and_then(|r| r.audio_pt) {
                stream.set_remote_pt(pt);
            }

            self.audio = Some(stream);
        }

        if let Some(config) = self.video_config.take() {
            let mut stream = VideoStream::new(config);

            if let Some(pt) = self.remote.as_ref().and_then(|r| r.video_pt) {
                stream.set_remote_pt(pt);
            }

            self.video = Some(stream);
        }

        // remote description may already be known (incoming call)
        if let Some(remote) = &self.remote {
            if let Some(credentials) = &remote.credentials {
                ice.set_remote(credentials.clone(), &remote.candidates);
            }
        }

        self.rtp_socket = Some(rtp_socket);
        self.ice = Some(ice);
        self.gather_deadline = Some(now + GATHER_DEADLINE);

        self.set_state(MediaSessionState::Gathering);

        Ok(())
    }

    /// Take in the peer's session description.
    ///
    /// Valid until connectivity checks started; may be called before
    /// gathering (incoming call).
    pub fn set_remote_sdp(&mut self, raw: &str) -> Result<(), MediaSessionError> {
        if !matches!(
            self.state,
            MediaSessionState::Idle | MediaSessionState::Gathering | MediaSessionState::Gathered
        ) {
            return Err(MediaSessionError::InvalidState(self.state));
        }

        let parsed = SessionDescription::parse(&bytesstr::BytesStr::from(raw))?;
        let remote = sdp::digest_remote_sdp(&parsed);

        if let (Some(audio), Some(pt)) = (&mut self.audio, remote.audio_pt) {
            audio.set_remote_pt(pt);
        }

        if let (Some(video), Some(pt)) = (&mut self.video, remote.video_pt) {
            video.set_remote_pt(pt);
        }

        if let Some(ice) = &mut self.ice {
            if let Some(credentials) = &remote.credentials {
                ice.set_remote(credentials.clone(), &remote.candidates);
            }
        }

        self.remote_sdp = Some(parsed);
        self.remote = Some(remote);

        Ok(())
    }

    /// Begin connectivity checks across the candidate pairs
    pub fn start_ice(&mut self) -> Result<(), MediaSessionError> {
        if self.state != MediaSessionState::Gathered {
            return Err(MediaSessionError::InvalidState(self.state));
        }

        let has_credentials = self
            .remote
            .as_ref()
            .is_some_and(|r| r.credentials.is_some());

        if !has_credentials {
            return Err(MediaSessionError::NoRemoteCredentials);
        }

        let ice = self.ice.as_mut().expect("ice agent exists in Gathered");
        ice.start_checks(Instant::now());

        self.set_state(MediaSessionState::Connecting);

        Ok(())
    }

    /// Stop media flow; statistics remain readable
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            MediaSessionState::Disconnected | MediaSessionState::Closed
        ) {
            return;
        }

        self.gather_deadline = None;
        self.set_state(MediaSessionState::Disconnected);
    }

    /// Release sockets; terminal
    pub fn close(&mut self) {
        if let Some(socket) = &mut self.rtp_socket {
            socket.close();
        }

        if let Some(socket) = &mut self.rtcp_socket {
            socket.close();
        }

        self.set_state(MediaSessionState::Closed);
    }

    /// Pump the session: drain sockets, drive ICE and timers, move audio and
    /// video between devices and the network. Returns within `budget`.
    pub fn run(&mut self, budget: Duration) {
        let deadline = Instant::now() + budget;

        loop {
            let now = Instant::now();

            self.drain_sockets();
            self.poll(now);
            self.pump_media(now);

            let now = Instant::now();
            if now >= deadline {
                return;
            }

            std::thread::sleep(Duration::from_millis(1).min(deadline - now));
        }
    }

    /// Advance the session's state machines without touching devices
    pub fn poll(&mut self, now: Instant) {
        if matches!(
            self.state,
            MediaSessionState::Idle | MediaSessionState::Closed
        ) {
            return;
        }

        if let Some(ice) = &mut self.ice {
            ice.poll(now);
        }

        self.drain_ice_events();

        if self.state == MediaSessionState::Gathering {
            let ice_done = self
                .ice
                .as_ref()
                .is_some_and(|ice| ice.gathering_state() == GatheringState::Complete);

            let deadline_passed = self
                .gather_deadline
                .is_some_and(|deadline| now >= deadline);

            if ice_done || deadline_passed {
                if deadline_passed && !ice_done {
                    log::warn!("candidate gathering timed out, continuing best-effort");
                }

                self.finalize_gathering();
            }
        }
    }

    /// Duration until the session wants to be polled again
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        let mut timeout = self.ice.as_ref().and_then(|ice| ice.timeout(now));

        if let Some(deadline) = self.gather_deadline {
            let until = deadline.checked_duration_since(now).unwrap_or(Duration::ZERO);
            timeout = Some(timeout.map_or(until, |t| t.min(until)));
        }

        if self.state == MediaSessionState::Connected {
            for t in [
                self.audio.as_ref().and_then(|a| a.timeout(now)),
                self.video.as_ref().and_then(|v| v.timeout(now)),
            ]
            .into_iter()
            .flatten()
            {
                timeout = Some(timeout.map_or(t, |cur| cur.min(t)));
            }
        }

        timeout
    }

    fn drain_sockets(&mut self) {
        let rtp_local = self
            .rtp_socket
            .as_ref()
            .and_then(|s| s.local_addr())
            .map(|a| SocketAddr::new(self.local_ip, a.port()));

        let mut received: Vec<(ReceivedPkt, PacketKind)> = vec![];

        if let (Some(socket), Some(local)) = (&mut self.rtp_socket, rtp_local) {
            let _ = socket.run(Duration::ZERO, &mut |pkt| {
                let kind = PacketKind::identify(&pkt.data);
                received.push((
                    ReceivedPkt {
                        data: pkt.data,
                        source: pkt.source,
                        destination: local,
                        component: Component::Rtp,
                    },
                    kind,
                ));
            });
        }

        let rtcp_local = self
            .rtcp_socket
            .as_ref()
            .and_then(|s| s.local_addr())
            .map(|a| SocketAddr::new(self.local_ip, a.port()));

        if let (Some(socket), Some(local)) = (&mut self.rtcp_socket, rtcp_local) {
            let _ = socket.run(Duration::ZERO, &mut |pkt| {
                let kind = PacketKind::identify(&pkt.data);
                received.push((
                    ReceivedPkt {
                        data: pkt.data,
                        source: pkt.source,
                        destination: local,
                        component: Component::Rtcp,
                    },
                    kind,
                ));
            });
        }

        let now = Instant::now();

        for (pkt, kind) in received {
            match kind {
                PacketKind::Stun => {
                    if let Some(ice) = &mut self.ice {
                        ice.receive(pkt);
                    }
                }
                PacketKind::Rtp => match rtp::RtpPacket::parse(pkt.data) {
                    Ok(packet) => self.route_rtp(now, packet),
                    Err(e) => log::debug!("dropping malformed RTP packet, {e}"),
                },
                PacketKind::Rtcp => {
                    if let Some(audio) = &mut self.audio {
                        audio.session.recv_rtcp(&pkt.data);
                    }

                    if let Some(video) = &mut self.video {
                        video.session.recv_rtcp(&pkt.data);
                    }
                }
                _ => {
                    log::trace!("dropping unclassified datagram on media socket");
                }
            }
        }

        self.drain_ice_events();
    }

    fn route_rtp(&mut self, now: Instant, packet: rtp::RtpPacket) {
        if let Some(audio) = &mut self.audio {
            if audio.accepts_pt(packet.pt) {
                audio.session.recv_rtp(now, packet);
                return;
            }
        }

        if let Some(video) = &mut self.video {
            if video.accepts_pt(packet.pt) {
                video.session.recv_rtp(now, packet);
                return;
            }
        }

        log::debug!("dropping RTP packet with unexpected payload type {}", packet.pt);
    }

    fn drain_ice_events(&mut self) {
        let Some(ice) = &mut self.ice else {
            return;
        };

        let mut sends: Vec<(Component, Vec<u8>, SocketAddr)> = vec![];
        let mut connected = false;
        let mut failed = false;
        let mut disconnected = false;

        while let Some(event) = ice.pop_event() {
            match event {
                IceEvent::SendData {
                    component,
                    data,
                    target,
                } => sends.push((component, data, target)),
                IceEvent::ConnectionStateChanged { new, .. } => match new {
                    ConnectionState::Connected => connected = true,
                    ConnectionState::Failed => failed = true,
                    ConnectionState::Disconnected => disconnected = true,
                    _ => {}
                },
                IceEvent::NominatedPair {
                    component,
                    local,
                    remote,
                } => {
                    log::debug!("nominated {component:?} pair {local} -> {remote}");
                }
                IceEvent::GatheringStateChanged { .. } => {}
            }
        }

        // trickle: surface candidates discovered since the last drain
        if self.trickle_ice && self.state == MediaSessionState::Gathering {
            let candidates = self
                .ice
                .as_ref()
                .map(|ice| ice.sdp_candidates())
                .unwrap_or_default();

            for candidate in candidates {
                let key = (
                    candidate
                        .address
                        .ip()
                        .map(|ip| SocketAddr::new(ip, candidate.port))
                        .unwrap_or_else(|| SocketAddr::new(self.local_ip, candidate.port)),
                    candidate.component,
                );

                if !self.emitted_candidates.contains(&key) {
                    self.emitted_candidates.push(key);
                    self.events.push_back(MediaSessionEvent::NewCandidate(candidate));
                }
            }
        }

        for (component, data, target) in sends {
            self.send_on_component(component, &data, target);
        }

        if connected && self.state == MediaSessionState::Connecting {
            self.set_state(MediaSessionState::Connected);
            self.events.push_back(MediaSessionEvent::Connected);
        }

        if disconnected && self.state == MediaSessionState::Connected {
            self.set_state(MediaSessionState::Disconnected);
            self.events.push_back(MediaSessionEvent::Disconnected);
        }

        if failed
            && matches!(
                self.state,
                MediaSessionState::Connecting | MediaSessionState::Connected
            )
        {
            self.events
                .push_back(MediaSessionEvent::Error(MediaSessionError::IceFailed));
            self.set_state(MediaSessionState::Disconnected);
            self.events.push_back(MediaSessionEvent::Disconnected);
        }
    }

    fn send_on_component(&mut self, component: Component, data: &[u8], target: SocketAddr) {
        let socket = match component {
            Component::Rtp => self.rtp_socket.as_mut(),
            Component::Rtcp => self.rtcp_socket.as_mut().or(self.rtp_socket.as_mut()),
        };

        if let Some(socket) = socket {
            if let Err(e) = socket.send(data, Some(target)) {
                log::debug!("media send to {target} failed, {e}");
            }
        }
    }

    fn finalize_gathering(&mut self) {
        let Some(ice) = &self.ice else {
            return;
        };

        let candidates = ice.sdp_candidates();

        let rtp_addr = ice
            .default_addr(Component::Rtp)
            .unwrap_or(SocketAddr::new(self.local_ip, 0));

        let rtcp_port = if self.enable_rtcp && !self.rtcp_mux {
            ice.default_addr(Component::Rtcp).map(|a| a.port())
        } else {
            None
        };

        let mut media_lines = vec![];

        if let Some(audio) = &self.audio {
            media_lines.push(sdp::LocalMediaLine {
                media_type: MediaType::Audio,
                codec: audio.codec(),
                channels: audio.codec().channels(),
                addr: rtp_addr,
                rtcp_port,
                rtcp_mux: self.rtcp_mux,
            });
        }

        if let Some(video) = &self.video {
            media_lines.push(sdp::LocalMediaLine {
                media_type: MediaType::Video,
                codec: video.codec(),
                channels: None,
                addr: rtp_addr,
                rtcp_port,
                rtcp_mux: self.rtcp_mux,
            });
        }

        let local_sdp = sdp::build_local_sdp(
            self.session_id,
            1,
            rtp_addr.ip(),
            ice.credentials(),
            &candidates,
            &media_lines,
            self.direction,
        );

        self.gather_deadline = None;
        self.local_sdp = Some(local_sdp.clone());

        self.set_state(MediaSessionState::Gathered);
        self.events
            .push_back(MediaSessionEvent::SdpReady(Box::new(local_sdp)));
    }

    fn pump_media(&mut self, now: Instant) {
        if self.state != MediaSessionState::Connected {
            return;
        }

        let Some(ice) = &self.ice else {
            return;
        };

        let rtp_target = ice.nominated_addr(Component::Rtp).map(|(_, remote)| remote);
        let rtcp_target = if self.rtcp_mux || !self.enable_rtcp {
            rtp_target
        } else {
            ice.nominated_addr(Component::Rtcp)
                .map(|(_, remote)| remote)
                .or_else(|| rtp_target.map(|a| SocketAddr::new(a.ip(), a.port() + 1)))
        };

        let send_media = self.direction.send();
        let jitter = self.jitter;
        let enable_rtcp = self.enable_rtcp;

        let mut rtp_out: Vec<Vec<u8>> = vec![];
        let mut rtcp_out: Vec<Vec<u8>> = vec![];

        if let Some(audio) = &mut self.audio {
            if send_media {
                rtp_out.extend(audio.pump_capture(now));
            }

            audio.pump_playout(now, jitter);

            if enable_rtcp {
                if let Some(report) = audio.session.poll_rtcp(now) {
                    rtcp_out.push(report);
                }
            }
        }

        if let Some(video) = &mut self.video {
            if send_media {
                rtp_out.extend(video.pump_capture(now));
            }

            video.pump_playout(now, jitter);

            if enable_rtcp {
                if let Some(report) = video.session.poll_rtcp(now) {
                    rtcp_out.push(report);
                }
            }
        }

        if let Some(target) = rtp_target {
            for packet in rtp_out {
                self.send_on_component(Component::Rtp, &packet, target);
            }
        }

        if let Some(target) = rtcp_target {
            for report in rtcp_out {
                let component = if self.rtcp_socket.is_some() {
                    Component::Rtcp
                } else {
                    Component::Rtp
                };

                self.send_on_component(component, &report, target);
            }
        }
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn nonblocking_udp() -> TransportConfig {
    TransportConfig {
        nonblocking: true,
        ..TransportConfig::udp(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }
}

fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    use std::net::ToSocketAddrs;

    (host, port)
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4())
}

#[cfg(test)]
mod test {
    use super::*;
    use rtp::Codec;

    fn audio_session(controlling: bool) -> MediaSession {
        let config = MediaSessionConfig {
            audio: Some(AudioConfig::new(Codec::Pcma)),
            ..Default::default()
        };

        MediaSession::new(config, controlling)
    }

    fn gather_until_sdp(session: &mut MediaSession) -> SessionDescription {
        session.gather_candidates().unwrap();

        let deadline = Instant::now() + Duration::from_secs(6);

        loop {
            session.poll(Instant::now());

            while let Some(event) = session.pop_event() {
                if let MediaSessionEvent::SdpReady(sdp) = event {
                    return *sdp;
                }
            }

            assert!(Instant::now() < deadline, "gathering never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn no_media_is_rejected() {
        let mut session = MediaSession::new(MediaSessionConfig::default(), true);

        assert!(matches!(
            session.gather_candidates(),
            Err(MediaSessionError::NoMedia)
        ));
    }

    #[test]
    fn gathering_produces_sdp() {
        let mut session = audio_session(true);

        assert!(session.local_sdp().is_none());

        let sdp = gather_until_sdp(&mut session);

        assert_eq!(session.state(), MediaSessionState::Gathered);
        assert!(session.local_sdp().is_some());

        let audio = &sdp.media_descriptions[0];
        assert_eq!(audio.media.fmts, [8]);
        assert!(audio.ice_ufrag.is_some());
        assert!(audio.ice_pwd.is_some());
        assert!(!audio.ice_candidates.is_empty());
    }

    #[test]
    fn second_gather_is_invalid() {
        let mut session = audio_session(true);

        session.gather_candidates().unwrap();

        assert!(matches!(
            session.gather_candidates(),
            Err(MediaSessionError::InvalidState(MediaSessionState::Gathering))
        ));
    }

    #[test]
    fn start_ice_requires_remote_description() {
        let mut session = audio_session(true);
        gather_until_sdp(&mut session);

        assert!(matches!(
            session.start_ice(),
            Err(MediaSessionError::NoRemoteCredentials)
        ));
    }

    #[test]
    fn start_ice_requires_gathered() {
        let mut session = audio_session(true);

        assert!(matches!(
            session.start_ice(),
            Err(MediaSessionError::InvalidState(MediaSessionState::Idle))
        ));
    }

    /// Full loopback call: two sessions exchange SDP and connect through
    /// real UDP sockets on localhost
    #[test]
    fn two_sessions_connect() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut caller = audio_session(true);
        let mut callee = audio_session(false);

        let offer = gather_until_sdp(&mut caller).to_string();
        callee.set_remote_sdp(&offer).unwrap();

        let answer = gather_until_sdp(&mut callee).to_string();
        caller.set_remote_sdp(&answer).unwrap();

        caller.start_ice().unwrap();
        callee.start_ice().unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);

        while caller.state() != MediaSessionState::Connected
            || callee.state() != MediaSessionState::Connected
        {
            caller.run(Duration::from_millis(5));
            callee.run(Duration::from_millis(5));

            while caller.pop_event().is_some() {}
            while callee.pop_event().is_some() {}

            assert!(Instant::now() < deadline, "sessions never connected");
        }

        assert!(caller.audio_stats().is_some());
    }

    #[test]
    fn stop_is_observable_and_stats_remain() {
        let mut session = audio_session(true);
        gather_until_sdp(&mut session);

        session.stop();

        assert_eq!(session.state(), MediaSessionState::Disconnected);
        assert!(session.audio_stats().is_some());

        // the local sdp stays readable in disconnected
        assert!(session.local_sdp().is_some());
    }
}
