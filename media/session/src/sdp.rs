//! Local SDP construction and remote SDP digestion

use bytesstr::BytesStr;
use ice::IceCredentials;
use rtp::Codec;
use sdp_types::{
    Connection, Direction, IceCandidate, IcePassword, IceUsernameFragment, Media,
    MediaDescription, MediaType, Origin, Rtcp, RtpMap, SessionDescription, TaggedAddress, Time,
    TransportProtocol, UntaggedAddress,
};
use std::net::{IpAddr, SocketAddr};

pub(crate) struct LocalMediaLine {
    pub(crate) media_type: MediaType,
    pub(crate) codec: Codec,
    pub(crate) channels: Option<u32>,
    /// Default candidate address for the m= line
    pub(crate) addr: SocketAddr,
    pub(crate) rtcp_port: Option<u16>,
    pub(crate) rtcp_mux: bool,
}

/// Assemble the session description advertised to the peer
pub(crate) fn build_local_sdp(
    session_id: u64,
    session_version: u64,
    default_ip: IpAddr,
    credentials: &IceCredentials,
    candidates: &[IceCandidate],
    media_lines: &[LocalMediaLine],
    direction: Direction,
) -> SessionDescription {
    let media_descriptions = media_lines
        .iter()
        .map(|line| {
            let mut desc = MediaDescription::new(
                Media {
                    media_type: line.media_type.clone(),
                    port: line.addr.port(),
                    ports_num: None,
                    proto: TransportProtocol::RtpAvp,
                    fmts: vec![line.codec.pt()],
                },
                direction,
            );

            desc.rtpmap.push(RtpMap {
                payload: line.codec.pt(),
                encoding: BytesStr::from_static(line.codec.encoding_name()),
                clock_rate: line.codec.clock_rate(),
                params: line.channels.filter(|&c| c > 1),
            });

            desc.rtcp = line.rtcp_port.map(|port| Rtcp {
                port,
                address: None,
            });
            desc.rtcp_mux = line.rtcp_mux;

            desc.ice_ufrag = Some(IceUsernameFragment {
                ufrag: BytesStr::from(credentials.ufrag.as_str()),
            });
            desc.ice_pwd = Some(IcePassword {
                pwd: BytesStr::from(credentials.pwd.as_str()),
            });

            desc.ice_candidates = candidates.to_vec();

            desc
        })
        .collect();

    SessionDescription {
        origin: Origin {
            username: BytesStr::from_static("-"),
            session_id,
            session_version,
            address: TaggedAddress::from(default_ip),
        },
        name: BytesStr::from_static("-"),
        connection: Some(Connection {
            address: TaggedAddress::from(default_ip),
        }),
        time: Time { start: 0, stop: 0 },
        direction: Direction::SendRecv,
        ice_ufrag: None,
        ice_pwd: None,
        attributes: vec![],
        media_descriptions,
    }
}

/// Everything the session needs out of a remote description
pub(crate) struct RemoteMedia {
    pub(crate) credentials: Option<IceCredentials>,
    pub(crate) candidates: Vec<IceCandidate>,
    /// Negotiated payload type of the first audio media
    pub(crate) audio_pt: Option<u8>,
    pub(crate) video_pt: Option<u8>,
    pub(crate) direction: Direction,
}

pub(crate) fn digest_remote_sdp(sdp: &SessionDescription) -> RemoteMedia {
    let mut candidates = vec![];
    let mut ufrag = sdp.ice_ufrag.as_ref().map(|u| u.ufrag.to_string());
    let mut pwd = sdp.ice_pwd.as_ref().map(|p| p.pwd.to_string());

    let mut audio_pt = None;
    let mut video_pt = None;
    let mut direction = sdp.direction;

    let session_connection = sdp.connection.as_ref();

    for desc in &sdp.media_descriptions {
        if desc.media.port == 0 {
            // rejected media
            continue;
        }

        if let Some(media_ufrag) = &desc.ice_ufrag {
            ufrag.get_or_insert_with(|| media_ufrag.ufrag.to_string());
        }

        if let Some(media_pwd) = &desc.ice_pwd {
            pwd.get_or_insert_with(|| media_pwd.pwd.to_string());
        }

        match desc.media.media_type {
            MediaType::Audio if audio_pt.is_none() => {
                audio_pt = desc.media.fmts.first().copied();
                direction = desc.direction;
            }
            MediaType::Video if video_pt.is_none() => {
                video_pt = desc.media.fmts.first().copied();
            }
            _ => {}
        }

        if desc.ice_candidates.is_empty() {
            // ICE credentials without candidate lines: derive a host
            // candidate from the connection address
            let connection = desc.connection.as_ref().or(session_connection);

            if let Some(ip) = connection.and_then(|c| c.address.ip()) {
                candidates.push(synthesized_candidate(ip, desc.media.port, 1));

                let rtcp_port = desc
                    .rtcp
                    .as_ref()
                    .map(|r| r.port)
                    .unwrap_or(desc.media.port + 1);

                if !desc.rtcp_mux {
                    candidates.push(synthesized_candidate(ip, rtcp_port, 2));
                }
            }
        } else {
            candidates.extend(desc.ice_candidates.iter().cloned());
        }
    }

    let credentials = match (ufrag, pwd) {
        (Some(ufrag), Some(pwd)) => Some(IceCredentials { ufrag, pwd }),
        _ => None,
    };

    RemoteMedia {
        credentials,
        candidates,
        audio_pt,
        video_pt,
        direction,
    }
}

fn synthesized_candidate(ip: IpAddr, port: u16, component: u32) -> IceCandidate {
    IceCandidate {
        foundation: BytesStr::from_static("1"),
        component,
        transport: BytesStr::from_static("UDP"),
        priority: 2130706431,
        address: UntaggedAddress::IpAddress(ip),
        port,
        typ: BytesStr::from_static("host"),
        rel_addr: None,
        rel_port: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// The generated offer must carry the documented line set
    #[test]
    fn offer_shape() {
        let credentials = IceCredentials {
            ufrag: "abcd".into(),
            pwd: "12345678".into(),
        };

        let candidates = vec![IceCandidate {
            foundation: BytesStr::from_static("1"),
            component: 1,
            transport: BytesStr::from_static("UDP"),
            priority: 2130706431,
            address: UntaggedAddress::IpAddress("192.0.2.1".parse().unwrap()),
            port: 20000,
            typ: BytesStr::from_static("host"),
            rel_addr: None,
            rel_port: None,
        }];

        let media_lines = [LocalMediaLine {
            media_type: MediaType::Audio,
            codec: Codec::Pcma,
            channels: Some(1),
            addr: "192.0.2.1:20000".parse().unwrap(),
            rtcp_port: Some(20001),
            rtcp_mux: false,
        }];

        let sdp = build_local_sdp(
            4711,
            1,
            "192.0.2.1".parse().unwrap(),
            &credentials,
            &candidates,
            &media_lines,
            Direction::SendRecv,
        );

        let printed = sdp.to_string();

        assert!(printed.contains("v=0\r\n"));
        assert!(printed.contains("o=- 4711 1 IN IP4 192.0.2.1\r\n"));
        assert!(printed.contains("c=IN IP4 192.0.2.1\r\n"));
        assert!(printed.contains("t=0 0\r\n"));
        assert!(printed.contains("m=audio 20000 RTP/AVP 8\r\n"));
        assert!(printed.contains("a=rtpmap:8 PCMA/8000\r\n"));
        assert!(printed.contains("a=ice-ufrag:abcd\r\n"));
        assert!(printed.contains("a=ice-pwd:12345678\r\n"));
        assert!(printed
            .contains("a=candidate:1 1 UDP 2130706431 192.0.2.1 20000 typ host\r\n"));
    }

    #[test]
    fn remote_without_candidates_is_synthesized() {
        let raw = "v=0\r\n\
            o=- 1 1 IN IP4 198.51.100.7\r\n\
            s=-\r\n\
            c=IN IP4 198.51.100.7\r\n\
            t=0 0\r\n\
            m=audio 7000 RTP/AVP 8\r\n\
            a=rtpmap:8 PCMA/8000\r\n\
            a=ice-ufrag:wxyz\r\n\
            a=ice-pwd:abcdefgh\r\n";

        let sdp = SessionDescription::parse(&BytesStr::from_static(raw)).unwrap();
        let remote = digest_remote_sdp(&sdp);

        assert_eq!(remote.audio_pt, Some(8));
        assert_eq!(remote.credentials.as_ref().unwrap().ufrag, "wxyz");

        // RTP and RTCP host candidates derived from the connection line
        assert_eq!(remote.candidates.len(), 2);
        assert_eq!(remote.candidates[0].port, 7000);
        assert_eq!(remote.candidates[1].port, 7001);
        assert_eq!(remote.candidates[1].component, 2);
    }
}
