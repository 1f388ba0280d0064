use crate::attributes::{
    Direction, Fmtp, IceCandidate, IcePassword, IceUsernameFragment, Rtcp, RtpMap,
    UnknownAttribute,
};
use crate::connection::Connection;
use crate::media::Media;
use crate::media_description::MediaDescription;
use crate::origin::Origin;
use crate::parser::ParseSessionDescriptionError;
use crate::time::Time;
use bytesstr::BytesStr;
use std::fmt;

/// A parsed SDP session description
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5)
#[derive(Debug, Clone)]
pub struct SessionDescription {
    /// Origin (o=) line
    pub origin: Origin,

    /// Session name (s=) line
    pub name: BytesStr,

    /// Session-level connection (c=) line
    pub connection: Option<Connection>,

    /// Time (t=) line
    pub time: Time,

    /// Session-level direction attribute, default for all media
    pub direction: Direction,

    /// Session-level ICE credentials
    pub ice_ufrag: Option<IceUsernameFragment>,
    pub ice_pwd: Option<IcePassword>,

    /// Unmodelled session-level attributes
    pub attributes: Vec<UnknownAttribute>,

    /// All media sections
    pub media_descriptions: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn parse(src: &BytesStr) -> Result<Self, ParseSessionDescriptionError> {
        use ParseSessionDescriptionError::MissingLine;

        let bytes: &bytes::Bytes = src.as_ref();

        let mut origin = None;
        let mut name = None;
        let mut connection = None;
        let mut time = None;
        let mut direction = Direction::SendRecv;
        let mut ice_ufrag = None;
        let mut ice_pwd = None;
        let mut attributes = vec![];
        let mut media_descriptions: Vec<MediaDescription> = vec![];

        for line in src.lines() {
            let line = line.trim_end();

            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };

            // Everything after an m= line belongs to that media section
            let media = media_descriptions.last_mut();

            match (kind, media) {
                ("v", _) => {
                    if value.trim() != "0" {
                        return Err(ParseSessionDescriptionError::MissingLine("v=0"));
                    }
                }
                ("o", _) => {
                    let (_, parsed) = Origin::parse(bytes, value)
                        .map_err(ParseSessionDescriptionError::line("origin"))?;
                    origin = Some(parsed);
                }
                ("s", _) => name = Some(BytesStr::from_parse(bytes, value.trim())),
                ("t", _) => {
                    let (_, parsed) =
                        Time::parse(value).map_err(ParseSessionDescriptionError::line("time"))?;
                    time = Some(parsed);
                }
                ("c", media) => {
                    let (_, parsed) = Connection::parse(bytes, value)
                        .map_err(ParseSessionDescriptionError::line("connection"))?;

                    match media {
                        Some(media) => media.connection = Some(parsed),
                        None => connection = Some(parsed),
                    }
                }
                ("m", _) => {
                    let (_, parsed) = Media::parse(bytes, value)
                        .map_err(ParseSessionDescriptionError::line("media"))?;

                    media_descriptions.push(MediaDescription::new(parsed, direction));
                }
                ("a", media) => parse_attribute(
                    bytes,
                    value,
                    media,
                    &mut direction,
                    &mut ice_ufrag,
                    &mut ice_pwd,
                    &mut attributes,
                )?,
                _ => {
                    // unknown line kinds (b=, k=, r=, z=, ...) are ignored
                }
            }
        }

        Ok(SessionDescription {
            origin: origin.ok_or(MissingLine("o"))?,
            name: name.ok_or(MissingLine("s"))?,
            connection,
            time: time.ok_or(MissingLine("t"))?,
            direction,
            ice_ufrag,
            ice_pwd,
            attributes,
            media_descriptions,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_attribute(
    bytes: &bytes::Bytes,
    value: &str,
    media: Option<&mut MediaDescription>,
    session_direction: &mut Direction,
    session_ice_ufrag: &mut Option<IceUsernameFragment>,
    session_ice_pwd: &mut Option<IcePassword>,
    session_attributes: &mut Vec<UnknownAttribute>,
) -> Result<(), ParseSessionDescriptionError> {
    let (name, attr_value) = match value.split_once(':') {
        Some((name, value)) => (name, value),
        None => (value, ""),
    };

    if let Some(direction) = Direction::from_name(name) {
        match media {
            Some(media) => media.direction = direction,
            None => *session_direction = direction,
        }
        return Ok(());
    }

    match (name, media) {
        ("rtpmap", Some(media)) => {
            let (_, rtpmap) = RtpMap::parse(bytes, attr_value)
                .map_err(ParseSessionDescriptionError::line("rtpmap"))?;
            media.rtpmap.push(rtpmap);
        }
        ("fmtp", Some(media)) => {
            let (_, fmtp) = Fmtp::parse(bytes, attr_value)
                .map_err(ParseSessionDescriptionError::line("fmtp"))?;
            media.fmtp.push(fmtp);
        }
        ("rtcp", Some(media)) => {
            let (_, rtcp) = Rtcp::parse(bytes, attr_value)
                .map_err(ParseSessionDescriptionError::line("rtcp"))?;
            media.rtcp = Some(rtcp);
        }
        ("rtcp-mux", Some(media)) => media.rtcp_mux = true,
        ("candidate", Some(media)) => {
            let (_, candidate) = IceCandidate::parse(bytes, attr_value)
                .map_err(ParseSessionDescriptionError::line("candidate"))?;
            media.ice_candidates.push(candidate);
        }
        ("end-of-candidates", Some(media)) => media.ice_end_of_candidates = true,
        ("ice-ufrag", media) => {
            let parsed = IceUsernameFragment::parse(bytes, attr_value);
            match media {
                Some(media) => media.ice_ufrag = Some(parsed),
                None => *session_ice_ufrag = Some(parsed),
            }
        }
        ("ice-pwd", media) => {
            let parsed = IcePassword::parse(bytes, attr_value);
            match media {
                Some(media) => media.ice_pwd = Some(parsed),
                None => *session_ice_pwd = Some(parsed),
            }
        }
        (_, media) => {
            let attr = UnknownAttribute::parse(bytes, value);
            match media {
                Some(media) => media.attributes.push(attr),
                None => session_attributes.push(attr),
            }
        }
    }

    Ok(())
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.name)?;

        if let Some(conn) = &self.connection {
            write!(f, "c={conn}\r\n")?;
        }

        write!(f, "t={}\r\n", self.time)?;

        if self.direction != Direction::SendRecv {
            write!(f, "a={}\r\n", self.direction)?;
        }

        if let Some(ufrag) = &self.ice_ufrag {
            write!(f, "a=ice-ufrag:{}\r\n", ufrag.ufrag)?;
        }

        if let Some(pwd) = &self.ice_pwd {
            write!(f, "a=ice-pwd:{}\r\n", pwd.pwd)?;
        }

        for attr in &self.attributes {
            write!(f, "{attr}\r\n")?;
        }

        for media in &self.media_descriptions {
            write!(f, "{media}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EXAMPLE: &str = "v=0\r\n\
        o=- 3724394400 3724394405 IN IP4 198.51.100.3\r\n\
        s=-\r\n\
        c=IN IP4 198.51.100.3\r\n\
        t=0 0\r\n\
        m=audio 6000 RTP/AVP 8 0\r\n\
        a=sendrecv\r\n\
        a=rtpmap:8 PCMA/8000\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=ice-ufrag:abcd\r\n\
        a=ice-pwd:1234567890abcdef\r\n\
        a=candidate:1 1 UDP 2130706431 198.51.100.3 6000 typ host\r\n\
        a=ptime:20\r\n";

    #[test]
    fn parse_example() {
        let sdp = SessionDescription::parse(&BytesStr::from_static(EXAMPLE)).unwrap();

        assert_eq!(sdp.origin.session_id, 3724394400);
        assert_eq!(sdp.name, "-");
        assert_eq!(
            sdp.connection.as_ref().unwrap().address.ip().unwrap(),
            "198.51.100.3".parse::<std::net::IpAddr>().unwrap()
        );

        let audio = &sdp.media_descriptions[0];
        assert_eq!(audio.media.port, 6000);
        assert_eq!(audio.media.fmts, [8, 0]);
        assert_eq!(audio.direction, Direction::SendRecv);
        assert_eq!(audio.rtpmap.len(), 2);
        assert_eq!(audio.ice_ufrag.as_ref().unwrap().ufrag, "abcd");
        assert_eq!(audio.ice_pwd.as_ref().unwrap().pwd, "1234567890abcdef");
        assert_eq!(audio.ice_candidates.len(), 1);

        // ptime is not modelled but must survive as unknown attribute
        assert!(audio.attributes.iter().any(|a| a.name == "ptime"));
    }

    #[test]
    fn print_round_trip() {
        let sdp = SessionDescription::parse(&BytesStr::from_static(EXAMPLE)).unwrap();

        let printed = sdp.to_string();
        let reparsed = SessionDescription::parse(&BytesStr::from(printed)).unwrap();

        assert_eq!(reparsed.media_descriptions.len(), 1);
        assert_eq!(reparsed.media_descriptions[0].rtpmap.len(), 2);
        assert_eq!(reparsed.media_descriptions[0].ice_candidates.len(), 1);
    }

    #[test]
    fn missing_origin() {
        let result = SessionDescription::parse(&BytesStr::from_static("v=0\r\ns=-\r\nt=0 0\r\n"));
        assert!(matches!(
            result,
            Err(ParseSessionDescriptionError::MissingLine("o"))
        ));
    }
}
