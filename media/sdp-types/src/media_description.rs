use crate::attributes::{
    Direction, Fmtp, IceCandidate, IcePassword, IceUsernameFragment, Rtcp, RtpMap,
    UnknownAttribute,
};
use crate::connection::Connection;
use crate::media::Media;
use std::fmt;

/// A single media section of a [`SessionDescription`](crate::SessionDescription),
/// the `m=` line and everything up to the next one
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub media: Media,

    /// Media-level connection line, overrides the session-level one
    pub connection: Option<Connection>,

    pub direction: Direction,

    /// rtcp attribute
    pub rtcp: Option<Rtcp>,

    /// rtcp-mux attribute
    pub rtcp_mux: bool,

    /// RTP payload mappings
    pub rtpmap: Vec<RtpMap>,

    /// RTP encoding parameters
    pub fmtp: Vec<Fmtp>,

    /// ICE username fragment
    pub ice_ufrag: Option<IceUsernameFragment>,

    /// ICE password
    pub ice_pwd: Option<IcePassword>,

    /// ICE candidates
    pub ice_candidates: Vec<IceCandidate>,

    /// ICE a=end-of-candidates attribute
    pub ice_end_of_candidates: bool,

    /// All remaining, unmodelled attributes
    pub attributes: Vec<UnknownAttribute>,
}

impl MediaDescription {
    pub fn new(media: Media, direction: Direction) -> Self {
        MediaDescription {
            media,
            connection: None,
            direction,
            rtcp: None,
            rtcp_mux: false,
            rtpmap: vec![],
            fmtp: vec![],
            ice_ufrag: None,
            ice_pwd: None,
            ice_candidates: vec![],
            ice_end_of_candidates: false,
            attributes: vec![],
        }
    }

    /// Media description which signals rejected media (port zero)
    pub fn rejected(media: Media) -> Self {
        let mut media = media;
        media.port = 0;

        let mut desc = Self::new(media, Direction::Inactive);
        desc.rtcp_mux = false;
        desc
    }
}

impl fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={}\r\n", self.media)?;

        if let Some(conn) = &self.connection {
            write!(f, "c={conn}\r\n")?;
        }

        write!(f, "a={}\r\n", self.direction)?;

        if let Some(rtcp) = &self.rtcp {
            write!(f, "a=rtcp:{rtcp}\r\n")?;
        }

        if self.rtcp_mux {
            write!(f, "a=rtcp-mux\r\n")?;
        }

        for rtpmap in &self.rtpmap {
            write!(f, "a=rtpmap:{rtpmap}\r\n")?;
        }

        for fmtp in &self.fmtp {
            write!(f, "a=fmtp:{fmtp}\r\n")?;
        }

        if let Some(ufrag) = &self.ice_ufrag {
            write!(f, "a=ice-ufrag:{}\r\n", ufrag.ufrag)?;
        }

        if let Some(pwd) = &self.ice_pwd {
            write!(f, "a=ice-pwd:{}\r\n", pwd.pwd)?;
        }

        for candidate in &self.ice_candidates {
            write!(f, "a=candidate:{candidate}\r\n")?;
        }

        if self.ice_end_of_candidates {
            write!(f, "a=end-of-candidates\r\n")?;
        }

        for attr in &self.attributes {
            write!(f, "{attr}\r\n")?;
        }

        Ok(())
    }
}
