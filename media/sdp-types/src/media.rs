use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res, opt};
use nom::error::context;
use nom::multi::many0;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::str::FromStr;

use crate::{not_whitespace, slash_num};

/// Media (`m=`) line
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.14)
#[derive(Debug, Clone)]
pub struct Media {
    pub media_type: MediaType,
    pub port: u16,
    pub ports_num: Option<u32>,
    pub proto: TransportProtocol,
    /// Payload type numbers offered for this media
    pub fmts: Vec<u8>,
}

impl Media {
    pub(crate) fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing media",
            map(
                tuple((
                    |i| MediaType::parse(src, i),
                    multispace1,
                    map_res(digit1, u16::from_str),
                    opt(slash_num),
                    multispace1,
                    |i| TransportProtocol::parse(src, i),
                    many0(preceded(multispace1, map_res(digit1, u8::from_str))),
                )),
                |(media_type, _, port, ports_num, _, proto, fmts)| Media {
                    media_type,
                    port,
                    ports_num,
                    proto,
                    fmts,
                },
            ),
        )(i)
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.media_type, self.port)?;

        if let Some(ports_num) = self.ports_num {
            write!(f, "/{ports_num}")?;
        }

        write!(f, " {}", self.proto)?;

        for fmt_ in &self.fmts {
            write!(f, " {fmt_}")?;
        }

        Ok(())
    }
}

/// Type of a media section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Application,
    Other(BytesStr),
}

impl MediaType {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(take_while1(not_whitespace), |slice| match slice {
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            "application" => MediaType::Application,
            _ => MediaType::Other(BytesStr::from_parse(src, slice)),
        })(i)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => f.write_str("audio"),
            MediaType::Video => f.write_str("video"),
            MediaType::Application => f.write_str("application"),
            MediaType::Other(other) => f.write_str(other),
        }
    }
}

/// Transport protocol of a media section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportProtocol {
    /// Plain RTP (`RTP/AVP`)
    RtpAvp,
    Other(BytesStr),
}

impl TransportProtocol {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(take_while1(not_whitespace), |slice| match slice {
            "RTP/AVP" => TransportProtocol::RtpAvp,
            _ => TransportProtocol::Other(BytesStr::from_parse(src, slice)),
        })(i)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::RtpAvp => f.write_str("RTP/AVP"),
            TransportProtocol::Other(other) => f.write_str(other),
        }
    }
}
