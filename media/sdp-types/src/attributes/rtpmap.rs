use crate::slash_num;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res, opt};
use nom::error::context;
use nom::sequence::tuple;
use std::fmt;
use std::str::FromStr;

/// Rtpmap attribute (`a=rtpmap`)
///
/// Maps an RTP payload number of the media description to an encoding.
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-6.6)
#[derive(Debug, Clone)]
pub struct RtpMap {
    pub payload: u8,
    pub encoding: BytesStr,
    pub clock_rate: u32,
    /// Encoding parameters, for audio the channel count
    pub params: Option<u32>,
}

impl RtpMap {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing rtpmap",
            map(
                tuple((
                    map_res(digit1, u8::from_str),
                    multispace1,
                    map(take_while1(|c| c != '/'), |slice| {
                        BytesStr::from_parse(src, slice)
                    }),
                    slash_num,
                    opt(slash_num),
                )),
                |(payload, _, encoding, clock_rate, params)| RtpMap {
                    payload,
                    encoding,
                    clock_rate,
                    params,
                },
            ),
        )(i)
    }
}

impl fmt::Display for RtpMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.payload, self.encoding, self.clock_rate)?;

        if let Some(params) = self.params {
            write!(f, "/{params}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rtpmap() {
        let input = BytesStr::from_static("8 PCMA/8000");

        let (rem, rtpmap) = RtpMap::parse(input.as_ref(), &input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(rtpmap.payload, 8);
        assert_eq!(rtpmap.encoding, "PCMA");
        assert_eq!(rtpmap.clock_rate, 8000);
        assert_eq!(rtpmap.params, None);
        assert_eq!(rtpmap.to_string(), "8 PCMA/8000");
    }

    #[test]
    fn rtpmap_channels() {
        let input = BytesStr::from_static("10 L16/44100/2");

        let (_, rtpmap) = RtpMap::parse(input.as_ref(), &input).unwrap();

        assert_eq!(rtpmap.params, Some(2));
        assert_eq!(rtpmap.to_string(), "10 L16/44100/2");
    }
}
