use crate::tagged_address::TaggedAddress;
use bytes::Bytes;
use internal::IResult;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res, opt};
use nom::error::context;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::str::FromStr;

/// Rtcp attribute (`a=rtcp`), advertises the RTCP port when it is not
/// RTP port + 1
///
/// [RFC3605](https://www.rfc-editor.org/rfc/rfc3605.html)
#[derive(Debug, Clone)]
pub struct Rtcp {
    pub port: u16,
    pub address: Option<TaggedAddress>,
}

impl Rtcp {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing rtcp",
            map(
                tuple((
                    map_res(digit1, u16::from_str),
                    opt(preceded(multispace1, |i| TaggedAddress::parse(src, i))),
                )),
                |(port, address)| Rtcp { port, address },
            ),
        )(i)
    }
}

impl fmt::Display for Rtcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port)?;

        if let Some(address) = &self.address {
            write!(f, " {address}")?;
        }

        Ok(())
    }
}
