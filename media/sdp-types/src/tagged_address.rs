use crate::attributes::UntaggedAddress;
use bytes::Bytes;
use internal::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::map;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::net::IpAddr;

/// Address together with its network/address-type tags as it appears in
/// origin (`o=`) and connection (`c=`) lines, e.g. `IN IP4 192.0.2.1`
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedAddress {
    Ip4(UntaggedAddress),
    Ip6(UntaggedAddress),
}

impl TaggedAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            TaggedAddress::Ip4(addr) | TaggedAddress::Ip6(addr) => addr.ip(),
        }
    }

    pub(crate) fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        preceded(
            tuple((tag("IN"), take_while1(char::is_whitespace))),
            alt((
                map(
                    preceded(
                        tuple((tag("IP4"), take_while1(char::is_whitespace))),
                        |i| UntaggedAddress::parse(src, i),
                    ),
                    TaggedAddress::Ip4,
                ),
                map(
                    preceded(
                        tuple((tag("IP6"), take_while1(char::is_whitespace))),
                        |i| UntaggedAddress::parse(src, i),
                    ),
                    TaggedAddress::Ip6,
                ),
            )),
        )(i)
    }
}

impl From<IpAddr> for TaggedAddress {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => TaggedAddress::Ip4(UntaggedAddress::IpAddress(ip)),
            IpAddr::V6(_) => TaggedAddress::Ip6(UntaggedAddress::IpAddress(ip)),
        }
    }
}

impl fmt::Display for TaggedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedAddress::Ip4(addr) => write!(f, "IN IP4 {addr}"),
            TaggedAddress::Ip6(addr) => write!(f, "IN IP6 {addr}"),
        }
    }
}
