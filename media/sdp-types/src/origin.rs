use crate::not_whitespace;
use crate::tagged_address::TaggedAddress;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res};
use nom::error::context;
use nom::sequence::tuple;
use std::fmt;
use std::str::FromStr;

/// Origin (`o=`) line
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.2)
#[derive(Debug, Clone)]
pub struct Origin {
    pub username: BytesStr,
    pub session_id: u64,
    pub session_version: u64,
    pub address: TaggedAddress,
}

impl Origin {
    pub(crate) fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing origin",
            map(
                tuple((
                    map(take_while1(not_whitespace), |slice| {
                        BytesStr::from_parse(src, slice)
                    }),
                    multispace1,
                    map_res(digit1, u64::from_str),
                    multispace1,
                    map_res(digit1, u64::from_str),
                    multispace1,
                    |i| TaggedAddress::parse(src, i),
                )),
                |(username, _, session_id, _, session_version, _, address)| Origin {
                    username,
                    session_id,
                    session_version,
                    address,
                },
            ),
        )(i)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.username, self.session_id, self.session_version, self.address
        )
    }
}
