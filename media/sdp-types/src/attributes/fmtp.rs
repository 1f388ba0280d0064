use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res};
use nom::error::context;
use nom::sequence::tuple;
use std::fmt;
use std::str::FromStr;

/// Format parameters attribute (`a=fmtp`)
///
/// The parameters are kept as an opaque string, their syntax is specific to
/// the format.
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-6.15)
#[derive(Debug, Clone)]
pub struct Fmtp {
    pub format: u8,
    pub params: BytesStr,
}

impl Fmtp {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing fmtp",
            map(
                tuple((map_res(digit1, u8::from_str), multispace1, |rem| {
                    Ok(("", BytesStr::from_parse(src, rem)))
                })),
                |(format, _, params)| Fmtp { format, params },
            ),
        )(i)
    }
}

impl fmt::Display for Fmtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.format, self.params)
    }
}
