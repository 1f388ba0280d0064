use internal::IResult;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res};
use nom::error::context;
use nom::sequence::tuple;
use std::fmt;
use std::str::FromStr;

/// Time (`t=`) line. `0 0` describes an unbounded session.
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.9)
#[derive(Debug, Clone, Copy, Default)]
pub struct Time {
    pub start: u64,
    pub stop: u64,
}

impl Time {
    pub(crate) fn parse(i: &str) -> IResult<&str, Self> {
        context(
            "parsing time",
            map(
                tuple((
                    map_res(digit1, u64::from_str),
                    multispace1,
                    map_res(digit1, u64::from_str),
                )),
                |(start, _, stop)| Time { start, stop },
            ),
        )(i)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.start, self.stop)
    }
}
