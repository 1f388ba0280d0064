use crate::tagged_address::TaggedAddress;
use bytes::Bytes;
use internal::IResult;
use nom::combinator::map;
use nom::error::context;
use std::fmt;

/// Connection (`c=`) line
///
/// TTL and address multiplicity suffixes are not modelled, multicast
/// sessions are out of scope.
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-5.7)
#[derive(Debug, Clone)]
pub struct Connection {
    pub address: TaggedAddress,
}

impl Connection {
    pub(crate) fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        context(
            "parsing connection",
            map(|i| TaggedAddress::parse(src, i), |address| Connection { address }),
        )(i)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}
