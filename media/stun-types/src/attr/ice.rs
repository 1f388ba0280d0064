use super::{Attr, U32Attr, U64Attr};
use crate::message::{Message, MessageBuilder, RawAttr};
use crate::Error;

/// Candidate priority of a connectivity check,
/// [RFC8445](https://datatracker.ietf.org/doc/html/rfc8445#section-7.1.1)
pub type Priority = U32Attr<0x0024>;

/// Tie breaker value of the controlled agent,
/// [RFC8445](https://datatracker.ietf.org/doc/html/rfc8445#section-7.1.3)
pub type IceControlled = U64Attr<0x8029>;

/// Tie breaker value of the controlling agent,
/// [RFC8445](https://datatracker.ietf.org/doc/html/rfc8445#section-7.1.3)
pub type IceControlling = U64Attr<0x802A>;

/// Flag attribute set by the controlling agent to nominate a candidate pair,
/// [RFC8445](https://datatracker.ietf.org/doc/html/rfc8445#section-8.1.1)
pub struct UseCandidate;

impl Attr<'_> for UseCandidate {
    type Context = ();
    const TYPE: u16 = 0x0025;

    fn decode(_: Self::Context, _: &mut Message, _: RawAttr) -> Result<Self, Error> {
        Ok(Self)
    }

    fn encode(&self, _: Self::Context, _: &mut MessageBuilder) {}

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(0)
    }
}
