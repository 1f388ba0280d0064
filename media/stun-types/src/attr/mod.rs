//! STUN attributes used by the ICE agent and STUN bindings

use crate::message::{Message, MessageBuilder, RawAttr};
use crate::{Error, NE};
use byteorder::ReadBytesExt;
use bytes::BufMut;
use std::str::from_utf8;

mod addr;
mod error_code;
mod fingerprint;
mod ice;
mod integrity;

pub use addr::{MappedAddress, XorMappedAddress};
pub use error_code::ErrorCode;
pub use fingerprint::Fingerprint;
pub use ice::{IceControlled, IceControlling, Priority, UseCandidate};
pub use integrity::{IntegrityKey, MessageIntegrity};

pub(crate) const ATTR_HEADER_LEN: usize = 4;

/// A single STUN attribute, able to decode itself from a parsed [`Message`]
/// and encode itself into a [`MessageBuilder`].
///
/// `Context` carries out-of-band data some attributes need, like the HMAC
/// key of MESSAGE-INTEGRITY. Attributes without requirements use `()`.
pub trait Attr<'s> {
    type Context;
    const TYPE: u16;

    fn decode(ctx: Self::Context, msg: &'s mut Message, raw: RawAttr) -> Result<Self, Error>
    where
        Self: Sized;

    fn encode(&self, ctx: Self::Context, builder: &mut MessageBuilder);

    fn encode_len(&self) -> Result<u16, Error>;
}

/// Attribute whose value is plain UTF-8 text
pub struct StringAttr<'s, const TYPE: u16>(pub &'s str);

impl<'s, const TYPE: u16> StringAttr<'s, TYPE> {
    pub fn new(s: &'s str) -> Self {
        Self(s)
    }
}

impl<'s, const TYPE: u16> Attr<'s> for StringAttr<'s, TYPE> {
    type Context = ();
    const TYPE: u16 = TYPE;

    fn decode(_: Self::Context, msg: &'s mut Message, raw: RawAttr) -> Result<Self, Error> {
        let value = from_utf8(raw.value(msg.buffer()))
            .map_err(|_| Error::InvalidData("attribute value is not utf8"))?;
        Ok(Self(value))
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        builder.buffer().extend_from_slice(self.0.as_bytes());
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(self.0.len())?)
    }
}

/// Attribute whose value is a big-endian u32
pub struct U32Attr<const TYPE: u16>(pub u32);

impl<const TYPE: u16> Attr<'_> for U32Attr<TYPE> {
    type Context = ();
    const TYPE: u16 = TYPE;

    fn decode(_: Self::Context, msg: &mut Message, raw: RawAttr) -> Result<Self, Error> {
        let mut value = raw.value(msg.buffer());
        Ok(Self(value.read_u32::<NE>()?))
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        builder.buffer().put_u32(self.0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}

/// Attribute whose value is a big-endian u64
pub struct U64Attr<const TYPE: u16>(pub u64);

impl<const TYPE: u16> Attr<'_> for U64Attr<TYPE> {
    type Context = ();
    const TYPE: u16 = TYPE;

    fn decode(_: Self::Context, msg: &mut Message, raw: RawAttr) -> Result<Self, Error> {
        let mut value = raw.value(msg.buffer());
        Ok(Self(value.read_u64::<NE>()?))
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        builder.buffer().put_u64(self.0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(8)
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.3)
pub type Username<'s> = StringAttr<'s, 0x0006>;

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.14)
pub type Software<'s> = StringAttr<'s, 0x8022>;
