use super::Attr;
use crate::message::{Message, MessageBuilder, RawAttr};
use crate::Error;
use bytes::BufMut;
use std::str::from_utf8;

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.8)
pub struct ErrorCode<'s> {
    pub number: u16,
    pub reason: &'s str,
}

impl<'s> Attr<'s> for ErrorCode<'s> {
    type Context = ();
    const TYPE: u16 = 0x0009;

    fn decode(_: Self::Context, msg: &'s mut Message, raw: RawAttr) -> Result<Self, Error> {
        let value = raw.value(msg.buffer());

        if value.len() < 4 {
            return Err(Error::InvalidData("error-code attribute too short"));
        }

        let class = u16::from(value[2] & 0x7);
        let number = u16::from(value[3]);

        if !(3..=6).contains(&class) || number > 99 {
            return Err(Error::InvalidData("error-code out of range"));
        }

        let reason = from_utf8(&value[4..])
            .map_err(|_| Error::InvalidData("error-code reason is not utf8"))?;

        Ok(Self {
            number: class * 100 + number,
            reason,
        })
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        let buf = builder.buffer();
        buf.put_u16(0);
        buf.put_u8((self.number / 100) as u8);
        buf.put_u8((self.number % 100) as u8);
        buf.extend_from_slice(self.reason.as_bytes());
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(4 + self.reason.len())?)
    }
}
