use super::{Attr, ATTR_HEADER_LEN};
use crate::header::HEADER_LEN;
use crate::message::{Message, MessageBuilder, RawAttr};
use crate::Error;
use hmac::{Mac, SimpleHmac};
use sha1::{Digest, Sha1};

/// HMAC-SHA1 key for [`MessageIntegrity`].
///
/// For ICE connectivity checks this is the peer's (or own) ice-pwd.
pub struct IntegrityKey(SimpleHmac<Sha1>);

impl IntegrityKey {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self(SimpleHmac::new_from_slice(key.as_ref()).expect("hmac accepts any key length"))
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.5)
///
/// HMAC-SHA1 over the message up to this attribute, with the header length
/// field covering up to and including this attribute.
pub struct MessageIntegrity;

impl Attr<'_> for MessageIntegrity {
    type Context = IntegrityKey;
    const TYPE: u16 = 0x0008;

    fn decode(ctx: Self::Context, msg: &mut Message, raw: RawAttr) -> Result<Self, Error> {
        let mut hmac = ctx.0;

        let adjusted_len = u16::try_from(raw.padded_end - HEADER_LEN)?;

        msg.with_msg_len(adjusted_len, |msg| {
            let received = raw.value(msg.buffer());
            let hashed = &msg.buffer()[..raw.begin - ATTR_HEADER_LEN];

            hmac.update(hashed);

            if hmac.finalize().into_bytes().as_slice() != received {
                return Err(Error::InvalidData("message integrity mismatch"));
            }

            Ok(MessageIntegrity)
        })
    }

    fn encode(&self, ctx: Self::Context, builder: &mut MessageBuilder) {
        let mut hmac = ctx.0;

        // The attribute header is already written, the digest itself is not
        let final_len = builder.buffer().len() + Sha1::output_size() - HEADER_LEN;
        builder.set_len(u16::try_from(final_len).expect("stun message exceeds u16 length"));

        let data = builder.buffer();
        let hashed = &data[..data.len() - ATTR_HEADER_LEN];
        hmac.update(hashed);
        let digest = hmac.finalize().into_bytes();

        builder.buffer().extend_from_slice(&digest);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(u16::try_from(Sha1::output_size())?)
    }
}

#[cfg(test)]
mod test {
    use super::{IntegrityKey, MessageIntegrity};
    use crate::attr::Software;
    use crate::{Class, Message, MessageBuilder, Method, TransactionId};

    #[test]
    fn integrity_roundtrip() {
        let key = "VOkJxbRl1RmTxUk/WvJxBt";

        let mut builder =
            MessageBuilder::new(Class::Request, Method::Binding, TransactionId::new([7; 12]));
        builder.attr(Software::new("sipkit"));
        builder.attr_with(MessageIntegrity, IntegrityKey::new(key));

        let mut msg = Message::parse(builder.finish()).unwrap();

        msg.attr_with::<MessageIntegrity>(IntegrityKey::new(key))
            .unwrap()
            .unwrap();

        assert!(matches!(
            msg.attr_with::<MessageIntegrity>(IntegrityKey::new("wrong")),
            Some(Err(_))
        ));
    }
}
