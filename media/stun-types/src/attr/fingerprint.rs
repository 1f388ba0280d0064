use super::{Attr, ATTR_HEADER_LEN};
use crate::header::HEADER_LEN;
use crate::message::{Message, MessageBuilder, RawAttr};
use crate::{Error, NE};
use byteorder::ReadBytesExt;
use bytes::BufMut;

const XOR_VALUE: u32 = 0x5354554e;

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.7)
///
/// CRC-32 of the message up to this attribute, XORed with `0x5354554e`.
/// Always the last attribute of a message.
pub struct Fingerprint;

impl Attr<'_> for Fingerprint {
    type Context = ();
    const TYPE: u16 = 0x8028;

    fn decode(_: Self::Context, msg: &mut Message, raw: RawAttr) -> Result<Self, Error> {
        let adjusted_len = u16::try_from(raw.padded_end - HEADER_LEN)?;

        msg.with_msg_len(adjusted_len, |msg| {
            let mut received = raw.value(msg.buffer());
            let received = received.read_u32::<NE>()?;

            let covered = &msg.buffer()[..raw.begin - ATTR_HEADER_LEN];

            if crc32(covered) ^ XOR_VALUE != received {
                return Err(Error::InvalidData("fingerprint mismatch"));
            }

            Ok(Fingerprint)
        })
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        let final_len = builder.buffer().len() + 4 - HEADER_LEN;
        builder.set_len(u16::try_from(final_len).expect("stun message exceeds u16 length"));

        let data = builder.buffer();
        let checksum = crc32(&data[..data.len() - ATTR_HEADER_LEN]) ^ XOR_VALUE;

        builder.buffer().put_u32(checksum);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(4)
    }
}

/// CRC-32/ISO-HDLC, bitwise variant
fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;

    for &byte in data {
        crc ^= u32::from(byte);

        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB88320 & mask);
        }
    }

    !crc
}

#[cfg(test)]
mod test {
    use super::{crc32, Fingerprint};
    use crate::{Class, Message, MessageBuilder, Method, TransactionId};

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn fingerprint_roundtrip() {
        let mut builder =
            MessageBuilder::new(Class::Request, Method::Binding, TransactionId::random());
        builder.attr(Fingerprint);

        let mut msg = Message::parse(builder.finish()).unwrap();
        msg.attr::<Fingerprint>().unwrap().unwrap();
    }

    #[test]
    fn fingerprint_detects_corruption() {
        let mut builder =
            MessageBuilder::new(Class::Request, Method::Binding, TransactionId::random());
        builder.attr(Fingerprint);

        let mut bytes = builder.finish();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut msg = Message::parse(bytes).unwrap();
        assert!(matches!(msg.attr::<Fingerprint>(), Some(Err(_))));
    }
}
