use super::Attr;
use crate::message::{Message, MessageBuilder, RawAttr};
use crate::{Error, MAGIC_COOKIE, NE};
use byteorder::ReadBytesExt;
use bytes::BufMut;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

const XOR16: u16 = (MAGIC_COOKIE >> 16) as u16;

fn read_addr(mut buf: &[u8], xor16: u16, xor32: u32, xor128: u128) -> Result<SocketAddr, Error> {
    if buf.read_u8()? != 0 {
        return Err(Error::InvalidData("address attribute must start with zero"));
    }

    let family = buf.read_u8()?;
    let port = buf.read_u16::<NE>()? ^ xor16;

    match family {
        1 => {
            let ip = Ipv4Addr::from(buf.read_u32::<NE>()? ^ xor32);
            Ok(SocketAddr::from((ip, port)))
        }
        2 => {
            let ip = Ipv6Addr::from(buf.read_u128::<NE>()? ^ xor128);
            Ok(SocketAddr::from((ip, port)))
        }
        _ => Err(Error::InvalidData("unknown address family")),
    }
}

fn write_addr(addr: SocketAddr, buf: &mut Vec<u8>, xor16: u16, xor32: u32, xor128: u128) {
    buf.put_u8(0);

    match addr {
        SocketAddr::V4(addr) => {
            buf.put_u8(1);
            buf.put_u16(addr.port() ^ xor16);
            buf.put_u32(u32::from_be_bytes(addr.ip().octets()) ^ xor32);
        }
        SocketAddr::V6(addr) => {
            buf.put_u8(2);
            buf.put_u16(addr.port() ^ xor16);
            buf.put_u128(u128::from_be_bytes(addr.ip().octets()) ^ xor128);
        }
    }
}

fn addr_len(addr: SocketAddr) -> u16 {
    match addr {
        SocketAddr::V4(_) => 8,
        SocketAddr::V6(_) => 20,
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.1)
pub struct MappedAddress(pub SocketAddr);

impl Attr<'_> for MappedAddress {
    type Context = ();
    const TYPE: u16 = 0x0001;

    fn decode(_: Self::Context, msg: &mut Message, raw: RawAttr) -> Result<Self, Error> {
        read_addr(raw.value(msg.buffer()), 0, 0, 0).map(Self)
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        write_addr(self.0, builder.buffer(), 0, 0, 0);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(addr_len(self.0))
    }
}

/// [RFC8489](https://datatracker.ietf.org/doc/html/rfc8489#section-14.2)
///
/// The address is XORed with the magic cookie (and transaction id for IPv6)
/// to survive NATs which rewrite addresses found in packet payloads.
pub struct XorMappedAddress(pub SocketAddr);

impl Attr<'_> for XorMappedAddress {
    type Context = ();
    const TYPE: u16 = 0x0020;

    fn decode(_: Self::Context, msg: &mut Message, raw: RawAttr) -> Result<Self, Error> {
        let xor128 = msg.xor_id();
        read_addr(raw.value(msg.buffer()), XOR16, MAGIC_COOKIE, xor128).map(Self)
    }

    fn encode(&self, _: Self::Context, builder: &mut MessageBuilder) {
        let xor128 = builder.xor_id();
        write_addr(self.0, builder.buffer(), XOR16, MAGIC_COOKIE, xor128);
    }

    fn encode_len(&self) -> Result<u16, Error> {
        Ok(addr_len(self.0))
    }
}

#[cfg(test)]
mod test {
    use super::XorMappedAddress;
    use crate::{Class, Message, MessageBuilder, Method, TransactionId};

    #[test]
    fn xor_mapped_roundtrip() {
        for addr in ["192.0.2.1:20000", "[2001:db8::1]:9"] {
            let addr: std::net::SocketAddr = addr.parse().unwrap();

            let mut builder =
                MessageBuilder::new(Class::Success, Method::Binding, TransactionId::random());
            builder.attr(XorMappedAddress(addr));

            let mut msg = Message::parse(builder.finish()).unwrap();
            let mapped = msg.attr::<XorMappedAddress>().unwrap().unwrap();

            assert_eq!(mapped.0, addr);
        }
    }
}
