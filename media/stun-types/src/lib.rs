//! STUN message types, just enough surface for ICE connectivity checks and
//! server-reflexive address discovery

use byteorder::NetworkEndian;
use std::io;

mod header;
mod message;

pub mod attr;

pub use header::{Class, MessageHead, Method};
pub use message::{Message, MessageBuilder, RawAttr};

/// Magic cookie, always present at bytes 4..8 of a STUN message
pub const MAGIC_COOKIE: u32 = 0x2112A442;

pub(crate) type NE = NetworkEndian;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    InvalidData(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("integer conversion failed")]
    Conversion,
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Error::Conversion
    }
}

/// 96 bit transaction id, chosen by the request sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub [u8; 12]);

impl TransactionId {
    pub fn new(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// Number of padding bytes needed to align `len` to a 32 bit boundary
pub(crate) fn padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

#[cfg(test)]
mod test {
    use super::padding;

    #[test]
    fn attr_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(2), 2);
        assert_eq!(padding(3), 1);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(5), 3);
    }
}
