use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

mod candidate;
mod direction;
mod fmtp;
mod ice;
mod rtcp;
mod rtpmap;

pub use candidate::{IceCandidate, UntaggedAddress};
pub use direction::Direction;
pub use fmtp::Fmtp;
pub use ice::{IcePassword, IceUsernameFragment};
pub use rtcp::Rtcp;
pub use rtpmap::RtpMap;

/// `name[:value]` pair holding any attribute this crate does not model.
///
/// Unknown attributes are kept so a description round-trips through
/// parse and print unchanged.
#[derive(Debug, Clone)]
pub struct UnknownAttribute {
    pub name: BytesStr,
    pub value: Option<BytesStr>,
}

impl UnknownAttribute {
    pub fn parse(src: &Bytes, line: &str) -> Self {
        match line.split_once(':') {
            None => Self {
                name: BytesStr::from_parse(src, line),
                value: None,
            },
            Some((name, value)) => Self {
                name: BytesStr::from_parse(src, name),
                value: Some(BytesStr::from_parse(src, value)),
            },
        }
    }
}

impl fmt::Display for UnknownAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a={}", self.name)?;

        if let Some(value) = &self.value {
            write!(f, ":{value}")?;
        }

        Ok(())
    }
}
