//! SDP (RFC 8866) session descriptions, parsing and serialization.
//!
//! Only the profile needed for plain RTP/AVP audio/video sessions with ICE
//! attributes is modelled; everything else is preserved as
//! [`UnknownAttribute`] and ignored.

use internal::IResult;
use nom::character::complete::{char, digit1};
use nom::combinator::map_res;
use nom::sequence::preceded;
use std::str::FromStr;

mod attributes;
mod connection;
mod media;
mod media_description;
mod origin;
mod parser;
mod session_description;
mod tagged_address;
mod time;

pub use attributes::{
    Direction, Fmtp, IceCandidate, IcePassword, IceUsernameFragment, Rtcp, RtpMap,
    UnknownAttribute, UntaggedAddress,
};
pub use connection::Connection;
pub use media::{Media, MediaType, TransportProtocol};
pub use media_description::MediaDescription;
pub use origin::Origin;
pub use parser::ParseSessionDescriptionError;
pub use session_description::SessionDescription;
pub use tagged_address::TaggedAddress;
pub use time::Time;

fn slash_num(i: &str) -> IResult<&str, u32> {
    preceded(char('/'), map_res(digit1, FromStr::from_str))(i)
}

fn not_whitespace(c: char) -> bool {
    !c.is_ascii_whitespace()
}
