//! Typed representations of the headers this stack reads and writes

mod auth;
mod contact;
mod cseq;
mod from_to;
mod misc;
mod via;

pub use auth::{DigestChallenge, DigestResponse};
pub use contact::Contact;
pub use cseq::CSeq;
pub use from_to::FromTo;
pub use misc::{Allow, CallId, ContentLength, ContentType, Expires, MaxForwards, UserAgent};
pub use via::Via;
