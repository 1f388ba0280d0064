//! SIP message model: methods, status codes, URIs, headers and whole
//! messages, with parsing and serialization.

mod host;
mod method;
mod msg;
mod parse;
mod status_code;

pub mod header;
pub mod uri;

pub use host::{Host, HostPort, InvalidHostPort};
pub use method::Method;
pub use msg::{Message, ParseMessageError, Request, RequestLine, Response, StatusLine};
pub use status_code::StatusCode;
pub use uri::{NameAddr, Params, SipUri};
