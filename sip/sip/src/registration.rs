use bytesstr::BytesStr;
use sip_auth::DigestAuthenticator;
use sip_core::TsxKey;
use sip_types::header::typed::Contact;
use sip_types::uri::NameAddr;
use std::net::SocketAddr;

/// Registration binding lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    Registering,
    Registered,
    RegisterFailed,
    Unregistering,
    Unregistered,
}

pub(crate) struct Registration {
    pub(crate) state: RegistrationState,

    pub(crate) registrar: SocketAddr,
    /// Address-of-record used in From/To
    pub(crate) aor: NameAddr,
    pub(crate) contact: Contact,
    pub(crate) expires: u32,

    pub(crate) call_id: BytesStr,
    pub(crate) cseq: u32,

    pub(crate) tsx: Option<TsxKey>,

    /// Set while the current REGISTER removes the binding
    pub(crate) removing: bool,

    pub(crate) auth: DigestAuthenticator,
    pub(crate) auth_retried: bool,
}
