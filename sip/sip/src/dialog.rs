use bytes::Bytes;
use bytesstr::BytesStr;
use media_session::MediaSession;
use sip_auth::DigestAuthenticator;
use sip_core::TsxKey;
use sip_types::uri::NameAddr;
use sip_types::Request;
use std::net::SocketAddr;

slotmap::new_key_type! {
    /// Handle of a call inside its agent. Generational: using the id of a
    /// destroyed dialog yields `AgentError::DialogNotFound`.
    pub struct DialogId;
}

/// Side which created the dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Lifecycle of a call.
///
/// `Failed` and `Terminated` are terminal; a terminal state change is always
/// emitted before the dialog is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Outgoing call before any response
    Calling,
    /// Outgoing call got a provisional response
    Early,
    /// Incoming call awaiting accept or reject
    Incoming,
    /// Session established
    Confirmed,
    /// Rejected or errored out
    Failed,
    Terminated,
}

impl DialogState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DialogState::Failed | DialogState::Terminated)
    }
}

pub(crate) struct Dialog {
    pub(crate) state: DialogState,
    pub(crate) direction: CallDirection,

    pub(crate) call_id: BytesStr,
    pub(crate) local: NameAddr,
    pub(crate) remote: NameAddr,
    pub(crate) local_tag: BytesStr,
    pub(crate) remote_tag: Option<BytesStr>,

    /// Where in-dialog requests go
    pub(crate) remote_target: SocketAddr,
    pub(crate) local_cseq: u32,

    /// UAC: the INVITE client transaction. UAS: the INVITE server
    /// transaction.
    pub(crate) invite_tsx: Option<TsxKey>,

    /// UAS: the original INVITE, answered once the local SDP is ready
    pub(crate) invite_request: Option<Request>,

    /// UAC: serialized ACK, replayed on 2xx retransmissions
    pub(crate) cached_ack: Option<Bytes>,

    pub(crate) media: Option<MediaSession>,

    /// Remote session description as received in signaling
    pub(crate) remote_sdp: Option<String>,

    /// Outgoing call: the INVITE went out (the local SDP was ready)
    pub(crate) invite_sent: bool,
    /// UAS: accept was requested, answer once the SDP is ready
    pub(crate) answered: bool,
    /// UAC: CANCEL requested or sent
    pub(crate) cancelled: bool,

    pub(crate) auth: DigestAuthenticator,
    pub(crate) auth_retried: bool,
}

impl Dialog {
    pub(crate) fn tag() -> BytesStr {
        let n: u32 = rand::random();
        BytesStr::from(format!("{n:08x}"))
    }
}
