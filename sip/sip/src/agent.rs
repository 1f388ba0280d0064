use crate::config::{AgentConfig, CallDevices};
use crate::dialog::{CallDirection, Dialog, DialogId, DialogState};
use crate::error::{AgentError, AgentErrorKind};
use crate::registration::{Registration, RegistrationState};
use bytes::Bytes;
use bytesstr::BytesStr;
use media_session::{MediaSession, MediaSessionEvent, MediaSessionState};
use rtp::RtpStats;
use sdp_types::SessionDescription;
use sip_auth::{DigestAuthenticator, DigestCredentials, DigestUser};
use sip_core::{Endpoint, EndpointEvent, IncomingRequest, TimerQueue, TsxKey};
use sip_types::header::typed::{
    Allow, CSeq, CallId, Contact, ContentType, Expires, FromTo, MaxForwards, UserAgent, Via,
};
use sip_types::header::Name;
use sip_types::uri::NameAddr;
use sip_types::{HostPort, Method, Request, Response, SipUri, StatusCode};
use slotmap::SlotMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use transport::{Endpoint as _, PacketKind, TransportConfig, UdpEndpoint};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Events surfaced to the embedding application, drained with
/// [`Agent::pop_event`] after every [`Agent::run`] call
#[derive(Debug)]
pub enum AgentEvent {
    /// A new INVITE arrived; answer or reject the dialog
    IncomingCall { dialog: DialogId, from: NameAddr },
    /// A dialog moved through its state machine. Terminal states arrive
    /// before the dialog is destroyed.
    DialogStateChanged {
        dialog: DialogId,
        previous: DialogState,
        state: DialogState,
    },
    RegistrationStateChanged { state: RegistrationState },
    /// Outcome of a REGISTER exchange
    RegisterResult {
        success: bool,
        status: Option<StatusCode>,
    },
    Error {
        kind: AgentErrorKind,
        message: String,
    },
}

enum AgentTimer {
    RegisterRefresh,
}

/// A SIP user agent: one signaling socket, one optional registration and a
/// table of call dialogs, each owning its media session.
///
/// Single-threaded and sans-io at heart: the embedder calls
/// [`run`](Agent::run) (signaling) and [`run_media`](Agent::run_media)
/// (media planes) in its loop and reacts to [`pop_event`](Agent::pop_event).
pub struct Agent {
    config: AgentConfig,
    credentials: DigestCredentials,

    endpoint: Endpoint,
    socket: UdpEndpoint,
    /// Address advertised in Via and Contact headers
    advertised: SocketAddr,

    registration: Option<Registration>,

    dialogs: SlotMap<DialogId, Dialog>,

    timers: TimerQueue<AgentTimer>,
    events: VecDeque<AgentEvent>,
}

impl Agent {
    /// Bind the signaling transport and set up the endpoint.
    ///
    /// Registration does not happen before [`start`](Agent::start).
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let mut socket = UdpEndpoint::new(TransportConfig {
            nonblocking: true,
            ..TransportConfig::udp(config.bind_addr, config.bind_port)
        });

        socket.open()?;

        let bound = socket.local_addr().expect("socket was opened");

        let advertised_ip = if config.bind_addr.is_unspecified() {
            local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            config.bind_addr
        };

        let advertised = SocketAddr::new(advertised_ip, bound.port());

        log::info!("agent listening on {bound}, advertising {advertised}");

        let mut credentials = DigestCredentials::new();
        credentials.set_default(DigestUser::new(
            config.username.clone(),
            config.password.clone(),
        ));

        Ok(Self {
            config,
            credentials,
            endpoint: Endpoint::new(),
            socket,
            advertised,
            registration: None,
            dialogs: SlotMap::with_key(),
            timers: TimerQueue::new(),
            events: VecDeque::new(),
        })
    }

    /// The address the agent advertises for signaling
    pub fn local_addr(&self) -> SocketAddr {
        self.advertised
    }

    /// Kick the agent off; registers when `auto_register` is set
    pub fn start(&mut self) -> Result<(), AgentError> {
        if self.config.auto_register {
            self.register()?;
        }

        Ok(())
    }

    /// Remove the registrar binding; terminal dialogs are not touched
    pub fn stop(&mut self) {
        if self.registration_state() == RegistrationState::Registered {
            if let Err(e) = self.unregister() {
                log::warn!("failed to send unregister: {e}");
            }
        }
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration
            .as_ref()
            .map(|r| r.state)
            .unwrap_or(RegistrationState::Idle)
    }

    pub fn dialog_state(&self, dialog: DialogId) -> Option<DialogState> {
        self.dialogs.get(dialog).map(|d| d.state)
    }

    /// Media connectivity of a call
    pub fn media_state(&self, dialog: DialogId) -> Option<MediaSessionState> {
        self.dialogs
            .get(dialog)?
            .media
            .as_ref()
            .map(|m| m.state())
    }

    /// Audio statistics of a call; available until the dialog is destroyed
    pub fn call_stats(&self, dialog: DialogId) -> Option<RtpStats> {
        self.dialogs.get(dialog)?.media.as_ref()?.audio_stats()
    }

    /// The peer's session description as received in signaling
    pub fn remote_sdp(&self, dialog: DialogId) -> Option<&str> {
        self.dialogs.get(dialog)?.remote_sdp.as_deref()
    }

    pub fn pop_event(&mut self) -> Option<AgentEvent> {
        self.events.pop_front()
    }

    fn domain(&self) -> &str {
        self.config
            .domain
            .as_deref()
            .unwrap_or(&self.config.registrar_host)
    }

    fn address_of_record(&self) -> NameAddr {
        let uri = SipUri::new(HostPort::host_name(self.domain().to_string()))
            .user(self.config.username.as_str());

        match &self.config.display_name {
            Some(name) => NameAddr::new(name.as_str(), uri),
            None => NameAddr::uri(uri),
        }
    }

    fn contact(&self) -> Contact {
        Contact::new(NameAddr::uri(
            SipUri::new(HostPort::from(self.advertised)).user(self.config.username.as_str()),
        ))
    }

    fn allow(&self) -> Allow {
        Allow(vec![
            Method::INVITE,
            Method::ACK,
            Method::CANCEL,
            Method::BYE,
            Method::OPTIONS,
        ])
    }

    fn new_request(
        &self,
        method: Method,
        uri: SipUri,
        from: &FromTo,
        to: &FromTo,
        call_id: &BytesStr,
        cseq: u32,
    ) -> Request {
        let mut request = Request::new(method.clone(), uri);

        request.headers.insert(&Via::new(
            "UDP",
            HostPort::from(self.advertised),
            Endpoint::create_branch(),
        ));
        request.headers.insert(&MaxForwards(70));
        request.headers.insert_named(Name::From, from);
        request.headers.insert_named(Name::To, to);
        request.headers.push(Name::CallId, call_id.clone());
        request.headers.insert(&CSeq { cseq, method });
        request
            .headers
            .insert(&UserAgent(BytesStr::from(self.config.user_agent.as_str())));
        request.headers.insert(&self.allow());

        request
    }

    /// Response skeleton mirroring the request, optionally adding a local
    /// To tag
    fn response_for(
        request: &Request,
        code: StatusCode,
        local_tag: Option<&BytesStr>,
    ) -> Response {
        let mut response = Response::new(code);

        for via in request.headers.raw_all(&Name::Via) {
            response.headers.push(Name::Via, via.clone());
        }

        if let Some(from) = request.headers.raw(&Name::From) {
            response.headers.push(Name::From, from.clone());
        }

        match (
            request.headers.get_all_named::<FromTo>(&Name::To).pop(),
            local_tag,
        ) {
            (Some(mut to), Some(tag)) if to.tag.is_none() => {
                to.tag = Some(tag.clone());
                response.headers.insert_named(Name::To, &to);
            }
            _ => {
                if let Some(to) = request.headers.raw(&Name::To) {
                    response.headers.push(Name::To, to.clone());
                }
            }
        }

        if let Some(call_id) = request.headers.raw(&Name::CallId) {
            response.headers.push(Name::CallId, call_id.clone());
        }

        if let Some(cseq) = request.headers.raw(&Name::CSeq) {
            response.headers.push(Name::CSeq, cseq.clone());
        }

        response
    }

    fn emit_error(&mut self, kind: AgentErrorKind, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{kind:?}: {message}");
        self.events.push_back(AgentEvent::Error { kind, message });
    }

    // === Registration ===

    fn resolve_registrar(&self) -> Option<SocketAddr> {
        resolve_host(&self.config.registrar_host, self.config.registrar_port)
    }

    /// Bind the account at the registrar
    pub fn register(&mut self) -> Result<(), AgentError> {
        let registrar = match self.resolve_registrar() {
            Some(registrar) => registrar,
            None => {
                self.emit_error(
                    AgentErrorKind::SipRegisterFailed,
                    format!("cannot resolve registrar {}", self.config.registrar_host),
                );
                return Err(AgentError::InvalidTarget);
            }
        };

        if self.registration.is_none() {
            self.registration = Some(Registration {
                state: RegistrationState::Idle,
                registrar,
                aor: self.address_of_record(),
                contact: self.contact(),
                expires: self.config.register_expires,
                call_id: BytesStr::from(uuid::Uuid::new_v4().to_string()),
                cseq: 0,
                tsx: None,
                removing: false,
                auth: DigestAuthenticator::new(self.credentials.clone()),
                auth_retried: false,
            });
        }

        self.set_registration_state(RegistrationState::Registering);
        self.send_register(false)
    }

    /// Remove the binding at the registrar
    pub fn unregister(&mut self) -> Result<(), AgentError> {
        if self.registration.is_none() {
            return Ok(());
        }

        self.set_registration_state(RegistrationState::Unregistering);
        self.send_register(true)
    }

    fn set_registration_state(&mut self, state: RegistrationState) {
        let Some(registration) = &mut self.registration else {
            return;
        };

        if registration.state == state {
            return;
        }

        registration.state = state;
        self.events
            .push_back(AgentEvent::RegistrationStateChanged { state });
    }

    fn send_register(&mut self, remove_binding: bool) -> Result<(), AgentError> {
        let Some(registration) = &mut self.registration else {
            return Ok(());
        };

        registration.cseq += 1;
        registration.removing = remove_binding;

        let registrar_uri = SipUri::new(HostPort::host_name(self.config.registrar_host.clone()));

        let from = FromTo {
            addr: registration.aor.clone(),
            tag: Some(Dialog::tag()),
            params: Default::default(),
        };
        let to = FromTo::new(registration.aor.clone(), None);

        let call_id = registration.call_id.clone();
        let cseq = registration.cseq;
        let expires = if remove_binding { 0 } else { registration.expires };
        let contact = registration.contact.clone();
        let registrar = registration.registrar;

        let mut request = self.new_request(
            Method::REGISTER,
            registrar_uri.clone(),
            &from,
            &to,
            &call_id,
            cseq,
        );

        request.headers.insert(&contact);
        request.headers.insert(&Expires(expires));

        let registration = self.registration.as_mut().expect("checked above");
        registration.auth.authorize_request(
            &mut request.headers,
            &Method::REGISTER,
            &registrar_uri.to_string(),
        );

        let tsx = self
            .endpoint
            .send_request(request, registrar, Instant::now())?;

        registration.tsx = Some(tsx);

        Ok(())
    }

    fn handle_registration_response(&mut self, response: Response, now: Instant) {
        let Some(registration) = &mut self.registration else {
            return;
        };

        let code = response.line.code;

        if code.is_provisional() {
            return;
        }

        registration.tsx = None;

        if code.is_success() {
            registration.auth_retried = false;

            if registration.removing {
                self.set_registration_state(RegistrationState::Unregistered);
                self.events.push_back(AgentEvent::RegisterResult {
                    success: true,
                    status: Some(code),
                });
                return;
            }

            // granted lifetime: our contact's expires param, the Expires
            // header, or what we asked for
            let contact_expires = response
                .headers
                .get_all_named::<Contact>(&Name::Contact)
                .iter()
                .find_map(|c| c.expires());

            let granted = contact_expires
                .or_else(|| {
                    response
                        .headers
                        .try_get::<Expires>()
                        .ok()
                        .flatten()
                        .map(|e| e.0)
                })
                .unwrap_or(registration.expires)
                .max(1);

            let refresh_in = Duration::from_secs(u64::from(granted) * 8 / 10);
            self.timers
                .schedule(now + refresh_in, AgentTimer::RegisterRefresh);

            self.set_registration_state(RegistrationState::Registered);
            self.events.push_back(AgentEvent::RegisterResult {
                success: true,
                status: Some(code),
            });

            return;
        }

        let unauthorized = code == StatusCode::UNAUTHORIZED
            || code == StatusCode::PROXY_AUTHENTICATION_REQUIRED;

        if unauthorized && !registration.auth_retried {
            registration.auth_retried = true;

            match registration.auth.handle_rejection(&response.headers) {
                Ok(()) => {
                    if let Err(e) = self.send_register(self.registration
                        .as_ref()
                        .map(|r| r.removing)
                        .unwrap_or(false))
                    {
                        self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
                        self.registration_failed(Some(code));
                    }
                    return;
                }
                Err(e) => {
                    self.emit_error(AgentErrorKind::SipAuthFailed, e.to_string());
                    self.registration_failed(Some(code));
                    return;
                }
            }
        }

        if unauthorized {
            self.emit_error(
                AgentErrorKind::SipAuthFailed,
                "registrar rejected our credentials twice",
            );
        } else {
            self.emit_error(
                AgentErrorKind::SipRegisterFailed,
                format!("REGISTER rejected with status {code}"),
            );
        }

        self.registration_failed(Some(code));
    }

    fn registration_failed(&mut self, status: Option<StatusCode>) {
        self.set_registration_state(RegistrationState::RegisterFailed);
        self.events.push_back(AgentEvent::RegisterResult {
            success: false,
            status,
        });
    }

    // === Calls, UAC side ===

    /// Start an outgoing call.
    ///
    /// The INVITE leaves once the media session produced its offer; cancel
    /// is possible at any time. Registration is not required.
    pub fn make_call(
        &mut self,
        target: &str,
        devices: CallDevices,
    ) -> Result<DialogId, AgentError> {
        let target_uri: SipUri = target.parse().map_err(|_| AgentError::InvalidTarget)?;

        let remote_target = target_uri
            .host_port
            .socket_addr()
            .or_else(|| match &target_uri.host_port.host {
                sip_types::Host::Name(name) => {
                    resolve_host(name, target_uri.host_port.port.unwrap_or(5060))
                }
                _ => None,
            })
            .or_else(|| self.registration.as_ref().map(|r| r.registrar))
            .ok_or(AgentError::InvalidTarget)?;

        let mut media = MediaSession::new(
            self.config.media.session_config(devices),
            /* controlling: */ true,
        );
        media.gather_candidates()?;

        let dialog = Dialog {
            state: DialogState::Calling,
            direction: CallDirection::Outgoing,
            call_id: BytesStr::from(uuid::Uuid::new_v4().to_string()),
            local: self.address_of_record(),
            remote: NameAddr::uri(target_uri),
            local_tag: Dialog::tag(),
            remote_tag: None,
            remote_target,
            local_cseq: 0,
            invite_tsx: None,
            invite_request: None,
            cached_ack: None,
            media: Some(media),
            remote_sdp: None,
            invite_sent: false,
            answered: false,
            cancelled: false,
            auth: DigestAuthenticator::new(self.credentials.clone()),
            auth_retried: false,
        };

        Ok(self.dialogs.insert(dialog))
    }

    fn send_invite(&mut self, id: DialogId, sdp: &SessionDescription) {
        let Some(dialog) = self.dialogs.get_mut(id) else {
            return;
        };

        dialog.local_cseq += 1;
        dialog.invite_sent = true;

        let from = FromTo {
            addr: dialog.local.clone(),
            tag: Some(dialog.local_tag.clone()),
            params: Default::default(),
        };
        let to = FromTo::new(dialog.remote.clone(), None);
        let call_id = dialog.call_id.clone();
        let cseq = dialog.local_cseq;
        let uri = dialog.remote.uri.clone();
        let target = dialog.remote_target;

        let mut request = self.new_request(Method::INVITE, uri.clone(), &from, &to, &call_id, cseq);

        request.headers.insert(&self.contact());
        request
            .headers
            .insert(&ContentType(BytesStr::from_static(SDP_CONTENT_TYPE)));
        request.body = Bytes::from(sdp.to_string());

        let dialog = self.dialogs.get_mut(id).expect("looked up above");
        dialog
            .auth
            .authorize_request(&mut request.headers, &Method::INVITE, &uri.to_string());
        dialog.invite_request = Some(request.clone());

        match self.endpoint.send_request(request, target, Instant::now()) {
            Ok(tsx) => {
                if let Some(dialog) = self.dialogs.get_mut(id) {
                    dialog.invite_tsx = Some(tsx);
                }
            }
            Err(e) => {
                self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
                self.fail_dialog(id);
            }
        }
    }

    /// Give up on a not-yet-confirmed outgoing call
    pub fn cancel_call(&mut self, id: DialogId) -> Result<(), AgentError> {
        let dialog = self.dialogs.get_mut(id).ok_or(AgentError::DialogNotFound)?;

        if !matches!(dialog.state, DialogState::Calling | DialogState::Early) {
            return Err(AgentError::InvalidDialogState(dialog.state));
        }

        if dialog.cancelled {
            return Ok(());
        }

        dialog.cancelled = true;

        if !dialog.invite_sent {
            // the INVITE never went out, nothing to cancel on the wire
            self.terminate_dialog(id);
            return Ok(());
        }

        let Some(invite) = dialog.invite_request.clone() else {
            self.terminate_dialog(id);
            return Ok(());
        };

        let target = dialog.remote_target;

        // CANCEL mirrors the INVITE: same URI, branch and CSeq number
        let mut cancel = Request::new(Method::CANCEL, invite.line.uri.clone());

        for name in [Name::Via, Name::From, Name::To, Name::CallId] {
            if let Some(value) = invite.headers.raw(&name) {
                cancel.headers.push(name, value.clone());
            }
        }

        if let Ok(cseq) = invite.headers.get::<CSeq>() {
            cancel.headers.insert(&CSeq {
                cseq: cseq.cseq,
                method: Method::CANCEL,
            });
        }

        cancel.headers.insert(&MaxForwards(70));

        if let Err(e) = self.endpoint.send_request(cancel, target, Instant::now()) {
            self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
        }

        // the dialog terminates when the 487 for the INVITE arrives

        Ok(())
    }

    fn handle_invite_response(&mut self, id: DialogId, response: Response, now: Instant) {
        let Some(dialog) = self.dialogs.get(id) else {
            return;
        };

        let code = response.line.code;

        // 2xx retransmission after confirmation: repeat the ACK
        if dialog.state == DialogState::Confirmed {
            if code.is_success() {
                if let Some(ack) = self.dialogs[id].cached_ack.clone() {
                    let target = self.dialogs[id].remote_target;
                    self.endpoint.transmit_raw(ack, target);
                }
            }
            return;
        }

        if code.is_provisional() {
            if code != StatusCode::TRYING && dialog.state == DialogState::Calling {
                self.transition(id, DialogState::Early);
            }
            return;
        }

        if code.is_success() {
            self.confirm_outgoing(id, response, now);
            return;
        }

        let unauthorized = code == StatusCode::UNAUTHORIZED
            || code == StatusCode::PROXY_AUTHENTICATION_REQUIRED;

        if unauthorized && !dialog.auth_retried && !dialog.cancelled {
            self.retry_invite_with_auth(id, &response);
            return;
        }

        if dialog.cancelled && code == StatusCode::REQUEST_TERMINATED {
            // clean cancel: no failure, straight to terminated
            self.terminate_dialog(id);
            return;
        }

        self.emit_error(
            AgentErrorKind::SipCallFailed,
            format!("call rejected with status {code}"),
        );
        self.fail_dialog(id);
    }

    fn retry_invite_with_auth(&mut self, id: DialogId, response: &Response) {
        let Some(dialog) = self.dialogs.get_mut(id) else {
            return;
        };

        dialog.auth_retried = true;

        if let Err(e) = dialog.auth.handle_rejection(&response.headers) {
            self.emit_error(AgentErrorKind::SipAuthFailed, e.to_string());
            self.fail_dialog(id);
            return;
        }

        let Some(previous) = dialog.invite_request.clone() else {
            self.fail_dialog(id);
            return;
        };

        dialog.local_cseq += 1;

        let uri = previous.line.uri.clone();
        let cseq = dialog.local_cseq;
        let target = dialog.remote_target;

        let mut request = previous;

        // fresh transaction: new branch, bumped CSeq, new credentials
        request.headers.remove(&Name::Via);
        let via = Via::new(
            "UDP",
            HostPort::from(self.advertised),
            Endpoint::create_branch(),
        );
        request.headers.insert(&via);

        request.headers.replace(&CSeq {
            cseq,
            method: Method::INVITE,
        });

        let dialog = self.dialogs.get_mut(id).expect("looked up above");
        dialog
            .auth
            .authorize_request(&mut request.headers, &Method::INVITE, &uri.to_string());
        dialog.invite_request = Some(request.clone());

        match self.endpoint.send_request(request, target, Instant::now()) {
            Ok(tsx) => {
                if let Some(dialog) = self.dialogs.get_mut(id) {
                    dialog.invite_tsx = Some(tsx);
                }
            }
            Err(e) => {
                self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
                self.fail_dialog(id);
            }
        }
    }

    fn confirm_outgoing(&mut self, id: DialogId, response: Response, _now: Instant) {
        let Some(dialog) = self.dialogs.get_mut(id) else {
            return;
        };

        // remote tag establishes the dialog
        if let Some(to) = response.headers.get_all_named::<FromTo>(&Name::To).pop() {
            dialog.remote_tag = to.tag;
        }

        // prefer the peer's contact for in-dialog requests
        if let Some(contact) = response
            .headers
            .get_all_named::<Contact>(&Name::Contact)
            .pop()
        {
            if let Some(addr) = contact.addr.uri.host_port.socket_addr() {
                dialog.remote_target = addr;
            }
        }

        let remote_sdp = extract_sdp(&response.headers, &response.body);

        // acknowledge before driving media
        let ack = self.build_ack(id, &response);

        let Some(dialog) = self.dialogs.get_mut(id) else {
            return;
        };

        if let Some(ack) = ack {
            let data = Bytes::from(ack.print());
            dialog.cached_ack = Some(data.clone());
            self.endpoint.transmit_raw(data, self.dialogs[id].remote_target);
        }

        match remote_sdp {
            Some(sdp) => {
                let dialog = self.dialogs.get_mut(id).expect("looked up above");
                dialog.remote_sdp = Some(sdp.clone());

                if let Some(media) = &mut dialog.media {
                    if let Err(e) = media.set_remote_sdp(&sdp) {
                        self.emit_error(AgentErrorKind::MediaSdpFailed, e.to_string());
                    } else if let Err(e) = media.start_ice() {
                        self.emit_error(AgentErrorKind::MediaIceFailed, e.to_string());
                    }
                }

                self.transition(id, DialogState::Confirmed);
            }
            None => {
                // a session without a description is useless, tear it down
                self.emit_error(
                    AgentErrorKind::MediaSdpFailed,
                    "200 OK without a session description",
                );
                self.transition(id, DialogState::Confirmed);
                let _ = self.hangup(id);
            }
        }
    }

    /// In-dialog ACK for a 2xx response
    fn build_ack(&mut self, id: DialogId, response: &Response) -> Option<Request> {
        let dialog = self.dialogs.get(id)?;

        let invite_cseq = response
            .headers
            .get::<CSeq>()
            .map(|c| c.cseq)
            .unwrap_or(dialog.local_cseq);

        let from = FromTo {
            addr: dialog.local.clone(),
            tag: Some(dialog.local_tag.clone()),
            params: Default::default(),
        };
        let to = FromTo {
            addr: dialog.remote.clone(),
            tag: dialog.remote_tag.clone(),
            params: Default::default(),
        };
        let call_id = dialog.call_id.clone();
        let uri = dialog.remote.uri.clone();

        let mut ack = self.new_request(Method::ACK, uri, &from, &to, &call_id, invite_cseq);

        // ACK for a 2xx is its own transaction with a fresh branch; CSeq
        // matches the INVITE
        ack.headers.replace(&CSeq {
            cseq: invite_cseq,
            method: Method::ACK,
        });

        Some(ack)
    }

    /// Tear down a confirmed call
    pub fn hangup(&mut self, id: DialogId) -> Result<(), AgentError> {
        let dialog = self.dialogs.get_mut(id).ok_or(AgentError::DialogNotFound)?;

        if dialog.state != DialogState::Confirmed {
            return Err(AgentError::InvalidDialogState(dialog.state));
        }

        dialog.local_cseq += 1;

        let from = FromTo {
            addr: dialog.local.clone(),
            tag: Some(dialog.local_tag.clone()),
            params: Default::default(),
        };
        let to = FromTo {
            addr: dialog.remote.clone(),
            tag: dialog.remote_tag.clone(),
            params: Default::default(),
        };
        let call_id = dialog.call_id.clone();
        let cseq = dialog.local_cseq;
        let uri = dialog.remote.uri.clone();
        let target = dialog.remote_target;

        let request = self.new_request(Method::BYE, uri, &from, &to, &call_id, cseq);

        if let Err(e) = self.endpoint.send_request(request, target, Instant::now()) {
            self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
        }

        // terminated regardless of the BYE's fate; the transaction layer
        // retransmits on its own
        self.terminate_dialog(id);

        Ok(())
    }

    // === Calls, UAS side ===

    fn handle_incoming_invite(&mut self, incoming: IncomingRequest, now: Instant) {
        let request = incoming.request;
        let source = incoming.source;
        let Some(tsx) = incoming.tsx else {
            return;
        };

        let (Ok(from), Ok(call_id)) = (
            request
                .headers
                .get_all_named::<FromTo>(&Name::From)
                .pop()
                .ok_or(()),
            request.headers.get::<CallId>(),
        ) else {
            let response = Self::response_for(&request, StatusCode::BAD_REQUEST, None);
            let _ = self.endpoint.respond_final(tsx, &response, now);
            return;
        };

        // in-dialog INVITE (re-INVITE) is out of scope
        let existing = self
            .dialogs
            .iter()
            .any(|(_, d)| d.call_id == call_id.0);

        if existing {
            let response = Self::response_for(&request, StatusCode::NOT_ACCEPTABLE_HERE, None);
            let _ = self.endpoint.respond_final(tsx, &response, now);
            return;
        }

        if self.dialogs.len() >= self.config.max_dialogs {
            log::warn!("dialog table full, answering busy");
            let response = Self::response_for(&request, StatusCode::BUSY_HERE, None);
            let _ = self.endpoint.respond_final(tsx, &response, now);
            return;
        }

        let local_tag = Dialog::tag();

        let to_addr = request
            .headers
            .get_all_named::<FromTo>(&Name::To)
            .pop()
            .map(|to| to.addr)
            .unwrap_or_else(|| self.address_of_record());

        let remote_sdp = extract_sdp(&request.headers, &request.body);

        let mut media = MediaSession::new(
            self.config.media.session_config(CallDevices::default()),
            /* controlling: */ false,
        );

        if let Some(sdp) = &remote_sdp {
            if let Err(e) = media.set_remote_sdp(sdp) {
                self.emit_error(AgentErrorKind::MediaSdpFailed, e.to_string());
                let response = Self::response_for(&request, StatusCode::BAD_REQUEST, None);
                let _ = self.endpoint.respond_final(tsx, &response, now);
                return;
            }
        }

        // ring until the application decides
        let mut ringing = Self::response_for(&request, StatusCode::RINGING, Some(&local_tag));
        ringing.headers.insert(&self.contact());
        let _ = self.endpoint.respond_provisional(tsx, &ringing);

        let dialog = Dialog {
            state: DialogState::Incoming,
            direction: CallDirection::Incoming,
            call_id: call_id.0,
            local: to_addr,
            remote: from.addr.clone(),
            local_tag,
            remote_tag: from.tag.clone(),
            remote_target: source,
            local_cseq: 0,
            invite_tsx: Some(tsx),
            invite_request: Some(request),
            cached_ack: None,
            media: Some(media),
            remote_sdp,
            invite_sent: false,
            answered: false,
            cancelled: false,
            auth: DigestAuthenticator::new(self.credentials.clone()),
            auth_retried: false,
        };

        let id = self.dialogs.insert(dialog);

        self.events.push_back(AgentEvent::IncomingCall {
            dialog: id,
            from: self.dialogs[id].remote.clone(),
        });
    }

    /// Accept an incoming call; the 200 OK leaves once the local media
    /// description is ready
    pub fn answer_call(&mut self, id: DialogId, devices: CallDevices) -> Result<(), AgentError> {
        let dialog = self.dialogs.get_mut(id).ok_or(AgentError::DialogNotFound)?;

        if dialog.state != DialogState::Incoming {
            return Err(AgentError::InvalidDialogState(dialog.state));
        }

        let media = dialog.media.as_mut().ok_or(AgentError::DialogNotFound)?;

        if let Some(capture) = devices.audio_capture {
            media.attach_audio_capture(capture);
        }
        if let Some(playback) = devices.audio_playback {
            media.attach_audio_playback(playback);
        }
        if let Some(record) = devices.audio_record {
            media.attach_audio_record(record);
        }

        media.gather_candidates()?;
        dialog.answered = true;

        Ok(())
    }

    /// Turn an incoming call away with the given status (typically 486 or
    /// 603)
    pub fn reject_call(
        &mut self,
        id: DialogId,
        status: StatusCode,
        reason: Option<&str>,
    ) -> Result<(), AgentError> {
        let dialog = self.dialogs.get(id).ok_or(AgentError::DialogNotFound)?;

        if dialog.state != DialogState::Incoming {
            return Err(AgentError::InvalidDialogState(dialog.state));
        }

        let (Some(tsx), Some(request)) = (dialog.invite_tsx, dialog.invite_request.as_ref()) else {
            return Err(AgentError::DialogNotFound);
        };

        let mut response = Self::response_for(request, status, Some(&dialog.local_tag));
        response.line.reason = reason.map(BytesStr::from);

        let _ = self.endpoint.respond_final(tsx, &response, Instant::now());

        self.terminate_dialog(id);

        Ok(())
    }

    /// 200 OK with the local SDP, sent once the media session is gathered
    fn answer_with_sdp(&mut self, id: DialogId, sdp: &SessionDescription) {
        let Some(dialog) = self.dialogs.get(id) else {
            return;
        };

        let (Some(tsx), Some(request)) = (dialog.invite_tsx, dialog.invite_request.as_ref()) else {
            return;
        };

        let mut response = Self::response_for(request, StatusCode::OK, Some(&dialog.local_tag));
        response.headers.insert(&self.contact());
        response
            .headers
            .insert(&ContentType(BytesStr::from_static(SDP_CONTENT_TYPE)));
        response.body = Bytes::from(sdp.to_string());

        if let Err(e) = self.endpoint.respond_final(tsx, &response, Instant::now()) {
            self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
            self.fail_dialog(id);
        }
    }

    fn handle_ack(&mut self, incoming: &IncomingRequest) {
        let Ok(call_id) = incoming.request.headers.get::<CallId>() else {
            return;
        };

        let found = self
            .dialogs
            .iter()
            .find(|(_, d)| d.call_id == call_id.0)
            .map(|(id, _)| id);

        let Some(id) = found else {
            return;
        };

        let dialog = &mut self.dialogs[id];

        if dialog.state == DialogState::Incoming && dialog.answered {
            if let Some(media) = &mut dialog.media {
                if media.state() == MediaSessionState::Gathered {
                    if let Err(e) = media.start_ice() {
                        let message = e.to_string();
                        self.emit_error(AgentErrorKind::MediaIceFailed, message);
                    }
                }
            }

            self.transition(id, DialogState::Confirmed);
        }
    }

    fn handle_bye(&mut self, incoming: &IncomingRequest, now: Instant) {
        let Some(tsx) = incoming.tsx else {
            return;
        };

        let response = Self::response_for(&incoming.request, StatusCode::OK, None);
        let _ = self.endpoint.respond_final(tsx, &response, now);

        let call_id = match incoming.request.headers.get::<CallId>() {
            Ok(call_id) => call_id,
            Err(_) => return,
        };

        let found = self
            .dialogs
            .iter()
            .find(|(_, d)| d.call_id == call_id.0)
            .map(|(id, _)| id);

        if let Some(id) = found {
            self.terminate_dialog(id);
        }
    }

    fn handle_cancel(&mut self, incoming: &IncomingRequest, now: Instant) {
        let Some(tsx) = incoming.tsx else {
            return;
        };

        // the CANCEL itself is answered 200 regardless
        let response = Self::response_for(&incoming.request, StatusCode::OK, None);
        let _ = self.endpoint.respond_final(tsx, &response, now);

        let Ok(call_id) = incoming.request.headers.get::<CallId>() else {
            return;
        };

        let found = self
            .dialogs
            .iter()
            .find(|(_, d)| d.call_id == call_id.0 && d.state == DialogState::Incoming)
            .map(|(id, _)| id);

        let Some(id) = found else {
            return;
        };

        // answer the INVITE with 487 and end the dialog
        let dialog = &self.dialogs[id];

        if let (Some(invite_tsx), Some(request)) = (dialog.invite_tsx, dialog.invite_request.as_ref())
        {
            let response = Self::response_for(
                request,
                StatusCode::REQUEST_TERMINATED,
                Some(&dialog.local_tag),
            );
            let _ = self.endpoint.respond_final(invite_tsx, &response, now);
        }

        self.terminate_dialog(id);
    }

    fn handle_request(&mut self, incoming: IncomingRequest, now: Instant) {
        let method = incoming.request.line.method.clone();

        if method == Method::INVITE {
            self.handle_incoming_invite(incoming, now);
        } else if method == Method::ACK {
            self.handle_ack(&incoming);
        } else if method == Method::BYE {
            self.handle_bye(&incoming, now);
        } else if method == Method::CANCEL {
            self.handle_cancel(&incoming, now);
        } else if let Some(tsx) = incoming.tsx {
            let status = if method == Method::OPTIONS {
                StatusCode::OK
            } else {
                StatusCode::METHOD_NOT_ALLOWED
            };

            let mut response = Self::response_for(&incoming.request, status, None);
            response.headers.insert(&self.allow());
            let _ = self.endpoint.respond_final(tsx, &response, now);
        }
    }

    // === Dialog lifecycle ===

    fn transition(&mut self, id: DialogId, new: DialogState) {
        let Some(dialog) = self.dialogs.get_mut(id) else {
            return;
        };

        if dialog.state == new {
            return;
        }

        // terminal states are final; only failed -> terminated is allowed
        if dialog.state.is_terminal()
            && !(dialog.state == DialogState::Failed && new == DialogState::Terminated)
        {
            return;
        }

        let previous = dialog.state;
        dialog.state = new;

        self.events.push_back(AgentEvent::DialogStateChanged {
            dialog: id,
            previous,
            state: new,
        });
    }

    /// failed, then terminated, then gone
    fn fail_dialog(&mut self, id: DialogId) {
        self.transition(id, DialogState::Failed);
        self.transition(id, DialogState::Terminated);
        self.destroy_dialog(id);
    }

    fn terminate_dialog(&mut self, id: DialogId) {
        self.transition(id, DialogState::Terminated);
        self.destroy_dialog(id);
    }

    fn destroy_dialog(&mut self, id: DialogId) {
        if let Some(mut dialog) = self.dialogs.remove(id) {
            if let Some(tsx) = dialog.invite_tsx.take() {
                self.endpoint.abort_tsx(tsx);
            }

            // dropping the media session closes its sockets
            dialog.media = None;
        }
    }

    /// Terminate every remaining dialog (best-effort BYE for confirmed
    /// calls) and drop the registration binding
    pub fn shutdown(&mut self) {
        let ids: Vec<DialogId> = self.dialogs.keys().collect();

        for id in ids {
            match self.dialogs[id].state {
                DialogState::Confirmed => {
                    let _ = self.hangup(id);
                }
                DialogState::Incoming => {
                    let _ = self.reject_call(id, StatusCode::SERVICE_UNAVAILABLE, None);
                }
                _ => self.terminate_dialog(id),
            }
        }

        self.stop();

        // flush the queued BYEs and responses
        self.pump_signaling(Instant::now());
    }

    // === Media plumbing ===

    fn handle_media_event(&mut self, id: DialogId, event: MediaSessionEvent) {
        match event {
            MediaSessionEvent::SdpReady(sdp) => {
                let Some(dialog) = self.dialogs.get(id) else {
                    return;
                };

                match dialog.direction {
                    CallDirection::Outgoing if !dialog.invite_sent && !dialog.cancelled => {
                        self.send_invite(id, &sdp);
                    }
                    CallDirection::Incoming if dialog.answered => {
                        self.answer_with_sdp(id, &sdp);
                    }
                    _ => {}
                }
            }
            MediaSessionEvent::Error(e) => {
                let kind = match &e {
                    media_session::MediaSessionError::IceFailed => AgentErrorKind::MediaIceFailed,
                    _ => AgentErrorKind::MediaSdpFailed,
                };
                self.emit_error(kind, e.to_string());
            }
            MediaSessionEvent::Connected => {
                log::debug!("media connected for dialog {id:?}");
            }
            MediaSessionEvent::Disconnected
            | MediaSessionEvent::StateChanged { .. }
            | MediaSessionEvent::NewCandidate(_) => {}
        }
    }

    fn drive_media(&mut self, budget: Duration) {
        let ids: Vec<DialogId> = self.dialogs.keys().collect();

        for id in ids {
            let mut pending = vec![];

            if let Some(dialog) = self.dialogs.get_mut(id) {
                if let Some(media) = &mut dialog.media {
                    media.run(budget);

                    while let Some(event) = media.pop_event() {
                        pending.push(event);
                    }
                }
            }

            for event in pending {
                self.handle_media_event(id, event);
            }
        }
    }

    // === Main loops ===

    /// Pump signaling: socket, transactions, timers and media state
    /// machines. Returns within `budget`.
    pub fn run(&mut self, budget: Duration) {
        let deadline = Instant::now() + budget;

        loop {
            let now = Instant::now();

            self.pump_signaling(now);
            self.drive_media(Duration::ZERO);

            let now = Instant::now();
            if now >= deadline {
                return;
            }

            std::thread::sleep(Duration::from_millis(1).min(deadline - now));
        }
    }

    /// Pump only the media planes of all calls. Intended for the
    /// two-thread deployment; with a single loop it is simply called after
    /// [`run`](Agent::run).
    pub fn run_media(&mut self, budget: Duration) {
        let dialogs = self.dialogs.len().max(1) as u32;
        self.drive_media(budget / dialogs);
    }

    fn pump_signaling(&mut self, now: Instant) {
        let mut incoming: Vec<(Vec<u8>, SocketAddr)> = vec![];

        if let Err(e) = self.socket.run(Duration::ZERO, &mut |pkt| {
            incoming.push((pkt.data, pkt.source));
        }) {
            log::warn!("signaling socket receive failed: {e}");
        }

        for (data, source) in incoming {
            match PacketKind::identify(&data) {
                PacketKind::Sip => self.endpoint.receive(&data, source, now),
                PacketKind::KeepAliveProbe => {
                    let _ = self.socket.send(b"\r\n", Some(source));
                }
                PacketKind::KeepAliveReply => {}
                kind => {
                    log::trace!("dropping {kind:?} datagram on the signaling socket");
                }
            }
        }

        self.endpoint.poll(now);
        self.process_endpoint_events(now);
        self.process_timers(now);
    }

    fn process_timers(&mut self, now: Instant) {
        while let Some((_, timer)) = self.timers.pop_expired(now) {
            match timer {
                AgentTimer::RegisterRefresh => {
                    if self.registration_state() == RegistrationState::Registered {
                        log::debug!("refreshing registrar binding");
                        self.set_registration_state(RegistrationState::Registering);

                        if let Err(e) = self.send_register(false) {
                            self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
                            self.registration_failed(None);
                        }
                    }
                }
            }
        }
    }

    fn process_endpoint_events(&mut self, now: Instant) {
        while let Some(event) = self.endpoint.pop_event() {
            match event {
                EndpointEvent::Transmit { target, data } => {
                    if let Err(e) = self.socket.send(&data, Some(target)) {
                        self.emit_error(AgentErrorKind::SipSendFailed, e.to_string());
                    }
                }
                EndpointEvent::ReceivedRequest(incoming) => {
                    self.handle_request(incoming, now);
                }
                EndpointEvent::TsxResponse { tsx, response } => {
                    self.handle_response(tsx, response, now);
                }
                EndpointEvent::TsxTimeout { tsx } => {
                    self.handle_tsx_timeout(tsx);
                }
                EndpointEvent::TsxTerminated { .. } => {}
            }
        }
    }

    fn handle_response(&mut self, tsx: TsxKey, response: Response, now: Instant) {
        let is_registration = self
            .registration
            .as_ref()
            .is_some_and(|r| r.tsx == Some(tsx));

        if is_registration {
            self.handle_registration_response(response, now);
            return;
        }

        let dialog = self
            .dialogs
            .iter()
            .find(|(_, d)| d.invite_tsx == Some(tsx))
            .map(|(id, _)| id);

        if let Some(id) = dialog {
            self.handle_invite_response(id, response, now);
            return;
        }

        // responses to CANCEL or BYE of dialogs already gone
        log::debug!(
            "ignoring response with status {} outside any call",
            response.line.code
        );
    }

    fn handle_tsx_timeout(&mut self, tsx: TsxKey) {
        let is_registration = self
            .registration
            .as_ref()
            .is_some_and(|r| r.tsx == Some(tsx));

        if is_registration {
            self.emit_error(AgentErrorKind::SipTimeout, "REGISTER timed out");
            self.registration_failed(None);
            return;
        }

        let dialog = self
            .dialogs
            .iter()
            .find(|(_, d)| d.invite_tsx == Some(tsx))
            .map(|(id, _)| id);

        if let Some(id) = dialog {
            self.emit_error(AgentErrorKind::SipTimeout, "call signaling timed out");
            self.fail_dialog(id);
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_host(host: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4())
}

fn extract_sdp(headers: &sip_types::header::Headers, body: &[u8]) -> Option<String> {
    let content_type = headers.try_get::<ContentType>().ok().flatten()?;

    if !content_type
        .0
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .eq_ignore_ascii_case(SDP_CONTENT_TYPE)
    {
        return None;
    }

    if body.is_empty() {
        return None;
    }

    std::str::from_utf8(body).ok().map(str::to_string)
}
