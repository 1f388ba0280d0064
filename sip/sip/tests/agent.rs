//! End-to-end agent scenarios against stubbed peers on the loopback
//! interface. The stubs speak just enough SIP to drive the agent through
//! its state machines.

use bytesstr::BytesStr;
use media_session::{AudioConfig, MediaSession, MediaSessionConfig, MediaSessionEvent};
use rtp::Codec;
use sip_types::header::TypedHeader as _;
use sipkit_sip::{
    Agent, AgentConfig, AgentEvent, CallDevices, DialogId, DialogState, RegistrationState,
    StatusCode,
};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

struct StubPeer {
    socket: UdpSocket,
}

impl StubPeer {
    fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        Self { socket }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn try_recv(&self) -> Option<(String, SocketAddr)> {
        let mut buf = [0u8; 65535];

        match self.socket.recv_from(&mut buf) {
            Ok((len, source)) => Some((
                String::from_utf8_lossy(&buf[..len]).into_owned(),
                source,
            )),
            Err(_) => None,
        }
    }

    fn send(&self, data: &str, to: SocketAddr) {
        self.socket.send_to(data.as_bytes(), to).unwrap();
    }
}

/// Value of the first `name` header of a raw message
fn header(msg: &str, name: &str) -> Option<String> {
    msg.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
    })
}

fn body_of(msg: &str) -> &str {
    msg.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

/// Response echoing the request's transaction headers
fn response_for(
    request: &str,
    code: u16,
    reason: &str,
    to_tag: Option<&str>,
    extra_headers: &[String],
    body: &str,
) -> String {
    let via = header(request, "Via").unwrap();
    let from = header(request, "From").unwrap();
    let mut to = header(request, "To").unwrap();
    let call_id = header(request, "Call-ID").unwrap();
    let cseq = header(request, "CSeq").unwrap();

    if let Some(tag) = to_tag {
        if !to.contains("tag=") {
            to = format!("{to};tag={tag}");
        }
    }

    let mut msg = format!(
        "SIP/2.0 {code} {reason}\r\n\
         Via: {via}\r\n\
         From: {from}\r\n\
         To: {to}\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: {cseq}\r\n"
    );

    for extra in extra_headers {
        msg.push_str(extra);
        msg.push_str("\r\n");
    }

    msg.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    msg
}

fn agent_for(stub: &StubPeer) -> Agent {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = AgentConfig::default();
    config.username = "1001".into();
    config.password = "secret".into();
    config.registrar_host = "127.0.0.1".into();
    config.registrar_port = stub.addr().port();
    config.bind_addr = "127.0.0.1".parse().unwrap();
    config.media.audio_codec = Codec::Pcma;

    Agent::new(config).unwrap()
}

fn collect_events(agent: &mut Agent, into: &mut Vec<AgentEvent>) {
    while let Some(event) = agent.pop_event() {
        into.push(event);
    }
}

/// Successful registration against a registrar
#[test]
fn register_success() {
    let stub = StubPeer::new();
    let mut agent = agent_for(&stub);

    agent.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = vec![];
    let mut registered = false;

    while !registered && Instant::now() < deadline {
        agent.run(Duration::from_millis(10));
        collect_events(&mut agent, &mut events);

        if let Some((request, source)) = stub.try_recv() {
            assert!(request.starts_with("REGISTER "));
            assert!(header(&request, "Contact").is_some());

            stub.send(
                &response_for(&request, 200, "OK", Some("reg"), &[], ""),
                source,
            );
        }

        registered = events.iter().any(|event| {
            matches!(
                event,
                AgentEvent::RegisterResult {
                    success: true,
                    status: Some(code)
                } if code.into_u16() == 200
            )
        });
    }

    assert!(registered, "registration never succeeded: {events:?}");
    assert_eq!(agent.registration_state(), RegistrationState::Registered);
}

/// A 401 challenge is answered with an RFC 2617 MD5 digest
#[test]
fn register_auth_retry() {
    let stub = StubPeer::new();
    let mut agent = agent_for(&stub);

    agent.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = vec![];
    let mut challenged = false;
    let mut registered = false;

    while !registered && Instant::now() < deadline {
        agent.run(Duration::from_millis(10));
        collect_events(&mut agent, &mut events);

        if let Some((request, source)) = stub.try_recv() {
            let authorization = header(&request, "Authorization");

            match authorization {
                None => {
                    assert!(!challenged, "agent retried without credentials");
                    challenged = true;

                    stub.send(
                        &response_for(
                            &request,
                            401,
                            "Unauthorized",
                            Some("reg"),
                            &["WWW-Authenticate: Digest realm=\"example.org\", nonce=\"abc123\""
                                .to_string()],
                            "",
                        ),
                        source,
                    );
                }
                Some(authorization) => {
                    assert!(challenged);

                    let parsed = sip_types::header::typed::DigestResponse::decode(
                        &BytesStr::from(authorization),
                    )
                    .unwrap();

                    // RFC 2617: MD5(HA1:nonce:HA2)
                    let uri = &*parsed.uri;
                    let ha1 = format!("{:x}", md5::compute(b"1001:example.org:secret"));
                    let ha2 = format!("{:x}", md5::compute(format!("REGISTER:{uri}")));
                    let expected =
                        format!("{:x}", md5::compute(format!("{ha1}:abc123:{ha2}")));

                    assert_eq!(&*parsed.response, expected);

                    stub.send(
                        &response_for(&request, 200, "OK", Some("reg"), &[], ""),
                        source,
                    );
                }
            }
        }

        registered = events
            .iter()
            .any(|event| matches!(event, AgentEvent::RegisterResult { success: true, .. }));
    }

    assert!(registered, "auth retry never completed: {events:?}");
}

/// INVITE answered 180 then 486; the dialog runs
/// calling -> early -> failed -> terminated
#[test]
fn outgoing_call_busy() {
    let stub = StubPeer::new();
    let mut agent = agent_for(&stub);

    // no registration needed to place calls
    let dialog = agent
        .make_call(&format!("sip:1002@{}", stub.addr()), CallDevices::default())
        .unwrap();

    assert_eq!(agent.dialog_state(dialog), Some(DialogState::Calling));

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = vec![];
    let mut saw_invite = false;

    while Instant::now() < deadline {
        agent.run(Duration::from_millis(10));
        collect_events(&mut agent, &mut events);

        if let Some((request, source)) = stub.try_recv() {
            if request.starts_with("INVITE ") {
                saw_invite = true;

                assert!(body_of(&request).contains("a=candidate"));

                stub.send(
                    &response_for(&request, 180, "Ringing", Some("callee"), &[], ""),
                    source,
                );
                stub.send(
                    &response_for(&request, 486, "Busy Here", Some("callee"), &[], ""),
                    source,
                );
            }
            // the ACK for the 486 needs no reply
        }

        if agent.dialog_state(dialog).is_none() {
            break;
        }
    }

    assert!(saw_invite, "INVITE never reached the peer");

    let states: Vec<DialogState> = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::DialogStateChanged { dialog: d, state, .. } if *d == dialog => {
                Some(*state)
            }
            _ => None,
        })
        .collect();

    assert_eq!(
        states,
        [DialogState::Early, DialogState::Failed, DialogState::Terminated],
    );

    // the dialog (and its media session) is gone, the handle is stale
    assert_eq!(agent.dialog_state(dialog), None);
    assert!(agent
        .reject_call(dialog, StatusCode::DECLINE, None)
        .is_err());
}

/// Media session used by the test stubs to terminate the media plane
fn stub_media(controlling: bool) -> MediaSession {
    let config = MediaSessionConfig {
        audio: Some(AudioConfig::new(Codec::Pcma)),
        ..Default::default()
    };

    MediaSession::new(config, controlling)
}

fn gather_stub_sdp(media: &mut MediaSession) -> String {
    let deadline = Instant::now() + Duration::from_secs(6);

    loop {
        media.run(Duration::from_millis(5));

        while let Some(event) = media.pop_event() {
            if let MediaSessionEvent::SdpReady(sdp) = event {
                return sdp.to_string();
            }
        }

        assert!(Instant::now() < deadline, "stub media never gathered");
    }
}

/// Full outgoing call with media connect and hangup
#[test]
fn outgoing_call_full() {
    let stub = StubPeer::new();
    let mut agent = agent_for(&stub);

    let dialog = agent
        .make_call(&format!("sip:1002@{}", stub.addr()), CallDevices::default())
        .unwrap();

    let mut stub_session: Option<MediaSession> = None;
    let mut events = vec![];
    let mut confirmed = false;
    let mut media_connected = false;
    let mut hangup_sent = false;
    let mut terminated = false;
    let mut saw_ack = false;

    let deadline = Instant::now() + Duration::from_secs(20);

    while !terminated && Instant::now() < deadline {
        agent.run(Duration::from_millis(5));
        collect_events(&mut agent, &mut events);

        if let Some(media) = &mut stub_session {
            media.run(Duration::from_millis(5));
            while media.pop_event().is_some() {}
        }

        if let Some((request, source)) = stub.try_recv() {
            if request.starts_with("INVITE ") {
                // stub UAS: ring, then answer with its own media session
                stub.send(
                    &response_for(&request, 180, "Ringing", Some("callee"), &[], ""),
                    source,
                );

                if stub_session.is_none() {
                    let mut media = stub_media(false);
                    media.set_remote_sdp(body_of(&request)).unwrap();
                    media.gather_candidates().unwrap();
                    let answer = gather_stub_sdp(&mut media);

                    stub.send(
                        &response_for(
                            &request,
                            200,
                            "OK",
                            Some("callee"),
                            &[
                                "Content-Type: application/sdp".to_string(),
                                format!("Contact: <sip:1002@{source_addr}>", source_addr = stub.addr()),
                            ],
                            &answer,
                        ),
                        source,
                    );

                    media.start_ice().unwrap();
                    stub_session = Some(media);
                }
            } else if request.starts_with("ACK ") {
                saw_ack = true;
            } else if request.starts_with("BYE ") {
                stub.send(&response_for(&request, 200, "OK", None, &[], ""), source);
            }
        }

        confirmed = confirmed
            || agent.dialog_state(dialog) == Some(DialogState::Confirmed);

        if confirmed && !media_connected {
            media_connected = agent.media_state(dialog)
                == Some(media_session::MediaSessionState::Connected);
        }

        if media_connected && !hangup_sent {
            assert!(agent.call_stats(dialog).is_some());
            agent.hangup(dialog).unwrap();
            hangup_sent = true;
        }

        terminated = hangup_sent && agent.dialog_state(dialog).is_none();
    }

    assert!(confirmed, "dialog never confirmed: {events:?}");
    assert!(saw_ack, "2xx was never acknowledged");
    assert!(media_connected, "media never connected");
    assert!(terminated, "hangup never terminated the dialog");
}

/// Inbound call, answered locally, terminated by the peer
#[test]
fn inbound_call_answer_peer_hangup() {
    let stub = StubPeer::new();
    let mut agent = agent_for(&stub);

    // the stub caller prepares its offer first
    let mut caller_media = stub_media(true);
    caller_media.gather_candidates().unwrap();
    let offer = gather_stub_sdp(&mut caller_media);

    let branch = "z9hG4bKstub1";
    let invite = format!(
        "INVITE sip:1001@{agent_addr} SIP/2.0\r\n\
         Via: SIP/2.0/UDP {stub_addr};branch={branch}\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:2002@example.org>;tag=caller\r\n\
         To: <sip:1001@example.org>\r\n\
         Call-ID: inbound-test-1\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:2002@{stub_addr}>\r\n\
         Content-Type: application/sdp\r\n\
         Content-Length: {len}\r\n\r\n{offer}",
        agent_addr = agent.local_addr(),
        stub_addr = stub.addr(),
        len = offer.len(),
    );

    stub.send(&invite, agent.local_addr());

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut events = vec![];
    let mut incoming: Option<DialogId> = None;
    let mut answered = false;
    let mut got_ok = false;
    let mut sent_bye = false;
    let mut terminated = false;

    while !terminated && Instant::now() < deadline {
        agent.run(Duration::from_millis(5));
        collect_events(&mut agent, &mut events);

        caller_media.run(Duration::from_millis(5));
        while caller_media.pop_event().is_some() {}

        // react to the incoming call event
        if incoming.is_none() {
            incoming = events.iter().find_map(|event| match event {
                AgentEvent::IncomingCall { dialog, from } => {
                    assert_eq!(from.uri.user.as_deref(), Some("2002"));
                    Some(*dialog)
                }
                _ => None,
            });
        }

        if let Some(dialog) = incoming {
            if !answered {
                agent.answer_call(dialog, CallDevices::default()).unwrap();

                // a second answer is an invalid state
                assert!(agent.answer_call(dialog, CallDevices::default()).is_err());
                answered = true;
            }
        }

        if let Some((message, _)) = stub.try_recv() {
            if message.starts_with("SIP/2.0 200") && header(&message, "CSeq")
                .is_some_and(|c| c.contains("INVITE"))
            {
                if !got_ok {
                    got_ok = true;

                    // complete the handshake: media answer + ACK
                    caller_media.set_remote_sdp(body_of(&message)).unwrap();
                    caller_media.start_ice().unwrap();

                    let to = header(&message, "To").unwrap();
                    let ack = format!(
                        "ACK sip:1001@{agent_addr} SIP/2.0\r\n\
                         Via: SIP/2.0/UDP {stub_addr};branch=z9hG4bKstub2\r\n\
                         From: <sip:2002@example.org>;tag=caller\r\n\
                         To: {to}\r\n\
                         Call-ID: inbound-test-1\r\n\
                         CSeq: 1 ACK\r\n\
                         Content-Length: 0\r\n\r\n",
                        agent_addr = agent.local_addr(),
                        stub_addr = stub.addr(),
                    );

                    stub.send(&ack, agent.local_addr());
                }
            }
        }

        if got_ok && !sent_bye {
            if let Some(dialog) = incoming {
                if agent.dialog_state(dialog) == Some(DialogState::Confirmed) {
                    let bye = format!(
                        "BYE sip:1001@{agent_addr} SIP/2.0\r\n\
                         Via: SIP/2.0/UDP {stub_addr};branch=z9hG4bKstub3\r\n\
                         From: <sip:2002@example.org>;tag=caller\r\n\
                         To: <sip:1001@example.org>;tag=whatever\r\n\
                         Call-ID: inbound-test-1\r\n\
                         CSeq: 2 BYE\r\n\
                         Content-Length: 0\r\n\r\n",
                        agent_addr = agent.local_addr(),
                        stub_addr = stub.addr(),
                    );

                    stub.send(&bye, agent.local_addr());
                    sent_bye = true;
                }
            }
        }

        if sent_bye {
            if let Some(dialog) = incoming {
                terminated = agent.dialog_state(dialog).is_none();
            }
        }
    }

    assert!(incoming.is_some(), "incoming call never surfaced: {events:?}");
    assert!(got_ok, "agent never answered with 200 OK");
    assert!(terminated, "peer BYE never terminated the dialog");

    let dialog = incoming.unwrap();
    let states: Vec<DialogState> = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::DialogStateChanged { dialog: d, state, .. } if *d == dialog => {
                Some(*state)
            }
            _ => None,
        })
        .collect();

    assert!(states.contains(&DialogState::Confirmed));
    assert_eq!(states.last(), Some(&DialogState::Terminated));
}

/// Boundary: cancelling before the INVITE went out terminates cleanly
#[test]
fn cancel_before_invite() {
    let stub = StubPeer::new();
    let mut agent = agent_for(&stub);

    let dialog = agent
        .make_call(&format!("sip:1002@{}", stub.addr()), CallDevices::default())
        .unwrap();

    // cancel immediately, before the media session produced an offer
    agent.cancel_call(dialog).unwrap();

    assert_eq!(agent.dialog_state(dialog), None);

    let mut events = vec![];
    collect_events(&mut agent, &mut events);

    let states: Vec<DialogState> = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::DialogStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();

    assert_eq!(states, [DialogState::Terminated]);
}
