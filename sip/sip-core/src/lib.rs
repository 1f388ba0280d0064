//! sans-io SIP protocol engine: transactions with retransmission timers and
//! a one-shot timer queue, both driven by `poll(now)`.

use sip_types::header::HeaderError;

mod endpoint;
mod timer;
mod transaction;

pub use endpoint::{Endpoint, EndpointEvent, IncomingRequest};
pub use timer::{TimerId, TimerQueue};
pub use transaction::TsxKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("request is missing a Via branch")]
    MissingBranch,
    #[error("unknown or expired transaction")]
    UnknownTransaction,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

#[cfg(test)]
mod test {
    use super::*;
    use sip_types::header::typed::{CSeq, Via};
    use sip_types::header::Name;
    use sip_types::{Method, Request, Response, StatusCode};
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    fn peer() -> SocketAddr {
        "192.0.2.7:5060".parse().unwrap()
    }

    fn request(method: Method) -> Request {
        let mut request = Request::new(method.clone(), "sip:test@example.org".parse().unwrap());

        request.headers.insert(&Via::new(
            "UDP",
            "192.0.2.1:5060".parse::<SocketAddr>().unwrap().into(),
            Endpoint::create_branch(),
        ));
        request.headers.push(Name::From, "<sip:me@example.org>;tag=a1");
        request.headers.push(Name::To, "<sip:test@example.org>");
        request.headers.push(Name::CallId, "test-call-id");
        request.headers.insert(&CSeq { cseq: 1, method });

        request
    }

    /// Build the peer's response by echoing the request head
    fn response_for(data: &[u8], code: StatusCode) -> Vec<u8> {
        let sip_types::Message::Request(request) =
            sip_types::Message::parse(bytes::Bytes::copy_from_slice(data)).unwrap()
        else {
            panic!("expected serialized request");
        };

        let mut response = Response::new(code);

        for name in [Name::Via, Name::From, Name::To, Name::CallId, Name::CSeq] {
            if let Some(value) = request.headers.raw(&name) {
                response.headers.push(name, value.clone());
            }
        }

        response.print()
    }

    fn drain_transmits(endpoint: &mut Endpoint) -> Vec<Vec<u8>> {
        let mut transmits = vec![];

        while let Some(event) = endpoint.pop_event() {
            if let EndpointEvent::Transmit { data, .. } = event {
                transmits.push(data.to_vec());
            }
        }

        transmits
    }

    #[test]
    fn non_invite_retransmits_until_final() {
        let mut endpoint = Endpoint::new();
        let mut now = Instant::now();

        let tsx = endpoint
            .send_request(request(Method::REGISTER), peer(), now)
            .unwrap();

        let initial = drain_transmits(&mut endpoint);
        assert_eq!(initial.len(), 1);

        // T1 passes, the request is retransmitted
        now += Duration::from_millis(600);
        endpoint.poll(now);
        let retransmits = drain_transmits(&mut endpoint);
        assert_eq!(retransmits.len(), 1);
        assert_eq!(retransmits[0], initial[0]);

        // deliver the final response
        let ok = response_for(&initial[0], StatusCode::OK);
        endpoint.receive(&ok, peer(), now);

        let mut got_response = false;
        while let Some(event) = endpoint.pop_event() {
            if let EndpointEvent::TsxResponse { tsx: t, response } = event {
                assert_eq!(t, tsx);
                assert_eq!(response.line.code, StatusCode::OK);
                got_response = true;
            }
        }
        assert!(got_response);

        // a retransmitted response is absorbed
        endpoint.receive(&ok, peer(), now);
        assert!(endpoint.pop_event().is_none());

        // no further retransmissions
        now += Duration::from_secs(5);
        endpoint.poll(now);
        assert!(drain_transmits(&mut endpoint).is_empty());
    }

    #[test]
    fn client_times_out_without_response() {
        let mut endpoint = Endpoint::new();
        let now = Instant::now();

        let tsx = endpoint
            .send_request(request(Method::REGISTER), peer(), now)
            .unwrap();

        endpoint.poll(now + Duration::from_secs(33));

        let timeout = std::iter::from_fn(|| endpoint.pop_event())
            .any(|event| matches!(event, EndpointEvent::TsxTimeout { tsx: t } if t == tsx));

        assert!(timeout);
    }

    #[test]
    fn invite_non2xx_is_acked() {
        let mut endpoint = Endpoint::new();
        let now = Instant::now();

        let _tsx = endpoint
            .send_request(request(Method::INVITE), peer(), now)
            .unwrap();

        let initial = drain_transmits(&mut endpoint);
        let busy = response_for(&initial[0], StatusCode::BUSY_HERE);

        endpoint.receive(&busy, peer(), now);

        let mut saw_response = false;
        let mut ack = None;

        while let Some(event) = endpoint.pop_event() {
            match event {
                EndpointEvent::TsxResponse { response, .. } => {
                    assert_eq!(response.line.code, StatusCode::BUSY_HERE);
                    saw_response = true;
                }
                EndpointEvent::Transmit { data, .. } => ack = Some(data),
                _ => {}
            }
        }

        assert!(saw_response);
        let ack = ack.expect("non-2xx final must be ACKed");
        assert!(ack.starts_with(b"ACK "));

        // a retransmitted final triggers only another ACK
        endpoint.receive(&busy, peer(), now);

        let events: Vec<_> = std::iter::from_fn(|| endpoint.pop_event()).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EndpointEvent::Transmit { .. }));
    }

    #[test]
    fn server_invite_retransmits_final_until_ack() {
        let mut endpoint = Endpoint::new();
        let mut now = Instant::now();

        let invite = request(Method::INVITE).print();
        endpoint.receive(&invite, peer(), now);

        let tsx = match endpoint.pop_event() {
            Some(EndpointEvent::ReceivedRequest(incoming)) => incoming.tsx.unwrap(),
            other => panic!("expected incoming request, got {other:?}"),
        };

        let mut ok = Response::new(StatusCode::OK);
        ok.headers.push(Name::CallId, "test-call-id");
        endpoint.respond_final(tsx, &ok, now).unwrap();

        assert_eq!(drain_transmits(&mut endpoint).len(), 1);

        // unacknowledged: retransmitted
        now += Duration::from_millis(600);
        endpoint.poll(now);
        assert_eq!(drain_transmits(&mut endpoint).len(), 1);

        // ACK stops the retransmissions
        let mut ack = request(Method::ACK);
        ack.headers.insert(&CSeq {
            cseq: 1,
            method: Method::ACK,
        });
        endpoint.receive(&ack.print(), peer(), now);

        // drain the delivered ACK event
        while endpoint.pop_event().is_some() {}

        now += Duration::from_secs(5);
        endpoint.poll(now);
        assert!(drain_transmits(&mut endpoint).is_empty());
    }

    #[test]
    fn request_retransmission_replays_response() {
        let mut endpoint = Endpoint::new();
        let now = Instant::now();

        let register = request(Method::REGISTER).print();
        endpoint.receive(&register, peer(), now);

        let tsx = match endpoint.pop_event() {
            Some(EndpointEvent::ReceivedRequest(incoming)) => incoming.tsx.unwrap(),
            other => panic!("expected incoming request, got {other:?}"),
        };

        let ok = Response::new(StatusCode::OK);
        endpoint.respond_final(tsx, &ok, now).unwrap();
        drain_transmits(&mut endpoint);

        // the same request again: the response is replayed, no new event
        endpoint.receive(&register, peer(), now);

        let events: Vec<_> = std::iter::from_fn(|| endpoint.pop_event()).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EndpointEvent::Transmit { .. }));
    }

    #[test]
    fn branch_is_required() {
        let mut endpoint = Endpoint::new();

        let mut invite = Request::new(Method::INVITE, "sip:x@example.org".parse().unwrap());
        invite.headers.push(Name::Via, "SIP/2.0/UDP 192.0.2.1:5060");

        assert!(matches!(
            endpoint.send_request(invite, peer(), Instant::now()),
            Err(Error::MissingBranch)
        ));
    }
}
