use crate::transaction::{
    next_interval, ClientState, ClientTsx, ServerState, ServerTsx, Transaction, LINGER, T1,
    TIMEOUT,
};
use crate::{Error, TsxKey};
use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::header::typed::{CSeq, CallId, Via};
use sip_types::header::Name;
use sip_types::{Message, Method, Request, Response};
use slotmap::SlotMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A request delivered to the transaction user
#[derive(Debug)]
pub struct IncomingRequest {
    pub request: Request,
    pub source: SocketAddr,
    /// Server transaction to respond through; `None` for ACK
    pub tsx: Option<TsxKey>,
}

#[derive(Debug)]
pub enum EndpointEvent {
    /// Put these bytes on the wire
    Transmit { target: SocketAddr, data: Bytes },
    /// A request outside any existing transaction
    ReceivedRequest(IncomingRequest),
    /// A response matched to a client transaction.
    ///
    /// 2xx responses to INVITE may be delivered multiple times; answer each
    /// with an ACK.
    TsxResponse { tsx: TsxKey, response: Response },
    /// A client transaction gave up (no response in time) or a final
    /// response was never acknowledged
    TsxTimeout { tsx: TsxKey },
    /// The transaction was cleaned up, its key is now stale
    TsxTerminated { tsx: TsxKey },
}

/// sans-io SIP transaction engine.
///
/// Consumes raw messages via [`receive`](Endpoint::receive), is driven by
/// [`poll`](Endpoint::poll) and produces [`EndpointEvent`]s, including the
/// datagrams to send.
#[derive(Default)]
pub struct Endpoint {
    tsxs: SlotMap<TsxKey, Transaction>,
    events: VecDeque<EndpointEvent>,
}

impl Endpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a Via branch with the RFC 3261 magic cookie
    pub fn create_branch() -> BytesStr {
        let n: u64 = rand::random();
        BytesStr::from(format!("z9hG4bK{n:016x}"))
    }

    /// Send a request inside a new client transaction.
    ///
    /// The request must already carry its Via header; its branch identifies
    /// the transaction.
    pub fn send_request(
        &mut self,
        request: Request,
        target: SocketAddr,
        now: Instant,
    ) -> Result<TsxKey, Error> {
        let via: Via = request.headers.get()?;
        let branch = via.branch().ok_or(Error::MissingBranch)?.clone();

        let data = Bytes::from(request.print());
        let method = request.line.method.clone();

        let tsx = self.tsxs.insert(Transaction::Client(ClientTsx {
            request,
            data: data.clone(),
            target,
            branch,
            method,
            state: ClientState::Calling {
                retransmit_at: now + T1,
                interval: T1,
            },
            timeout_at: now + TIMEOUT,
        }));

        self.events.push_back(EndpointEvent::Transmit { target, data });

        Ok(tsx)
    }

    /// Serialize and send a request outside any transaction (ACK for 2xx)
    pub fn send_stateless(&mut self, request: &Request, target: SocketAddr) {
        self.events.push_back(EndpointEvent::Transmit {
            target,
            data: Bytes::from(request.print()),
        });
    }

    /// Re-send previously serialized bytes (cached ACK)
    pub fn transmit_raw(&mut self, data: Bytes, target: SocketAddr) {
        self.events.push_back(EndpointEvent::Transmit { target, data });
    }

    /// The original request of a client transaction
    pub fn tsx_request(&self, tsx: TsxKey) -> Option<&Request> {
        match self.tsxs.get(tsx) {
            Some(Transaction::Client(client)) => Some(&client.request),
            _ => None,
        }
    }

    /// Abandon a client transaction still waiting for a response.
    ///
    /// Transactions which already saw their final response keep absorbing
    /// retransmissions until they expire on their own.
    pub fn abort_tsx(&mut self, tsx: TsxKey) {
        if let Some(Transaction::Client(client)) = self.tsxs.get_mut(tsx) {
            if matches!(
                client.state,
                ClientState::Calling { .. } | ClientState::Proceeding { .. }
            ) {
                client.state = ClientState::Terminated;
            }
        }
    }

    /// Send a provisional response through a server transaction
    pub fn respond_provisional(&mut self, tsx: TsxKey, response: &Response) -> Result<(), Error> {
        let Some(Transaction::Server(server)) = self.tsxs.get_mut(tsx) else {
            return Err(Error::UnknownTransaction);
        };

        if !matches!(server.state, ServerState::Proceeding) {
            return Err(Error::InvalidState("final response already sent"));
        }

        let data = Bytes::from(response.print());
        server.last_response = Some(data.clone());

        let target = server.source;
        self.events.push_back(EndpointEvent::Transmit { target, data });

        Ok(())
    }

    /// Send the final response through a server transaction.
    ///
    /// INVITE finals are retransmitted until acknowledged.
    pub fn respond_final(
        &mut self,
        tsx: TsxKey,
        response: &Response,
        now: Instant,
    ) -> Result<(), Error> {
        let Some(Transaction::Server(server)) = self.tsxs.get_mut(tsx) else {
            return Err(Error::UnknownTransaction);
        };

        if !matches!(server.state, ServerState::Proceeding) {
            return Err(Error::InvalidState("final response already sent"));
        }

        let data = Bytes::from(response.print());
        server.last_response = Some(data.clone());

        server.state = ServerState::Completed {
            retransmit_at: server.is_invite().then(|| now + T1),
            interval: T1,
            until: now + TIMEOUT,
        };

        let target = server.source;
        self.events.push_back(EndpointEvent::Transmit { target, data });

        Ok(())
    }

    /// Feed one received datagram into the engine
    pub fn receive(&mut self, data: &[u8], source: SocketAddr, now: Instant) {
        let msg = match Message::parse(Bytes::copy_from_slice(data)) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("dropping unparseable SIP message from {source}, {e}");
                return;
            }
        };

        match msg {
            Message::Request(request) => self.receive_request(request, source, now),
            Message::Response(response) => self.receive_response(response, now),
        }
    }

    fn receive_request(&mut self, request: Request, source: SocketAddr, now: Instant) {
        let Ok(via) = request.headers.get::<Via>() else {
            log::debug!("dropping request without Via header");
            return;
        };

        let Some(branch) = via.branch().cloned() else {
            log::debug!("dropping request without Via branch");
            return;
        };

        let method = request.line.method.clone();

        if method == Method::ACK {
            self.receive_ack(request, source, now);
            return;
        }

        // Retransmission of a known request: replay the last response
        let known = self.tsxs.values().find_map(|tsx| match tsx {
            Transaction::Server(server)
                if server.branch == branch && server.method == method =>
            {
                Some(server)
            }
            _ => None,
        });

        if let Some(server) = known {
            if let Some(response) = server.last_response.clone() {
                let target = server.source;
                self.events.push_back(EndpointEvent::Transmit {
                    target,
                    data: response,
                });
            }

            return;
        }

        let (Ok(call_id), Ok(cseq)) = (
            request.headers.get::<CallId>(),
            request.headers.get::<CSeq>(),
        ) else {
            log::debug!("dropping request without Call-ID or CSeq");
            return;
        };

        let tsx = self.tsxs.insert(Transaction::Server(ServerTsx {
            branch,
            method,
            source,
            call_id: call_id.0,
            cseq: cseq.cseq,
            last_response: None,
            state: ServerState::Proceeding,
        }));

        self.events
            .push_back(EndpointEvent::ReceivedRequest(IncomingRequest {
                request,
                source,
                tsx: Some(tsx),
            }));
    }

    fn receive_ack(&mut self, request: Request, source: SocketAddr, now: Instant) {
        // An ACK for a non-2xx final matches the INVITE transaction by
        // call-id + cseq (its branch differs for 2xx ACKs, so branch
        // matching is of no use here)
        let call_id = request.headers.get::<CallId>().ok();
        let cseq = request.headers.get::<CSeq>().ok();

        if let (Some(call_id), Some(cseq)) = (call_id, cseq) {
            let server = self.tsxs.values_mut().find_map(|tsx| match tsx {
                Transaction::Server(server)
                    if server.is_invite()
                        && server.call_id == call_id.0
                        && server.cseq == cseq.cseq =>
                {
                    Some(server)
                }
                _ => None,
            });

            if let Some(server) = server {
                if matches!(server.state, ServerState::Completed { .. }) {
                    server.state = ServerState::Confirmed {
                        until: now + LINGER,
                    };
                }
            }
        }

        self.events
            .push_back(EndpointEvent::ReceivedRequest(IncomingRequest {
                request,
                source,
                tsx: None,
            }));
    }

    fn receive_response(&mut self, response: Response, now: Instant) {
        let Ok(via) = response.headers.get::<Via>() else {
            log::debug!("dropping response without Via header");
            return;
        };

        let Some(branch) = via.branch() else {
            log::debug!("dropping response without Via branch");
            return;
        };

        let Ok(cseq) = response.headers.get::<CSeq>() else {
            log::debug!("dropping response without CSeq");
            return;
        };

        let found = self.tsxs.iter_mut().find_map(|(key, tsx)| match tsx {
            Transaction::Client(client)
                if client.branch == *branch
                    && client.method == cseq.method
                    && !matches!(client.state, ClientState::Terminated) =>
            {
                Some((key, client))
            }
            _ => None,
        });

        let Some((key, client)) = found else {
            log::debug!(
                "dropping response with unknown transaction, code={}",
                response.line.code
            );
            return;
        };

        let code = response.line.code;

        if code.is_provisional() {
            if matches!(
                client.state,
                ClientState::Calling { .. } | ClientState::Proceeding { .. }
            ) {
                // INVITE stops retransmitting entirely, non-INVITE keeps
                // going at the capped interval
                let retransmit_at = (!client.is_invite()).then(|| now + crate::transaction::T2);
                client.state = ClientState::Proceeding { retransmit_at };

                self.events
                    .push_back(EndpointEvent::TsxResponse { tsx: key, response });
            }

            return;
        }

        match &client.state {
            ClientState::Calling { .. } | ClientState::Proceeding { .. } => {
                if client.is_invite() {
                    if code.is_success() {
                        client.state = ClientState::Accepted {
                            until: now + TIMEOUT,
                        };
                    } else {
                        // acknowledge the non-2xx final on the transaction
                        // layer and absorb retransmissions of it
                        let ack = build_non2xx_ack(&client.request, &response);
                        let target = client.target;
                        client.data = Bytes::from(ack.print());
                        client.state = ClientState::Completed {
                            until: now + TIMEOUT,
                        };

                        let data = client.data.clone();
                        self.events.push_back(EndpointEvent::Transmit { target, data });
                    }
                } else {
                    client.state = ClientState::Completed { until: now + LINGER };
                }

                self.events
                    .push_back(EndpointEvent::TsxResponse { tsx: key, response });
            }
            ClientState::Accepted { .. } => {
                // 2xx retransmission, deliver again so the ACK is repeated
                if code.is_success() {
                    self.events
                        .push_back(EndpointEvent::TsxResponse { tsx: key, response });
                }
            }
            ClientState::Completed { .. } => {
                // retransmitted non-2xx final: repeat the ACK
                if client.is_invite() {
                    let target = client.target;
                    let data = client.data.clone();
                    self.events.push_back(EndpointEvent::Transmit { target, data });
                }
            }
            ClientState::Terminated => {}
        }
    }

    /// Drive retransmissions and transaction expiry
    pub fn poll(&mut self, now: Instant) {
        let keys: Vec<TsxKey> = self.tsxs.keys().collect();

        for key in keys {
            let Some(tsx) = self.tsxs.get_mut(key) else {
                continue;
            };

            match tsx {
                Transaction::Client(client) => {
                    if matches!(
                        client.state,
                        ClientState::Calling { .. } | ClientState::Proceeding { .. }
                    ) && now >= client.timeout_at
                    {
                        client.state = ClientState::Terminated;
                        self.events.push_back(EndpointEvent::TsxTimeout { tsx: key });
                        continue;
                    }

                    match &mut client.state {
                        ClientState::Calling {
                            retransmit_at,
                            interval,
                        } => {
                            if now >= *retransmit_at {
                                *interval = if client.method == Method::INVITE {
                                    *interval * 2
                                } else {
                                    next_interval(*interval)
                                };
                                *retransmit_at = now + *interval;

                                self.events.push_back(EndpointEvent::Transmit {
                                    target: client.target,
                                    data: client.data.clone(),
                                });
                            }
                        }
                        ClientState::Proceeding {
                            retransmit_at: Some(retransmit_at),
                        } => {
                            if now >= *retransmit_at {
                                *retransmit_at = now + crate::transaction::T2;

                                self.events.push_back(EndpointEvent::Transmit {
                                    target: client.target,
                                    data: client.data.clone(),
                                });
                            }
                        }
                        ClientState::Accepted { until } | ClientState::Completed { until } => {
                            if now >= *until {
                                client.state = ClientState::Terminated;
                                self.events
                                    .push_back(EndpointEvent::TsxTerminated { tsx: key });
                            }
                        }
                        _ => {}
                    }
                }
                Transaction::Server(server) => match &mut server.state {
                    ServerState::Completed {
                        retransmit_at,
                        interval,
                        until,
                    } => {
                        if now >= *until {
                            server.state = ServerState::Terminated;

                            if server.is_invite() {
                                // final response was never acknowledged
                                self.events.push_back(EndpointEvent::TsxTimeout { tsx: key });
                            } else {
                                self.events
                                    .push_back(EndpointEvent::TsxTerminated { tsx: key });
                            }
                        } else if let Some(at) = retransmit_at {
                            if now >= *at {
                                *interval = next_interval(*interval);
                                *at = now + *interval;

                                if let Some(data) = server.last_response.clone() {
                                    self.events.push_back(EndpointEvent::Transmit {
                                        target: server.source,
                                        data,
                                    });
                                }
                            }
                        }
                    }
                    ServerState::Confirmed { until } => {
                        if now >= *until {
                            server.state = ServerState::Terminated;
                            self.events
                                .push_back(EndpointEvent::TsxTerminated { tsx: key });
                        }
                    }
                    _ => {}
                },
            }
        }

        // sweep terminated transactions
        self.tsxs.retain(|_, tsx| {
            !matches!(
                tsx,
                Transaction::Client(ClientTsx {
                    state: ClientState::Terminated,
                    ..
                }) | Transaction::Server(ServerTsx {
                    state: ServerState::Terminated,
                    ..
                })
            )
        });
    }

    /// Duration until the next deadline inside the engine
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        let mut next: Option<Instant> = None;

        let mut consider = |deadline: Instant| {
            next = Some(next.map_or(deadline, |n| n.min(deadline)));
        };

        for tsx in self.tsxs.values() {
            match tsx {
                Transaction::Client(client) => match &client.state {
                    ClientState::Calling { retransmit_at, .. } => {
                        consider(*retransmit_at);
                        consider(client.timeout_at);
                    }
                    ClientState::Proceeding { retransmit_at } => {
                        if let Some(at) = retransmit_at {
                            consider(*at);
                        }
                        consider(client.timeout_at);
                    }
                    ClientState::Accepted { until } | ClientState::Completed { until } => {
                        consider(*until)
                    }
                    ClientState::Terminated => {}
                },
                Transaction::Server(server) => match &server.state {
                    ServerState::Completed {
                        retransmit_at,
                        until,
                        ..
                    } => {
                        if let Some(at) = retransmit_at {
                            consider(*at);
                        }
                        consider(*until);
                    }
                    ServerState::Confirmed { until } => consider(*until),
                    _ => {}
                },
            }
        }

        next.map(|deadline| deadline.checked_duration_since(now).unwrap_or(Duration::ZERO))
    }

    pub fn pop_event(&mut self) -> Option<EndpointEvent> {
        self.events.pop_front()
    }
}

/// ACK for a non-2xx final response, built from the original INVITE
/// (RFC 3261 section 17.1.1.3)
fn build_non2xx_ack(invite: &Request, response: &Response) -> Request {
    let mut ack = Request::new(Method::ACK, invite.line.uri.clone());

    if let Some(via) = invite.headers.raw(&Name::Via) {
        ack.headers.push(Name::Via, via.clone());
    }

    if let Some(from) = invite.headers.raw(&Name::From) {
        ack.headers.push(Name::From, from.clone());
    }

    // To mirrors the response, including the peer's tag
    match response.headers.raw(&Name::To) {
        Some(to) => ack.headers.push(Name::To, to.clone()),
        None => {
            if let Some(to) = invite.headers.raw(&Name::To) {
                ack.headers.push(Name::To, to.clone());
            }
        }
    }

    if let Some(call_id) = invite.headers.raw(&Name::CallId) {
        ack.headers.push(Name::CallId, call_id.clone());
    }

    if let Ok(cseq) = invite.headers.get::<CSeq>() {
        ack.headers.insert(&CSeq {
            cseq: cseq.cseq,
            method: Method::ACK,
        });
    }

    ack
}
