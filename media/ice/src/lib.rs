//! sans-io ICE agent (RFC 8445, UDP only).
//!
//! The agent owns no sockets. It consumes received datagrams via
//! [`IceAgent::receive`], is driven by [`IceAgent::poll`] and communicates
//! through [`IceEvent`]s, including the datagrams it wants sent.

use candidate::{candidate_priority, pair_priority, Candidate, CandidateKind, LocalId, RemoteId};
use message::RetransmitSchedule;
use sdp_types::{IceCandidate, UntaggedAddress};
use server_binding::StunServerBinding;
use slotmap::SlotMap;
use std::collections::VecDeque;
use std::mem::take;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use stun_types::attr::{
    ErrorCode, Fingerprint, IceControlled, IceControlling, Priority, UseCandidate,
    XorMappedAddress,
};
use stun_types::{Class, Message, TransactionId};

mod candidate;
mod message;
mod server_binding;

/// Overall deadline for connectivity establishment once checks started
const CONNECT_DEADLINE: Duration = Duration::from_secs(30);

/// Pacing of new connectivity checks (Ta)
const CHECK_PACING: Duration = Duration::from_millis(50);

const MAX_PAIRS: usize = 64;

/// A datagram received on one of the component sockets
pub struct ReceivedPkt {
    pub data: Vec<u8>,
    pub source: SocketAddr,
    /// Local address of the receiving socket
    pub destination: SocketAddr,
    pub component: Component,
}

/// ICE data stream component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Component {
    Rtp = 1,
    /// Only used when RTCP runs on its own socket
    Rtcp = 2,
}

/// ufrag/pwd pair exchanged through SDP
#[derive(Debug, Clone)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

impl IceCredentials {
    pub fn random() -> Self {
        use rand::distributions::{Alphanumeric, DistString};

        let mut rng = rand::thread_rng();

        Self {
            ufrag: Alphanumeric.sample_string(&mut rng, 8),
            pwd: Alphanumeric.sample_string(&mut rng, 24),
        }
    }
}

/// Candidate gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    /// All configured STUN servers answered or gave up
    Complete,
}

/// Connectivity progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Checking,
    /// A pair is nominated for every component
    Connected,
    /// A previously nominated pair stopped working
    Disconnected,
    /// No candidate pair can succeed anymore, or the deadline passed
    Failed,
}

#[derive(Debug)]
pub enum IceEvent {
    GatheringStateChanged {
        old: GatheringState,
        new: GatheringState,
    },
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    /// A pair was nominated; `remote` is where media for this component goes
    NominatedPair {
        component: Component,
        local: SocketAddr,
        remote: SocketAddr,
    },
    SendData {
        component: Component,
        data: Vec<u8>,
        target: SocketAddr,
    },
}

struct Pair {
    local: LocalId,
    remote: RemoteId,
    component: Component,
    priority: u64,
    state: PairState,
    /// Peer asked for this pair via USE-CANDIDATE
    remote_nominated: bool,
    /// We selected this pair
    nominated: bool,
}

enum PairState {
    Waiting,
    InFlight {
        transaction_id: TransactionId,
        request: Vec<u8>,
        retransmit_at: Instant,
        attempts: u32,
        target: SocketAddr,
    },
    Succeeded,
    Failed,
}

/// The ICE agent state machine
pub struct IceAgent {
    schedule: RetransmitSchedule,

    credentials: IceCredentials,
    remote_credentials: Option<IceCredentials>,

    stun_servers: Vec<StunServerBinding>,

    local_candidates: SlotMap<LocalId, Candidate>,
    remote_candidates: SlotMap<RemoteId, Candidate>,
    foundations: Vec<(CandidateKind, std::net::IpAddr)>,

    pairs: Vec<Pair>,
    triggered: VecDeque<(LocalId, RemoteId)>,

    rtcp_mux: bool,
    controlling: bool,
    tie_breaker: u64,

    gathering_state: GatheringState,
    connection_state: ConnectionState,

    checks_enabled: bool,
    check_deadline: Option<Instant>,
    last_check_at: Option<Instant>,

    /// STUN traffic received before the remote credentials were known
    backlog: Vec<ReceivedPkt>,

    events: VecDeque<IceEvent>,
}

impl IceAgent {
    pub fn new(credentials: IceCredentials, controlling: bool, rtcp_mux: bool) -> Self {
        IceAgent {
            schedule: RetransmitSchedule::default(),
            credentials,
            remote_credentials: None,
            stun_servers: vec![],
            local_candidates: SlotMap::with_key(),
            remote_candidates: SlotMap::with_key(),
            foundations: vec![],
            pairs: vec![],
            triggered: VecDeque::new(),
            rtcp_mux,
            controlling,
            tie_breaker: rand::random(),
            gathering_state: GatheringState::New,
            connection_state: ConnectionState::New,
            checks_enabled: false,
            check_deadline: None,
            last_check_at: None,
            backlog: vec![],
            events: VecDeque::new(),
        }
    }

    pub fn credentials(&self) -> &IceCredentials {
        &self.credentials
    }

    pub fn gathering_state(&self) -> GatheringState {
        self.gathering_state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn rtcp_mux(&self) -> bool {
        self.rtcp_mux
    }

    /// Register the address of a bound component socket as a host candidate
    pub fn add_host_addr(&mut self, component: Component, addr: SocketAddr) {
        if addr.ip().is_unspecified() || addr.ip().is_multicast() {
            return;
        }

        self.add_local_candidate(CandidateKind::Host, component, addr, addr);
    }

    /// Add a STUN server used to discover server-reflexive candidates
    pub fn add_stun_server(&mut self, server: SocketAddr) {
        self.stun_servers
            .push(StunServerBinding::new(server, Component::Rtp));

        if !self.rtcp_mux {
            self.stun_servers
                .push(StunServerBinding::new(server, Component::Rtcp));
        }
    }

    /// Provide the peer's credentials and candidates from its SDP
    pub fn set_remote(&mut self, credentials: IceCredentials, candidates: &[IceCandidate]) {
        self.remote_credentials = Some(credentials);

        for candidate in candidates {
            self.add_remote_candidate(candidate);
        }

        for pkt in take(&mut self.backlog) {
            self.receive(pkt);
        }
    }

    /// Allow connectivity checks to run.
    ///
    /// Separate from [`set_remote`](Self::set_remote) so the owner decides
    /// when the session moves from gathering to connecting.
    pub fn start_checks(&mut self, now: Instant) {
        if self.checks_enabled {
            return;
        }

        self.checks_enabled = true;
        self.check_deadline = Some(now + CONNECT_DEADLINE);
    }

    /// Local candidates for the SDP, excluding peer-reflexive ones
    pub fn sdp_candidates(&self) -> Vec<IceCandidate> {
        let mut candidates: Vec<&Candidate> = self
            .local_candidates
            .values()
            .filter(|c| matches!(c.kind, CandidateKind::Host | CandidateKind::ServerReflexive))
            .collect();

        candidates.sort_by_key(|c| std::cmp::Reverse(c.priority));

        candidates
            .into_iter()
            .map(|c| {
                let rel_addr = (c.kind == CandidateKind::ServerReflexive).then_some(c.base);

                IceCandidate {
                    foundation: c.foundation.clone().into(),
                    component: c.component as u32,
                    transport: "UDP".into(),
                    priority: u64::from(c.priority),
                    address: UntaggedAddress::IpAddress(c.addr.ip()),
                    port: c.addr.port(),
                    typ: c.kind.sdp_name().into(),
                    rel_addr: rel_addr.map(|a| UntaggedAddress::IpAddress(a.ip())),
                    rel_port: rel_addr.map(|a| a.port()),
                }
            })
            .collect()
    }

    /// The default address to advertise in the SDP connection line
    pub fn default_addr(&self, component: Component) -> Option<SocketAddr> {
        self.local_candidates
            .values()
            .filter(|c| c.component == component)
            .max_by_key(|c| c.priority)
            .map(|c| c.addr)
    }

    /// Local and remote address of the nominated pair of a component
    pub fn nominated_addr(&self, mut component: Component) -> Option<(SocketAddr, SocketAddr)> {
        if self.rtcp_mux {
            component = Component::Rtp;
        }

        self.pairs
            .iter()
            .find(|p| {
                p.component == component
                    && p.nominated
                    && matches!(p.state, PairState::Succeeded)
            })
            .map(|p| {
                (
                    self.local_candidates[p.local].addr,
                    self.remote_candidates[p.remote].addr,
                )
            })
    }

    fn foundation(&mut self, kind: CandidateKind, base_ip: std::net::IpAddr) -> String {
        let position = self
            .foundations
            .iter()
            .position(|&(k, ip)| k == kind && ip == base_ip);

        let index = match position {
            Some(index) => index,
            None => {
                self.foundations.push((kind, base_ip));
                self.foundations.len() - 1
            }
        };

        (index + 1).to_string()
    }

    fn add_local_candidate(
        &mut self,
        kind: CandidateKind,
        component: Component,
        base: SocketAddr,
        addr: SocketAddr,
    ) {
        let exists = self
            .local_candidates
            .values()
            .any(|c| c.kind == kind && c.base == base && c.addr == addr);

        if exists {
            return;
        }

        let same_kind_count = self
            .local_candidates
            .values()
            .filter(|c| c.kind == kind)
            .count() as u32;

        let candidate = Candidate {
            kind,
            component,
            addr,
            base,
            priority: candidate_priority(kind, same_kind_count, component),
            foundation: self.foundation(kind, base.ip()),
        };

        log::debug!("new local candidate {candidate} {component:?}");

        self.local_candidates.insert(candidate);
        self.form_pairs();
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) {
        let kind = match &*candidate.typ {
            "host" => CandidateKind::Host,
            "srflx" => CandidateKind::ServerReflexive,
            _ => return,
        };

        if !candidate.transport.eq_ignore_ascii_case("udp") {
            return;
        }

        let component = match candidate.component {
            1 => Component::Rtp,
            2 if !self.rtcp_mux => Component::Rtcp,
            _ => return,
        };

        let Ok(priority) = u32::try_from(candidate.priority) else {
            log::debug!("remote candidate priority out of range");
            return;
        };

        let Some(ip) = candidate.address.ip() else {
            // FQDN candidates would need resolving, skip them
            return;
        };

        let addr = SocketAddr::new(ip, candidate.port);

        self.remote_candidates.insert(Candidate {
            kind,
            component,
            addr,
            base: addr,
            priority,
            foundation: candidate.foundation.to_string(),
        });

        self.form_pairs();
    }

    fn form_pairs(&mut self) {
        for (local_id, local) in &self.local_candidates {
            for (remote_id, remote) in &self.remote_candidates {
                if local.component != remote.component {
                    continue;
                }

                if remote.kind == CandidateKind::PeerReflexive {
                    continue;
                }

                // don't mix address families or link-local scopes
                let compatible = match (local.addr.ip(), remote.addr.ip()) {
                    (std::net::IpAddr::V4(l), std::net::IpAddr::V4(r)) => {
                        l.is_link_local() == r.is_link_local()
                    }
                    (std::net::IpAddr::V6(l), std::net::IpAddr::V6(r)) => {
                        l.is_unicast_link_local() == r.is_unicast_link_local()
                    }
                    _ => false,
                };

                if !compatible {
                    continue;
                }

                let exists = self
                    .pairs
                    .iter()
                    .any(|p| p.local == local_id && p.remote == remote_id);

                if exists {
                    continue;
                }

                self.pairs.push(Pair {
                    local: local_id,
                    remote: remote_id,
                    component: local.component,
                    priority: pair_priority(local.priority, remote.priority, self.controlling),
                    state: PairState::Waiting,
                    remote_nominated: false,
                    nominated: false,
                });
            }
        }

        self.sort_and_prune_pairs();
    }

    fn sort_and_prune_pairs(&mut self) {
        // highest priority first
        self.pairs
            .sort_unstable_by_key(|p| std::cmp::Reverse(p.priority));

        while self.pairs.len() > MAX_PAIRS {
            self.pairs.pop();
        }
    }

    fn reprioritize_pairs(&mut self) {
        for pair in &mut self.pairs {
            pair.priority = pair_priority(
                self.local_candidates[pair.local].priority,
                self.remote_candidates[pair.remote].priority,
                self.controlling,
            );
        }

        self.sort_and_prune_pairs();
    }

    /// Feed a received datagram into the agent
    pub fn receive(&mut self, pkt: ReceivedPkt) {
        let mut msg = match Message::parse(pkt.data.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("discarding non-STUN datagram, {e}");
                return;
            }
        };

        let fingerprint_ok = msg.attr::<Fingerprint>().is_some_and(|r| r.is_ok());
        if !fingerprint_ok {
            log::trace!("discarding STUN message without valid fingerprint");
            return;
        }

        match msg.class() {
            Class::Request => self.receive_request(pkt, msg),
            Class::Success => self.receive_success(pkt, msg),
            Class::Error => self.receive_error(pkt, msg),
            Class::Indication => {}
        }
    }

    fn receive_success(&mut self, pkt: ReceivedPkt, mut msg: Message) {
        // Server binding responses are not authenticated
        let now = Instant::now();

        for binding in &mut self.stun_servers {
            if !binding.matches_response(msg.transaction_id()) {
                continue;
            }

            let component = binding.component();

            if let Some(mapped) = binding.handle_response(now, &self.schedule, msg) {
                self.add_local_candidate(
                    CandidateKind::ServerReflexive,
                    component,
                    pkt.destination,
                    mapped,
                );
            }

            return;
        }

        let Some(remote_credentials) = self.remote_credentials.clone() else {
            self.backlog.push(pkt);
            return;
        };

        if !message::verify_credentials(&self.credentials, &remote_credentials, &mut msg) {
            log::debug!("STUN success response failed the integrity check");
            return;
        }

        let transaction_id = msg.transaction_id();

        let Some(pair_index) = self.pairs.iter().position(|p| {
            matches!(&p.state, PairState::InFlight { transaction_id: id, .. } if *id == transaction_id)
        }) else {
            log::debug!("STUN success response for unknown transaction");
            return;
        };

        let PairState::InFlight { target, .. } = &self.pairs[pair_index].state else {
            unreachable!()
        };

        // Source/destination of request and response must be symmetric
        if pkt.source != *target {
            log::debug!("STUN success response from unexpected source, failing pair");
            let pair = &mut self.pairs[pair_index];
            pair.nominated = false;
            pair.state = PairState::Failed;
            return;
        }

        // A mapped address different from any known local candidate reveals
        // a peer-reflexive candidate
        let mapped = msg.attr::<XorMappedAddress>().and_then(|r| r.ok());

        let pair = &mut self.pairs[pair_index];
        pair.state = PairState::Succeeded;

        log::debug!(
            "connectivity check succeeded, pair {} <-> {}, nominated={}",
            self.local_candidates[pair.local].addr,
            self.remote_candidates[pair.remote].addr,
            pair.nominated,
        );

        if pair.nominated {
            self.events.push_back(IceEvent::NominatedPair {
                component: pair.component,
                local: self.local_candidates[pair.local].addr,
                remote: self.remote_candidates[pair.remote].addr,
            });
        }

        if let Some(mapped) = mapped {
            let known = self.local_candidates.values().any(|c| c.addr == mapped.0);

            if !known {
                let component = pkt.component;
                self.add_local_candidate(
                    CandidateKind::PeerReflexive,
                    component,
                    pkt.destination,
                    mapped.0,
                );
            }
        }
    }

    fn receive_error(&mut self, pkt: ReceivedPkt, mut msg: Message) {
        let Some(remote_credentials) = self.remote_credentials.clone() else {
            self.backlog.push(pkt);
            return;
        };

        if !message::verify_credentials(&self.credentials, &remote_credentials, &mut msg) {
            log::debug!("STUN error response failed the integrity check");
            return;
        }

        let transaction_id = msg.transaction_id();

        let error_code = match msg.attr::<ErrorCode>() {
            Some(Ok(error_code)) => error_code.number,
            _ => return,
        };

        let switch_to_controlling = msg.attr::<IceControlled>().is_some();
        let switch_to_controlled = msg.attr::<IceControlling>().is_some();

        let Some(pair_index) = self.pairs.iter().position(|p| {
            matches!(&p.state, PairState::InFlight { transaction_id: id, .. } if *id == transaction_id)
        }) else {
            return;
        };

        if error_code == 487 {
            // Role conflict: switch roles, re-queue the check
            if switch_to_controlling {
                self.controlling = true;
            } else if switch_to_controlled {
                self.controlling = false;
            }

            let pair = &mut self.pairs[pair_index];
            pair.state = PairState::Waiting;
            self.triggered.push_back((pair.local, pair.remote));

            self.reprioritize_pairs();
        } else {
            log::debug!("connectivity check failed with code {error_code}");
            self.pairs[pair_index].state = PairState::Failed;
        }
    }

    fn receive_request(&mut self, pkt: ReceivedPkt, mut msg: Message) {
        let Some(remote_credentials) = self.remote_credentials.clone() else {
            self.backlog.push(pkt);
            return;
        };

        if !message::verify_credentials(&self.credentials, &remote_credentials, &mut msg) {
            log::debug!("STUN request failed the integrity check");
            return;
        }

        let priority = match msg.attr::<Priority>() {
            Some(Ok(priority)) => priority.0,
            _ => {
                log::debug!("STUN request without PRIORITY attribute");
                return;
            }
        };

        let use_candidate = msg.attr::<UseCandidate>().is_some();

        // Role conflict detection
        if self.controlling {
            if let Some(Ok(peer_tie_breaker)) = msg.attr::<IceControlling>() {
                if self.tie_breaker >= peer_tie_breaker.0 {
                    self.send_role_conflict(&pkt, msg.transaction_id());
                    return;
                }

                self.controlling = false;
                self.reprioritize_pairs();
            }
        } else if let Some(Ok(peer_tie_breaker)) = msg.attr::<IceControlled>() {
            if self.tie_breaker >= peer_tie_breaker.0 {
                self.send_role_conflict(&pkt, msg.transaction_id());
                return;
            }

            self.controlling = true;
            self.reprioritize_pairs();
        }

        let Some(local_id) = self
            .local_candidates
            .iter()
            .find(|(_, c)| c.kind == CandidateKind::Host && c.addr == pkt.destination)
            .map(|(id, _)| id)
        else {
            log::warn!(
                "no local candidate matches the destination {} of a STUN request",
                pkt.destination
            );
            return;
        };

        let remote_id = self
            .remote_candidates
            .iter()
            .find(|(_, c)| c.addr == pkt.source)
            .map(|(id, _)| id);

        let remote_id = match remote_id {
            Some(id) => id,
            None => {
                // previously unknown source: peer-reflexive remote candidate
                let id = self.remote_candidates.insert(Candidate {
                    kind: CandidateKind::PeerReflexive,
                    component: pkt.component,
                    addr: pkt.source,
                    base: pkt.source,
                    priority,
                    foundation: "~".into(),
                });

                self.pairs.push(Pair {
                    local: local_id,
                    remote: id,
                    component: pkt.component,
                    priority: pair_priority(
                        self.local_candidates[local_id].priority,
                        priority,
                        self.controlling,
                    ),
                    state: PairState::Waiting,
                    remote_nominated: false,
                    nominated: false,
                });
                self.sort_and_prune_pairs();

                self.triggered.push_back((local_id, id));

                id
            }
        };

        let Some(pair) = self
            .pairs
            .iter_mut()
            .find(|p| p.local == local_id && p.remote == remote_id)
        else {
            // pruned away
            return;
        };

        if use_candidate {
            pair.remote_nominated = true;
        }

        let response =
            message::binding_success(msg.transaction_id(), &self.credentials, pkt.source);

        self.events.push_back(IceEvent::SendData {
            component: pkt.component,
            data: response,
            target: pkt.source,
        });

        if use_candidate {
            self.update_nominations();
        }
    }

    fn send_role_conflict(&mut self, pkt: &ReceivedPkt, transaction_id: TransactionId) {
        let response = message::role_conflict_error(
            transaction_id,
            &self.credentials,
            self.controlling,
            self.tie_breaker,
        );

        self.events.push_back(IceEvent::SendData {
            component: pkt.component,
            data: response,
            target: pkt.source,
        });
    }

    /// Drive retransmissions, nominations and new connectivity checks
    pub fn poll(&mut self, now: Instant) {
        for binding in &mut self.stun_servers {
            binding.poll(now, &self.schedule, |event| self.events.push_back(event));
        }

        self.poll_retransmits(now);
        self.update_gathering_state();
        self.update_nominations();
        self.update_connection_state(now);

        if !self.checks_enabled || self.remote_credentials.is_none() {
            return;
        }

        // pace new checks
        if let Some(last) = self.last_check_at {
            if last + CHECK_PACING > now {
                return;
            }
        }

        // triggered checks first, then the highest priority waiting pair
        let next = loop {
            match self.triggered.pop_front() {
                Some((local, remote)) => {
                    let found = self
                        .pairs
                        .iter()
                        .position(|p| p.local == local && p.remote == remote);

                    match found {
                        Some(index) => break Some(index),
                        None => continue,
                    }
                }
                None => {
                    break self
                        .pairs
                        .iter()
                        .position(|p| matches!(p.state, PairState::Waiting))
                }
            }
        };

        let Some(pair_index) = next else {
            return;
        };

        self.last_check_at = Some(now);
        let pair = &mut self.pairs[pair_index];

        let remote_credentials = self
            .remote_credentials
            .as_ref()
            .expect("checked remote_credentials above");

        let transaction_id = TransactionId::random();

        let request = message::binding_request(
            transaction_id,
            &self.credentials,
            remote_credentials,
            self.local_candidates[pair.local].priority,
            self.controlling,
            self.tie_breaker,
            pair.nominated,
        );

        let target = self.remote_candidates[pair.remote].addr;

        log::debug!(
            "connectivity check {} -> {target} nominate={}",
            self.local_candidates[pair.local].base,
            pair.nominated,
        );

        pair.state = PairState::InFlight {
            transaction_id,
            request: request.clone(),
            retransmit_at: now + self.schedule.backoff(0),
            attempts: 0,
            target,
        };

        self.events.push_back(IceEvent::SendData {
            component: pair.component,
            data: request,
            target,
        });
    }

    fn poll_retransmits(&mut self, now: Instant) {
        for pair in &mut self.pairs {
            let PairState::InFlight {
                request,
                retransmit_at,
                attempts,
                target,
                ..
            } = &mut pair.state
            else {
                continue;
            };

            if *retransmit_at > now {
                continue;
            }

            if *attempts >= self.schedule.max_retransmits {
                pair.state = PairState::Failed;
                continue;
            }

            *attempts += 1;
            *retransmit_at += self.schedule.backoff(*attempts);

            self.events.push_back(IceEvent::SendData {
                component: pair.component,
                data: request.clone(),
                target: *target,
            });
        }
    }

    fn update_gathering_state(&mut self) {
        let settled = self.stun_servers.iter().all(|b| b.is_settled());

        let new = if settled {
            GatheringState::Complete
        } else {
            GatheringState::Gathering
        };

        if new != self.gathering_state {
            self.events.push_back(IceEvent::GatheringStateChanged {
                old: self.gathering_state,
                new,
            });
            self.gathering_state = new;
        }
    }

    fn update_nominations(&mut self) {
        self.nominate_component(Component::Rtp);

        if !self.rtcp_mux {
            self.nominate_component(Component::Rtcp);
        }
    }

    fn nominate_component(&mut self, component: Component) {
        let already_nominated = self
            .pairs
            .iter()
            .any(|p| p.component == component && p.nominated);

        if already_nominated {
            return;
        }

        if self.controlling {
            // regular nomination: re-check the best succeeded pair with
            // USE-CANDIDATE set
            let best = self
                .pairs
                .iter_mut()
                .filter(|p| {
                    p.component == component && matches!(p.state, PairState::Succeeded)
                })
                .max_by_key(|p| p.priority);

            if let Some(pair) = best {
                pair.nominated = true;
                self.triggered.push_front((pair.local, pair.remote));
            }
        } else {
            // controlled: adopt the peer's nomination once it succeeded
            let best = self
                .pairs
                .iter_mut()
                .filter(|p| {
                    p.component == component
                        && p.remote_nominated
                        && matches!(p.state, PairState::Succeeded)
                })
                .max_by_key(|p| p.priority);

            if let Some(pair) = best {
                pair.nominated = true;

                self.events.push_back(IceEvent::NominatedPair {
                    component,
                    local: self.local_candidates[pair.local].addr,
                    remote: self.remote_candidates[pair.remote].addr,
                });
            }
        }
    }

    fn update_connection_state(&mut self, now: Instant) {
        let mut nominated_rtp = false;
        let mut nominated_rtcp = false;
        let mut pending_rtp = false;
        let mut pending_rtcp = false;

        for pair in &self.pairs {
            let nominated =
                pair.nominated && matches!(pair.state, PairState::Succeeded);
            let pending = matches!(
                pair.state,
                PairState::Waiting | PairState::InFlight { .. }
            );

            match pair.component {
                Component::Rtp => {
                    nominated_rtp |= nominated;
                    pending_rtp |= pending;
                }
                Component::Rtcp => {
                    nominated_rtcp |= nominated;
                    pending_rtcp |= pending;
                }
            }
        }

        // An RTCP component only blocks connectivity if the peer actually
        // offered candidates for it
        let need_rtcp = !self.rtcp_mux
            && self
                .remote_candidates
                .values()
                .any(|c| c.component == Component::Rtcp);

        let all_nominated = if need_rtcp {
            nominated_rtp && nominated_rtcp
        } else {
            nominated_rtp
        };

        let still_possible = if need_rtcp {
            pending_rtp && pending_rtcp
        } else {
            pending_rtp
        };

        let deadline_passed = self
            .check_deadline
            .is_some_and(|deadline| now >= deadline);

        let new = if all_nominated {
            ConnectionState::Connected
        } else if !self.checks_enabled {
            return;
        } else if deadline_passed {
            ConnectionState::Failed
        } else if still_possible || self.pairs.is_empty() {
            match self.connection_state {
                ConnectionState::New => ConnectionState::Checking,
                ConnectionState::Connected => ConnectionState::Disconnected,
                state => state,
            }
        } else {
            ConnectionState::Failed
        };

        if new != self.connection_state {
            self.events.push_back(IceEvent::ConnectionStateChanged {
                old: self.connection_state,
                new,
            });
            self.connection_state = new;
        }
    }

    /// Next event to process; drain until `None` after every call to
    /// [`poll`](Self::poll) or [`receive`](Self::receive)
    pub fn pop_event(&mut self) -> Option<IceEvent> {
        self.events.pop_front()
    }

    /// Duration after which [`poll`](Self::poll) wants to run again
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        let mut timeout = self
            .stun_servers
            .iter()
            .filter_map(|b| b.timeout(now))
            .min();

        if self.checks_enabled && self.remote_credentials.is_some() {
            let pacing = self
                .last_check_at
                .map(|last| {
                    (last + CHECK_PACING)
                        .checked_duration_since(now)
                        .unwrap_or(Duration::ZERO)
                })
                .unwrap_or(Duration::ZERO);

            timeout = Some(timeout.map_or(pacing, |t| t.min(pacing)));
        }

        for pair in &self.pairs {
            if let PairState::InFlight { retransmit_at, .. } = &pair.state {
                let until = retransmit_at
                    .checked_duration_since(now)
                    .unwrap_or(Duration::ZERO);

                timeout = Some(timeout.map_or(until, |t| t.min(until)));
            }
        }

        timeout
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn host_candidate_in_sdp() {
        let mut agent = IceAgent::new(IceCredentials::random(), true, true);
        agent.add_host_addr(Component::Rtp, addr("192.0.2.1:20000"));

        let candidates = agent.sdp_candidates();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].foundation, "1");
        assert_eq!(candidates[0].component, 1);
        assert_eq!(candidates[0].priority, 2130706431);
        assert_eq!(candidates[0].typ, "host");
        assert_eq!(
            candidates[0].to_string(),
            "1 1 UDP 2130706431 192.0.2.1 20000 typ host"
        );
    }

    #[test]
    fn unspecified_addresses_are_rejected() {
        let mut agent = IceAgent::new(IceCredentials::random(), true, true);
        agent.add_host_addr(Component::Rtp, addr("0.0.0.0:20000"));

        assert!(agent.sdp_candidates().is_empty());
    }

    #[test]
    fn gathering_completes_without_stun_servers() {
        let mut agent = IceAgent::new(IceCredentials::random(), true, true);
        agent.add_host_addr(Component::Rtp, addr("192.0.2.1:20000"));

        agent.poll(Instant::now());

        assert_eq!(agent.gathering_state(), GatheringState::Complete);
    }

    /// Drive two in-memory agents against each other until both connect
    #[test]
    fn two_agents_connect() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut left = IceAgent::new(IceCredentials::random(), true, true);
        let mut right = IceAgent::new(IceCredentials::random(), false, true);

        let left_addr = addr("192.0.2.1:10000");
        let right_addr = addr("192.0.2.2:20000");

        left.add_host_addr(Component::Rtp, left_addr);
        right.add_host_addr(Component::Rtp, right_addr);

        left.set_remote(right.credentials().clone(), &right.sdp_candidates());
        right.set_remote(left.credentials().clone(), &left.sdp_candidates());

        let mut now = Instant::now();
        left.start_checks(now);
        right.start_checks(now);

        for _ in 0..100 {
            left.poll(now);
            right.poll(now);

            // shuttle datagrams between the two agents
            let mut again = true;
            while again {
                again = false;

                while let Some(event) = left.pop_event() {
                    if let IceEvent::SendData { data, target, component } = event {
                        assert_eq!(target, right_addr);
                        again = true;
                        right.receive(ReceivedPkt {
                            data,
                            source: left_addr,
                            destination: right_addr,
                            component,
                        });
                    }
                }

                while let Some(event) = right.pop_event() {
                    if let IceEvent::SendData { data, target, component } = event {
                        assert_eq!(target, left_addr);
                        again = true;
                        left.receive(ReceivedPkt {
                            data,
                            source: right_addr,
                            destination: left_addr,
                            component,
                        });
                    }
                }
            }

            if left.connection_state() == ConnectionState::Connected
                && right.connection_state() == ConnectionState::Connected
            {
                break;
            }

            now += Duration::from_millis(60);
        }

        assert_eq!(left.connection_state(), ConnectionState::Connected);
        assert_eq!(right.connection_state(), ConnectionState::Connected);

        assert_eq!(
            left.nominated_addr(Component::Rtp),
            Some((left_addr, right_addr))
        );
        assert_eq!(
            right.nominated_addr(Component::Rtp),
            Some((right_addr, left_addr))
        );
    }
}
