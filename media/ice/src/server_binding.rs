//! Bindings against configured STUN servers, used to discover
//! server-reflexive candidates

use crate::message::{server_binding_request, RetransmitSchedule};
use crate::{Component, IceEvent};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use stun_types::attr::XorMappedAddress;
use stun_types::{Message, TransactionId};

pub(crate) struct StunServerBinding {
    server: SocketAddr,
    component: Component,
    state: State,
    mapped_addr: Option<SocketAddr>,
}

enum State {
    /// Initial request not sent yet
    Idle,
    InFlight {
        transaction_id: TransactionId,
        request: Vec<u8>,
        retransmit_at: Instant,
        attempts: u32,
    },
    Bound {
        refresh_at: Instant,
    },
    Failed,
}

impl StunServerBinding {
    pub(crate) fn new(server: SocketAddr, component: Component) -> Self {
        Self {
            server,
            component,
            state: State::Idle,
            mapped_addr: None,
        }
    }

    pub(crate) fn component(&self) -> Component {
        self.component
    }

    /// The binding made its round trip, successfully or not
    pub(crate) fn is_settled(&self) -> bool {
        self.mapped_addr.is_some() || matches!(self.state, State::Failed)
    }

    pub(crate) fn timeout(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            State::Idle => Some(Duration::ZERO),
            State::InFlight { retransmit_at, .. } => Some(
                retransmit_at
                    .checked_duration_since(now)
                    .unwrap_or(Duration::ZERO),
            ),
            State::Bound { refresh_at } => Some(
                refresh_at
                    .checked_duration_since(now)
                    .unwrap_or(Duration::ZERO),
            ),
            State::Failed => None,
        }
    }

    pub(crate) fn poll(
        &mut self,
        now: Instant,
        schedule: &RetransmitSchedule,
        mut emit: impl FnMut(IceEvent),
    ) {
        match &mut self.state {
            State::Idle => self.send_request(now, schedule, emit),
            State::InFlight {
                request,
                retransmit_at,
                attempts,
                ..
            } => {
                if *retransmit_at > now {
                    return;
                }

                if *attempts >= schedule.max_retransmits {
                    log::debug!("STUN server {} did not answer", self.server);
                    self.state = State::Failed;
                    self.mapped_addr = None;
                    return;
                }

                *attempts += 1;
                *retransmit_at += schedule.backoff(*attempts);

                emit(IceEvent::SendData {
                    component: self.component,
                    data: request.clone(),
                    target: self.server,
                });
            }
            State::Bound { refresh_at } => {
                if now >= *refresh_at {
                    self.send_request(now, schedule, emit);
                }
            }
            State::Failed => {}
        }
    }

    fn send_request(
        &mut self,
        now: Instant,
        schedule: &RetransmitSchedule,
        mut emit: impl FnMut(IceEvent),
    ) {
        let transaction_id = TransactionId::random();
        let request = server_binding_request(transaction_id);

        emit(IceEvent::SendData {
            component: self.component,
            data: request.clone(),
            target: self.server,
        });

        self.state = State::InFlight {
            transaction_id,
            request,
            retransmit_at: now + schedule.backoff(0),
            attempts: 0,
        };
    }

    pub(crate) fn matches_response(&self, transaction_id: TransactionId) -> bool {
        matches!(
            &self.state,
            State::InFlight { transaction_id: id, .. } if *id == transaction_id
        )
    }

    /// Consume the response to our binding request, returning the mapped
    /// address the server saw
    pub(crate) fn handle_response(
        &mut self,
        now: Instant,
        schedule: &RetransmitSchedule,
        mut msg: Message,
    ) -> Option<SocketAddr> {
        let mapped = match msg.attr::<XorMappedAddress>() {
            Some(Ok(mapped)) => mapped.0,
            _ => {
                log::debug!("STUN response without XOR-MAPPED-ADDRESS, ignoring");
                return None;
            }
        };

        self.state = State::Bound {
            refresh_at: now + schedule.binding_refresh_interval,
        };
        self.mapped_addr = Some(mapped);

        Some(mapped)
    }
}
