//! Client and server transaction state (RFC 3261 section 17), driven by the
//! [`Endpoint`](crate::Endpoint)

use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::{Method, Request};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// RTT estimate for unreliable transports
pub(crate) const T1: Duration = Duration::from_millis(500);
/// Retransmission interval cap
pub(crate) const T2: Duration = Duration::from_secs(4);
/// Timers B, D, F, H and J: how long a transaction lingers overall
pub(crate) const TIMEOUT: Duration = Duration::from_secs(32);
/// Timers I and K: absorb late retransmissions after completion
pub(crate) const LINGER: Duration = Duration::from_secs(5);

slotmap::new_key_type! {
    /// Handle of a transaction inside its endpoint
    pub struct TsxKey;
}

pub(crate) enum Transaction {
    Client(ClientTsx),
    Server(ServerTsx),
}

pub(crate) struct ClientTsx {
    /// The unserialized request, kept for ACK construction and
    /// authentication retries
    pub(crate) request: Request,
    pub(crate) data: Bytes,
    pub(crate) target: SocketAddr,
    pub(crate) branch: BytesStr,
    pub(crate) method: Method,
    pub(crate) state: ClientState,
    /// Timer B / F
    pub(crate) timeout_at: Instant,
}

pub(crate) enum ClientState {
    /// Request sent, no response yet; retransmitting
    Calling {
        retransmit_at: Instant,
        interval: Duration,
    },
    /// Provisional response received. Non-INVITE transactions keep
    /// retransmitting at the capped interval.
    Proceeding { retransmit_at: Option<Instant> },
    /// INVITE answered with 2xx; window in which retransmitted 2xx are
    /// re-delivered so the ACK can be repeated
    Accepted { until: Instant },
    /// Final response delivered, absorbing retransmissions
    Completed { until: Instant },
    Terminated,
}

impl ClientTsx {
    pub(crate) fn is_invite(&self) -> bool {
        self.method == Method::INVITE
    }
}

pub(crate) struct ServerTsx {
    pub(crate) branch: BytesStr,
    pub(crate) method: Method,
    pub(crate) source: SocketAddr,
    pub(crate) call_id: BytesStr,
    pub(crate) cseq: u32,
    /// Last response sent, replayed on request retransmissions
    pub(crate) last_response: Option<Bytes>,
    pub(crate) state: ServerState,
}

pub(crate) enum ServerState {
    /// No final response sent yet
    Proceeding,
    /// Final response sent. INVITE finals are retransmitted until an ACK
    /// arrives.
    Completed {
        retransmit_at: Option<Instant>,
        interval: Duration,
        until: Instant,
    },
    /// ACK received, absorbing stray retransmissions
    Confirmed { until: Instant },
    Terminated,
}

impl ServerTsx {
    pub(crate) fn is_invite(&self) -> bool {
        self.method == Method::INVITE
    }
}

/// Next retransmission interval: doubled, capped at T2
pub(crate) fn next_interval(interval: Duration) -> Duration {
    (interval * 2).min(T2)
}
