//! STUN message construction & verification for connectivity checks

use crate::IceCredentials;
use std::cmp::min;
use std::net::SocketAddr;
use std::time::Duration;
use stun_types::attr::{
    ErrorCode, Fingerprint, IceControlled, IceControlling, IntegrityKey, MessageIntegrity,
    Priority, UseCandidate, Username, XorMappedAddress,
};
use stun_types::{Class, Message, MessageBuilder, Method, TransactionId};

/// Retransmission schedule of STUN transactions
pub(crate) struct RetransmitSchedule {
    pub(crate) initial_rto: Duration,
    pub(crate) max_rto: Duration,
    pub(crate) max_retransmits: u32,
    pub(crate) binding_refresh_interval: Duration,
}

impl Default for RetransmitSchedule {
    fn default() -> Self {
        Self {
            // RFC 8489 suggests 500ms, libwebrtc-alike stacks use less
            initial_rto: Duration::from_millis(250),
            max_rto: Duration::from_secs(3),
            max_retransmits: 7,
            binding_refresh_interval: Duration::from_secs(20),
        }
    }
}

impl RetransmitSchedule {
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let millis = self.initial_rto.as_millis() as u64;
        let millis = millis.saturating_mul(1 << attempt.min(16));

        min(Duration::from_millis(millis), self.max_rto)
    }
}

pub(crate) fn binding_request(
    transaction_id: TransactionId,
    local: &IceCredentials,
    remote: &IceCredentials,
    priority: u32,
    controlling: bool,
    tie_breaker: u64,
    nominate: bool,
) -> Vec<u8> {
    let mut builder = MessageBuilder::new(Class::Request, Method::Binding, transaction_id);

    let username = format!("{}:{}", remote.ufrag, local.ufrag);
    builder.attr(Username::new(&username));
    builder.attr(Priority { 0: priority });

    if controlling {
        builder.attr(IceControlling { 0: tie_breaker });
    } else {
        builder.attr(IceControlled { 0: tie_breaker });
    }

    if nominate {
        builder.attr(UseCandidate);
    }

    builder.attr_with(MessageIntegrity, IntegrityKey::new(&remote.pwd));
    builder.attr(Fingerprint);

    builder.finish()
}

/// Plain binding request without credentials, used against STUN servers
pub(crate) fn server_binding_request(transaction_id: TransactionId) -> Vec<u8> {
    let mut builder = MessageBuilder::new(Class::Request, Method::Binding, transaction_id);
    builder.attr(Fingerprint);
    builder.finish()
}

pub(crate) fn binding_success(
    transaction_id: TransactionId,
    local: &IceCredentials,
    source: SocketAddr,
) -> Vec<u8> {
    let mut builder = MessageBuilder::new(Class::Success, Method::Binding, transaction_id);

    builder.attr(XorMappedAddress(source));
    builder.attr_with(MessageIntegrity, IntegrityKey::new(&local.pwd));
    builder.attr(Fingerprint);

    builder.finish()
}

pub(crate) fn role_conflict_error(
    transaction_id: TransactionId,
    local: &IceCredentials,
    controlling: bool,
    tie_breaker: u64,
) -> Vec<u8> {
    let mut builder = MessageBuilder::new(Class::Error, Method::Binding, transaction_id);

    builder.attr(ErrorCode {
        number: 487,
        reason: "Role Conflict",
    });

    if controlling {
        builder.attr(IceControlling { 0: tie_breaker });
    } else {
        builder.attr(IceControlled { 0: tie_breaker });
    }

    builder.attr_with(MessageIntegrity, IntegrityKey::new(&local.pwd));
    builder.attr(Fingerprint);

    builder.finish()
}

/// Verify MESSAGE-INTEGRITY and, for requests, the USERNAME attribute
pub(crate) fn verify_credentials(
    local: &IceCredentials,
    remote: &IceCredentials,
    msg: &mut Message,
) -> bool {
    let is_request = matches!(msg.class(), Class::Request | Class::Indication);

    // Requests are keyed with our password, responses with the peer's
    let key = if is_request { &local.pwd } else { &remote.pwd };

    let integrity_ok = msg
        .attr_with::<MessageIntegrity>(IntegrityKey::new(key))
        .is_some_and(|r| r.is_ok());

    if !integrity_ok {
        return false;
    }

    if is_request {
        let expected = format!("{}:{}", local.ufrag, remote.ufrag);

        match msg.attr::<Username>() {
            Some(Ok(username)) => username.0 == expected,
            _ => {
                log::debug!("STUN request without valid USERNAME attribute");
                false
            }
        }
    } else {
        true
    }
}
