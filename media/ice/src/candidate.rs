use crate::Component;
use std::fmt;
use std::net::SocketAddr;

slotmap::new_key_type! {
    pub(crate) struct LocalId;
    pub(crate) struct RemoteId;
}

/// Candidate types in descending type-preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum CandidateKind {
    Host,
    PeerReflexive,
    ServerReflexive,
}

impl CandidateKind {
    pub(crate) fn type_preference(self) -> u32 {
        match self {
            CandidateKind::Host => 126,
            CandidateKind::PeerReflexive => 110,
            CandidateKind::ServerReflexive => 100,
        }
    }

    pub(crate) fn sdp_name(self) -> &'static str {
        match self {
            CandidateKind::Host => "host",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::ServerReflexive => "srflx",
        }
    }
}

pub(crate) struct Candidate {
    pub(crate) kind: CandidateKind,
    pub(crate) component: Component,
    pub(crate) addr: SocketAddr,
    /// Send-from address; equals `addr` for host candidates, the bound host
    /// address for reflexive ones
    pub(crate) base: SocketAddr,
    pub(crate) priority: u32,
    pub(crate) foundation: String,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CandidateKind::Host => write!(f, "host({})", self.addr),
            CandidateKind::PeerReflexive => {
                write!(f, "prflx(base:{}, peer:{})", self.base, self.addr)
            }
            CandidateKind::ServerReflexive => {
                write!(f, "srflx(base:{}, mapped:{})", self.base, self.addr)
            }
        }
    }
}

/// Compute a candidate priority per RFC 8445 section 5.1.2.1.
///
/// The first candidate of a kind gets the full local preference so that a
/// lone host candidate prints with the well-known priority 2130706431.
pub(crate) fn candidate_priority(kind: CandidateKind, same_kind_count: u32, component: Component) -> u32 {
    let local_preference = 65535u32.saturating_sub(same_kind_count);

    (kind.type_preference() << 24) + (local_preference << 8) + (256 - component as u32)
}

/// Pair priority per RFC 8445 section 6.1.2.3
pub(crate) fn pair_priority(local: u32, remote: u32, controlling: bool) -> u64 {
    let (g, d) = if controlling {
        (u64::from(local), u64::from(remote))
    } else {
        (u64::from(remote), u64::from(local))
    };

    (1u64 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_host_candidate_priority() {
        assert_eq!(
            candidate_priority(CandidateKind::Host, 0, Component::Rtp),
            2130706431
        );
    }

    #[test]
    fn rtcp_component_lowers_priority() {
        let rtp = candidate_priority(CandidateKind::Host, 0, Component::Rtp);
        let rtcp = candidate_priority(CandidateKind::Host, 0, Component::Rtcp);

        assert_eq!(rtp - 1, rtcp);
    }

    #[test]
    fn pair_priority_is_symmetric_across_roles() {
        let a = pair_priority(100, 200, true);
        let b = pair_priority(200, 100, false);

        assert_eq!(a, b);
    }
}
