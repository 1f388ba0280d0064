use crate::dialog::DialogState;
use media_session::MediaSessionError;
use std::fmt;
use transport::TransportError;

/// Synchronous errors returned by the agent's operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("dialog not found (stale or destroyed handle)")]
    DialogNotFound,
    #[error("operation invalid in dialog state {0:?}")]
    InvalidDialogState(DialogState),
    #[error("target is not a valid or resolvable SIP uri")]
    InvalidTarget,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Core(#[from] sip_core::Error),
    #[error(transparent)]
    Media(#[from] MediaSessionError),
}

/// Classified asynchronous failures, surfaced through
/// [`AgentEvent::Error`](crate::AgentEvent::Error).
///
/// Each kind maps into a 32 bit error code: high bit set, a module byte
/// (transport=1, sip=2, rtp=3, codec=4, media=5) and a per-module number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    TransportCreateFailed,
    SipCreateFailed,
    SipSendFailed,
    SipParseFailed,
    SipAuthFailed,
    SipTimeout,
    SipRegisterFailed,
    SipCallFailed,
    MediaSdpFailed,
    MediaIceFailed,
    MediaTimeout,
    AllocatorFailed,
    TimerFailed,
}

impl AgentErrorKind {
    const fn module_and_code(self) -> (u32, u32) {
        match self {
            AgentErrorKind::TransportCreateFailed => (1, 1),
            AgentErrorKind::SipCreateFailed => (2, 1),
            AgentErrorKind::SipSendFailed => (2, 2),
            AgentErrorKind::SipParseFailed => (2, 3),
            AgentErrorKind::SipAuthFailed => (2, 4),
            AgentErrorKind::SipTimeout => (2, 5),
            AgentErrorKind::SipRegisterFailed => (2, 6),
            AgentErrorKind::SipCallFailed => (2, 7),
            AgentErrorKind::MediaSdpFailed => (5, 1),
            AgentErrorKind::MediaIceFailed => (5, 2),
            AgentErrorKind::MediaTimeout => (5, 3),
            AgentErrorKind::AllocatorFailed => (0, 1),
            AgentErrorKind::TimerFailed => (0, 2),
        }
    }

    /// Numeric error code: `0x8000_0000 | module << 16 | code`
    pub const fn code(self) -> u32 {
        let (module, code) = self.module_and_code();
        0x8000_0000 | module << 16 | code
    }

    pub const fn description(self) -> &'static str {
        match self {
            AgentErrorKind::TransportCreateFailed => "failed to create transport",
            AgentErrorKind::SipCreateFailed => "failed to create SIP endpoint",
            AgentErrorKind::SipSendFailed => "failed to send SIP message",
            AgentErrorKind::SipParseFailed => "failed to parse SIP message",
            AgentErrorKind::SipAuthFailed => "SIP authentication failed",
            AgentErrorKind::SipTimeout => "SIP request timed out",
            AgentErrorKind::SipRegisterFailed => "registration rejected",
            AgentErrorKind::SipCallFailed => "call failed",
            AgentErrorKind::MediaSdpFailed => "SDP negotiation failed",
            AgentErrorKind::MediaIceFailed => "ICE connectivity failed",
            AgentErrorKind::MediaTimeout => "media timed out",
            AgentErrorKind::AllocatorFailed => "out of memory",
            AgentErrorKind::TimerFailed => "timer subsystem failed",
        }
    }
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod test {
    use super::AgentErrorKind;

    #[test]
    fn codes_have_high_bit_and_module_byte() {
        let code = AgentErrorKind::SipTimeout.code();

        assert_eq!(code & 0x8000_0000, 0x8000_0000);
        assert_eq!((code >> 16) & 0xFF, 2);

        let media = AgentErrorKind::MediaIceFailed.code();
        assert_eq!((media >> 16) & 0xFF, 5);
    }

    #[test]
    fn codes_are_unique() {
        let kinds = [
            AgentErrorKind::TransportCreateFailed,
            AgentErrorKind::SipCreateFailed,
            AgentErrorKind::SipSendFailed,
            AgentErrorKind::SipParseFailed,
            AgentErrorKind::SipAuthFailed,
            AgentErrorKind::SipTimeout,
            AgentErrorKind::SipRegisterFailed,
            AgentErrorKind::SipCallFailed,
            AgentErrorKind::MediaSdpFailed,
            AgentErrorKind::MediaIceFailed,
            AgentErrorKind::MediaTimeout,
            AgentErrorKind::AllocatorFailed,
            AgentErrorKind::TimerFailed,
        ];

        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
