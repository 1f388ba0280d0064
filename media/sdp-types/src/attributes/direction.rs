use std::fmt;

/// Media direction attribute (`a=sendrecv` etc.)
///
/// Session- or media-level attribute, media-level wins.
///
/// [RFC8866](https://www.rfc-editor.org/rfc/rfc8866.html#section-6.7)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    SendRecv,
    RecvOnly,
    SendOnly,
    Inactive,
}

impl Direction {
    /// The direction from the peer's point of view
    pub fn flipped(self) -> Self {
        match self {
            Direction::SendRecv => Direction::SendRecv,
            Direction::RecvOnly => Direction::SendOnly,
            Direction::SendOnly => Direction::RecvOnly,
            Direction::Inactive => Direction::Inactive,
        }
    }

    pub fn send(self) -> bool {
        matches!(self, Direction::SendRecv | Direction::SendOnly)
    }

    pub fn recv(self) -> bool {
        matches!(self, Direction::SendRecv | Direction::RecvOnly)
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "sendrecv" => Some(Direction::SendRecv),
            "recvonly" => Some(Direction::RecvOnly),
            "sendonly" => Some(Direction::SendOnly),
            "inactive" => Some(Direction::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SendRecv => f.write_str("sendrecv"),
            Direction::RecvOnly => f.write_str("recvonly"),
            Direction::SendOnly => f.write_str("sendonly"),
            Direction::Inactive => f.write_str("inactive"),
        }
    }
}
