use crate::header::{HeaderError, Name, TypedHeader};
use crate::host::HostPort;
use crate::uri::Params;
use bytesstr::BytesStr;

/// `Via` header, one hop of the response path
///
/// [RFC3261](https://www.rfc-editor.org/rfc/rfc3261#section-20.42)
#[derive(Debug, Clone)]
pub struct Via {
    /// Transport token of the sent-protocol, e.g. `UDP`
    pub transport: BytesStr,
    pub sent_by: HostPort,
    pub params: Params,
}

impl Via {
    pub fn new(transport: impl Into<BytesStr>, sent_by: HostPort, branch: impl Into<BytesStr>) -> Self {
        let mut params = Params::new();
        params.set("branch", branch);

        Self {
            transport: transport.into(),
            sent_by,
            params,
        }
    }

    pub fn branch(&self) -> Option<&BytesStr> {
        self.params.get("branch")
    }
}

impl TypedHeader for Via {
    const NAME: Name = Name::Via;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = || HeaderError::Malformed(Name::Via);

        let rest = value
            .strip_prefix("SIP/2.0/")
            .ok_or_else(malformed)?
            .trim_start();

        let transport_end = rest.find(char::is_whitespace).ok_or_else(malformed)?;
        let transport = &rest[..transport_end];
        let rest = rest[transport_end..].trim_start();

        let (sent_by, params) = match rest.split_once(';') {
            Some((sent_by, params)) => (
                sent_by.trim_end(),
                Params::parse(params).ok_or_else(malformed)?,
            ),
            None => (rest.trim_end(), Params::new()),
        };

        Ok(Via {
            transport: BytesStr::from(transport),
            sent_by: HostPort::parse(sent_by).ok_or_else(malformed)?,
            params,
        })
    }

    fn encode(&self) -> String {
        format!("SIP/2.0/{} {}{}", self.transport, self.sent_by, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn via_round_trip() {
        let via = Via::decode(&BytesStr::from_static(
            "SIP/2.0/UDP 192.0.2.4:5060;branch=z9hG4bK77ef4c2312983.1",
        ))
        .unwrap();

        assert_eq!(via.transport, "UDP");
        assert_eq!(via.sent_by.port, Some(5060));
        assert_eq!(via.branch().unwrap(), "z9hG4bK77ef4c2312983.1");

        assert_eq!(
            via.encode(),
            "SIP/2.0/UDP 192.0.2.4:5060;branch=z9hG4bK77ef4c2312983.1"
        );
    }
}
