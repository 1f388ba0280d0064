use bytesstr::BytesStr;

use crate::header::{HeaderError, Name, TypedHeader};
use crate::uri::{NameAddr, Params};

/// `Contact` header
///
/// [RFC3261](https://www.rfc-editor.org/rfc/rfc3261#section-20.10)
#[derive(Debug, Clone)]
pub struct Contact {
    pub addr: NameAddr,
    pub params: Params,
}

impl Contact {
    pub fn new(addr: NameAddr) -> Self {
        Self {
            addr,
            params: Params::new(),
        }
    }

    /// Binding lifetime granted by a registrar
    pub fn expires(&self) -> Option<u32> {
        self.params.get("expires").and_then(|v| v.parse().ok())
    }
}

impl TypedHeader for Contact {
    const NAME: Name = Name::Contact;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = || HeaderError::Malformed(Name::Contact);

        let (addr, rest) = NameAddr::parse(value).ok_or_else(malformed)?;

        let params = match rest.trim().strip_prefix(';') {
            Some(params) => Params::parse(params).ok_or_else(malformed)?,
            None => Params::new(),
        };

        Ok(Contact { addr, params })
    }

    fn encode(&self) -> String {
        format!("{}{}", self.addr, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytesstr::BytesStr;

    #[test]
    fn contact_with_expires() {
        let contact =
            Contact::decode(&BytesStr::from_static("<sip:1001@192.0.2.7:5099>;expires=1800"))
                .unwrap();

        assert_eq!(contact.addr.uri.user.as_deref(), Some("1001"));
        assert_eq!(contact.expires(), Some(1800));

        assert_eq!(contact.encode(), "<sip:1001@192.0.2.7:5099>;expires=1800");
    }
}
