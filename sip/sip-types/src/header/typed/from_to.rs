use crate::header::{HeaderError, Name, TypedHeader};
use crate::uri::{NameAddr, Params};
use bytesstr::BytesStr;

/// Value of the `From` and `To` headers: an address plus the dialog tag.
///
/// The type itself carries no header name; store it under [`Name::From`]
/// or [`Name::To`] via [`Headers::insert_named`](crate::header::Headers::insert_named).
///
/// [RFC3261](https://www.rfc-editor.org/rfc/rfc3261#section-20.20)
#[derive(Debug, Clone)]
pub struct FromTo {
    pub addr: NameAddr,
    pub tag: Option<BytesStr>,
    pub params: Params,
}

impl FromTo {
    pub fn new(addr: NameAddr, tag: Option<BytesStr>) -> Self {
        Self {
            addr,
            tag,
            params: Params::new(),
        }
    }
}

impl TypedHeader for FromTo {
    // placeholder, From/To are always accessed by explicit name
    const NAME: Name = Name::From;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = || HeaderError::Malformed(Name::From);

        let (addr, rest) = NameAddr::parse(value).ok_or_else(malformed)?;

        let mut params = match rest.trim().strip_prefix(';') {
            Some(params) => Params::parse(params).ok_or_else(malformed)?,
            None => Params::new(),
        };

        let tag = params.get("tag").cloned();
        params.remove("tag");

        Ok(FromTo { addr, tag, params })
    }

    fn encode(&self) -> String {
        let mut out = self.addr.to_string();

        if let Some(tag) = &self.tag {
            out.push_str(";tag=");
            out.push_str(tag);
        }

        out.push_str(&self.params.to_string());
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn with_tag() {
        let from = FromTo::decode(&BytesStr::from_static(
            "\"Alice\" <sip:alice@atlanta.example.com>;tag=9fxced76sl",
        ))
        .unwrap();

        assert_eq!(from.addr.display_name.as_deref(), Some("Alice"));
        assert_eq!(from.tag.as_deref(), Some("9fxced76sl"));

        assert_eq!(
            from.encode(),
            "\"Alice\" <sip:alice@atlanta.example.com>;tag=9fxced76sl"
        );
    }

    #[test]
    fn without_tag_or_brackets() {
        let to = FromTo::decode(&BytesStr::from_static("sip:bob@biloxi.example.com")).unwrap();

        assert_eq!(to.tag, None);
        assert_eq!(to.addr.uri.user.as_deref(), Some("bob"));
    }
}
