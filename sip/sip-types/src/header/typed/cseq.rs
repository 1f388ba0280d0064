use crate::header::{HeaderError, Name, TypedHeader};
use crate::method::Method;
use bytesstr::BytesStr;

/// `CSeq` header
///
/// [RFC3261](https://www.rfc-editor.org/rfc/rfc3261#section-20.16)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub cseq: u32,
    pub method: Method,
}

impl TypedHeader for CSeq {
    const NAME: Name = Name::CSeq;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = || HeaderError::Malformed(Name::CSeq);

        let mut parts = value.split_whitespace();

        let cseq = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(malformed)?;

        let method = parts.next().map(Method::from).ok_or_else(malformed)?;

        Ok(CSeq { cseq, method })
    }

    fn encode(&self) -> String {
        format!("{} {}", self.cseq, self.method)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cseq() {
        let cseq = CSeq::decode(&BytesStr::from_static("4711 INVITE")).unwrap();

        assert_eq!(cseq.cseq, 4711);
        assert_eq!(cseq.method, Method::INVITE);
        assert_eq!(cseq.encode(), "4711 INVITE");
    }
}
