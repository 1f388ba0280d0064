use crate::header::{HeaderError, Name, TypedHeader};
use crate::parse::unquote;
use bytesstr::BytesStr;
use std::fmt::Write;

/// Digest challenge carried in `WWW-Authenticate` / `Proxy-Authenticate`
///
/// [RFC3261](https://www.rfc-editor.org/rfc/rfc3261#section-22)
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub opaque: Option<BytesStr>,
    pub algorithm: Option<BytesStr>,
    /// Raw qop-options list, e.g. `auth` or `auth,auth-int`
    pub qop: Option<BytesStr>,
    pub stale: bool,
}

impl TypedHeader for DigestChallenge {
    const NAME: Name = Name::WwwAuthenticate;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = || HeaderError::Malformed(Name::WwwAuthenticate);

        let rest = strip_scheme(value, "Digest").ok_or_else(malformed)?;

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop = None;
        let mut stale = false;

        for (key, value) in auth_params(rest) {
            match () {
                _ if key.eq_ignore_ascii_case("realm") => realm = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("nonce") => nonce = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("opaque") => opaque = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("algorithm") => {
                    algorithm = Some(BytesStr::from(value))
                }
                _ if key.eq_ignore_ascii_case("qop") => qop = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("stale") => {
                    stale = value.eq_ignore_ascii_case("true")
                }
                _ => {}
            }
        }

        Ok(DigestChallenge {
            realm: realm.ok_or_else(malformed)?,
            nonce: nonce.ok_or_else(malformed)?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    fn encode(&self) -> String {
        let mut out = format!("Digest realm=\"{}\", nonce=\"{}\"", self.realm, self.nonce);

        if let Some(opaque) = &self.opaque {
            let _ = write!(out, ", opaque=\"{opaque}\"");
        }

        if let Some(algorithm) = &self.algorithm {
            let _ = write!(out, ", algorithm={algorithm}");
        }

        if let Some(qop) = &self.qop {
            let _ = write!(out, ", qop=\"{qop}\"");
        }

        if self.stale {
            out.push_str(", stale=true");
        }

        out
    }
}

/// Digest response carried in `Authorization` / `Proxy-Authorization`
#[derive(Debug, Clone)]
pub struct DigestResponse {
    pub username: BytesStr,
    pub realm: BytesStr,
    pub nonce: BytesStr,
    /// Request URI the digest was computed over
    pub uri: BytesStr,
    pub response: BytesStr,
    pub algorithm: Option<BytesStr>,
    pub cnonce: Option<BytesStr>,
    pub qop: Option<BytesStr>,
    /// Nonce use count, printed as 8 digit hex
    pub nc: Option<u32>,
    pub opaque: Option<BytesStr>,
}

impl TypedHeader for DigestResponse {
    const NAME: Name = Name::Authorization;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = || HeaderError::Malformed(Name::Authorization);

        let rest = strip_scheme(value, "Digest").ok_or_else(malformed)?;

        let mut username = None;
        let mut realm = None;
        let mut nonce = None;
        let mut uri = None;
        let mut response = None;
        let mut algorithm = None;
        let mut cnonce = None;
        let mut qop = None;
        let mut nc = None;
        let mut opaque = None;

        for (key, value) in auth_params(rest) {
            match () {
                _ if key.eq_ignore_ascii_case("username") => username = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("realm") => realm = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("nonce") => nonce = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("uri") => uri = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("response") => response = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("algorithm") => {
                    algorithm = Some(BytesStr::from(value))
                }
                _ if key.eq_ignore_ascii_case("cnonce") => cnonce = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("qop") => qop = Some(BytesStr::from(value)),
                _ if key.eq_ignore_ascii_case("nc") => nc = u32::from_str_radix(value, 16).ok(),
                _ if key.eq_ignore_ascii_case("opaque") => opaque = Some(BytesStr::from(value)),
                _ => {}
            }
        }

        Ok(DigestResponse {
            username: username.ok_or_else(malformed)?,
            realm: realm.ok_or_else(malformed)?,
            nonce: nonce.ok_or_else(malformed)?,
            uri: uri.ok_or_else(malformed)?,
            response: response.ok_or_else(malformed)?,
            algorithm,
            cnonce,
            qop,
            nc,
            opaque,
        })
    }

    fn encode(&self) -> String {
        let mut out = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.username, self.realm, self.nonce, self.uri, self.response
        );

        if let Some(algorithm) = &self.algorithm {
            let _ = write!(out, ", algorithm={algorithm}");
        }

        if let Some(cnonce) = &self.cnonce {
            let _ = write!(out, ", cnonce=\"{cnonce}\"");
        }

        if let Some(qop) = &self.qop {
            let _ = write!(out, ", qop={qop}");
        }

        if let Some(nc) = self.nc {
            let _ = write!(out, ", nc={nc:08x}");
        }

        if let Some(opaque) = &self.opaque {
            let _ = write!(out, ", opaque=\"{opaque}\"");
        }

        out
    }
}

fn strip_scheme<'i>(i: &'i str, scheme: &str) -> Option<&'i str> {
    let i = i.trim_start();

    if i.len() > scheme.len()
        && i[..scheme.len()].eq_ignore_ascii_case(scheme)
        && i[scheme.len()..].starts_with(' ')
    {
        Some(i[scheme.len()..].trim_start())
    } else {
        None
    }
}

/// Iterate over the comma separated `key=value` parameters of a credentials
/// string, honoring quoted values
fn auth_params(i: &str) -> impl Iterator<Item = (&str, &str)> {
    split_quoted_commas(i).filter_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        Some((key.trim(), unquote(value.trim())))
    })
}

fn split_quoted_commas(i: &str) -> impl Iterator<Item = &str> {
    let mut rest = i;

    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }

        let mut in_quotes = false;

        for (idx, c) in rest.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    let item = &rest[..idx];
                    rest = &rest[idx + 1..];
                    return Some(item);
                }
                _ => {}
            }
        }

        let item = rest;
        rest = "";
        Some(item)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn challenge() {
        let challenge = DigestChallenge::decode(&BytesStr::from_static(
            "Digest realm=\"example.org\", nonce=\"abc123\", qop=\"auth\", algorithm=MD5",
        ))
        .unwrap();

        assert_eq!(challenge.realm, "example.org");
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert!(!challenge.stale);
    }

    #[test]
    fn quoted_comma_survives() {
        let challenge = DigestChallenge::decode(&BytesStr::from_static(
            "Digest realm=\"a,b\", nonce=\"n\"",
        ))
        .unwrap();

        assert_eq!(challenge.realm, "a,b");
    }

    #[test]
    fn response_round_trip() {
        let response = DigestResponse {
            username: "1001".into(),
            realm: "example.org".into(),
            nonce: "abc123".into(),
            uri: "sip:example.org".into(),
            response: "6629fae49393a05397450978507c4ef1".into(),
            algorithm: None,
            cnonce: Some("0a4f113b".into()),
            qop: Some("auth".into()),
            nc: Some(1),
            opaque: None,
        };

        let encoded = BytesStr::from(response.encode());
        let decoded = DigestResponse::decode(&encoded).unwrap();

        assert_eq!(decoded.username, "1001");
        assert_eq!(decoded.nc, Some(1));
        assert_eq!(decoded.qop.as_deref(), Some("auth"));
        assert!(encoded.contains("nc=00000001"));
    }
}
