use crate::{DigestError, DigestUser};
use bytesstr::BytesStr;
use sha2::{Digest, Sha256};
use sip_types::header::typed::{DigestChallenge, DigestResponse};
use sip_types::Method;

/// Hash function negotiated through the challenge's algorithm directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl HashAlgorithm {
    pub(crate) fn from_challenge(algorithm: Option<&str>) -> Result<Self, DigestError> {
        match algorithm {
            None => Ok(HashAlgorithm::Md5),
            Some(a) if a.eq_ignore_ascii_case("MD5") => Ok(HashAlgorithm::Md5),
            Some(a) if a.eq_ignore_ascii_case("MD5-sess") => Ok(HashAlgorithm::Md5Sess),
            Some(a) if a.eq_ignore_ascii_case("SHA-256") => Ok(HashAlgorithm::Sha256),
            Some(a) if a.eq_ignore_ascii_case("SHA-256-sess") => Ok(HashAlgorithm::Sha256Sess),
            Some(other) => Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn is_session(self) -> bool {
        matches!(self, HashAlgorithm::Md5Sess | HashAlgorithm::Sha256Sess)
    }

    fn hash(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Md5 | HashAlgorithm::Md5Sess => {
                format!("{:x}", md5::compute(data))
            }
            HashAlgorithm::Sha256 | HashAlgorithm::Sha256Sess => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hex(&hasher.finalize())
            }
        }
    }
}

fn hex(data: &[u8]) -> String {
    use std::fmt::Write;

    data.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Pick a qop from the challenge's offer. Only `auth` is supported;
/// a missing qop directive falls back to the RFC 2069 style response.
pub(crate) fn select_qop(qop: Option<&str>) -> Result<Option<&'static str>, DigestError> {
    let Some(qop) = qop else {
        return Ok(None);
    };

    let supported = qop
        .split(',')
        .any(|option| option.trim().eq_ignore_ascii_case("auth"));

    if supported {
        Ok(Some("auth"))
    } else {
        Err(DigestError::UnsupportedQop(qop.to_string()))
    }
}

pub(crate) fn compute_ha1(
    algorithm: HashAlgorithm,
    user: &DigestUser,
    challenge: &DigestChallenge,
    cnonce: &BytesStr,
) -> String {
    let a1 = [
        format!("{}:{}:", user.user, challenge.realm).into_bytes(),
        user.password.clone(),
    ]
    .concat();

    let ha1 = algorithm.hash(&a1);

    if algorithm.is_session() {
        algorithm.hash(format!("{ha1}:{}:{cnonce}", challenge.nonce).as_bytes())
    } else {
        ha1
    }
}

pub(crate) fn compute_response(
    algorithm: HashAlgorithm,
    ha1: &str,
    header: &DigestResponse,
    method: &Method,
    uri: &str,
) -> String {
    let ha2 = algorithm.hash(format!("{method}:{uri}").as_bytes());

    let input = match (&header.qop, header.nc, &header.cnonce) {
        (Some(qop), Some(nc), Some(cnonce)) => {
            format!("{ha1}:{}:{nc:08x}:{cnonce}:{qop}:{ha2}", header.nonce)
        }
        _ => format!("{ha1}:{}:{ha2}", header.nonce),
    };

    algorithm.hash(input.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    /// Example from RFC 2617 section 3.5, adapted to MD5 with qop=auth
    #[test]
    fn rfc2617_example() {
        let algorithm = HashAlgorithm::Md5;

        let ha1 = algorithm.hash(b"Mufasa:testrealm@host.com:Circle Of Life");

        let header = DigestResponse {
            username: "Mufasa".into(),
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            uri: "/dir/index.html".into(),
            response: "".into(),
            algorithm: None,
            cnonce: Some("0a4f113b".into()),
            qop: Some("auth".into()),
            nc: Some(1),
            opaque: None,
        };

        let response = compute_response(
            algorithm,
            &ha1,
            &header,
            &Method::from("GET"),
            "/dir/index.html",
        );

        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn qop_selection() {
        assert_eq!(select_qop(None).unwrap(), None);
        assert_eq!(select_qop(Some("auth")).unwrap(), Some("auth"));
        assert_eq!(select_qop(Some("auth-int,auth")).unwrap(), Some("auth"));
        assert!(select_qop(Some("auth-int")).is_err());
    }

    #[test]
    fn unknown_algorithm() {
        assert!(HashAlgorithm::from_challenge(Some("AKAv1-MD5")).is_err());
        assert_eq!(
            HashAlgorithm::from_challenge(None).unwrap(),
            HashAlgorithm::Md5
        );
    }
}
