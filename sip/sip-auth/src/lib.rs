//! Digest authentication (RFC 2617 / RFC 7616) for SIP requests.
//!
//! [`DigestAuthenticator`] consumes 401/407 challenges and attaches
//! Authorization headers to subsequent requests. Each realm is authenticated
//! once per nonce; a nonce that keeps getting rejected is treated as a
//! credential failure.

use bytesstr::BytesStr;
use sip_types::header::typed::{DigestChallenge, DigestResponse};
use sip_types::header::{Headers, Name};
use sip_types::Method;
use std::collections::HashMap;

mod digest;

pub use digest::HashAlgorithm;

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("no credentials configured for realm {0:?}")]
    MissingCredentials(String),
    #[error("challenge uses unsupported algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("challenge uses unsupported qop {0:?}")]
    UnsupportedQop(String),
    #[error("authentication failed for realm {0:?}")]
    FailedToAuthenticate(String),
    #[error("response contained no usable digest challenge")]
    NoChallenge,
}

/// Credentials of a single user
#[derive(Clone)]
pub struct DigestUser {
    user: String,
    password: Vec<u8>,
}

impl DigestUser {
    pub fn new(user: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// Credentials mapped to their realm, with an optional default for realms
/// not explicitly configured
#[derive(Default, Clone)]
pub struct DigestCredentials {
    default: Option<DigestUser>,
    realms: HashMap<String, DigestUser>,
}

impl DigestCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, credentials: DigestUser) {
        self.default = Some(credentials);
    }

    pub fn add_for_realm(&mut self, realm: impl Into<String>, credentials: DigestUser) {
        self.realms.insert(realm.into(), credentials);
    }

    pub fn get_for_realm(&self, realm: &str) -> Option<&DigestUser> {
        self.realms.get(realm).or(self.default.as_ref())
    }
}

/// A cached authorization for one realm
struct CachedResponse {
    realm: BytesStr,
    header: DigestResponse,
    is_proxy: bool,
    algorithm: HashAlgorithm,
    ha1: String,
}

/// Solves digest challenges found in 401/407 responses
pub struct DigestAuthenticator {
    pub credentials: DigestCredentials,
    responses: Vec<CachedResponse>,
}

impl DigestAuthenticator {
    pub fn new(credentials: DigestCredentials) -> Self {
        Self {
            credentials,
            responses: vec![],
        }
    }

    /// Attach cached Authorization headers to an outgoing request
    pub fn authorize_request(&mut self, headers: &mut Headers, method: &Method, uri: &str) {
        for cached in &mut self.responses {
            let name = if cached.is_proxy {
                Name::ProxyAuthorization
            } else {
                Name::Authorization
            };

            cached.header.uri = BytesStr::from(uri);

            if let Some(nc) = &mut cached.header.nc {
                *nc += 1;
            }

            cached.header.response = digest::compute_response(
                cached.algorithm,
                &cached.ha1,
                &cached.header,
                method,
                uri,
            )
            .into();

            headers.remove(&name);
            headers.insert_named(name, &cached.header);
        }
    }

    /// Digest the challenges of a 401/407 response.
    ///
    /// On success the computed authorizations are cached and attached to
    /// requests by [`authorize_request`](Self::authorize_request). An
    /// unchanged nonce that was already answered fails instead of looping.
    pub fn handle_rejection(&mut self, response_headers: &Headers) -> Result<(), DigestError> {
        let mut any = false;

        for (is_proxy, name) in [
            (false, Name::WwwAuthenticate),
            (true, Name::ProxyAuthenticate),
        ] {
            for challenge in response_headers.get_all_named::<DigestChallenge>(&name) {
                any = true;
                self.handle_challenge(challenge, is_proxy)?;
            }
        }

        if any {
            Ok(())
        } else {
            Err(DigestError::NoChallenge)
        }
    }

    fn handle_challenge(
        &mut self,
        challenge: DigestChallenge,
        is_proxy: bool,
    ) -> Result<(), DigestError> {
        let previous = self
            .responses
            .iter()
            .position(|cached| cached.realm == challenge.realm);

        if let Some(index) = previous {
            let stale_retry = challenge.stale
                || self.responses[index].header.nonce != challenge.nonce;

            if !stale_retry {
                // same nonce rejected again, the credentials are wrong
                return Err(DigestError::FailedToAuthenticate(
                    challenge.realm.to_string(),
                ));
            }

            self.responses.remove(index);
        }

        let algorithm = HashAlgorithm::from_challenge(challenge.algorithm.as_deref())?;
        let qop = digest::select_qop(challenge.qop.as_deref())?;

        let user = self
            .credentials
            .get_for_realm(&challenge.realm)
            .ok_or_else(|| DigestError::MissingCredentials(challenge.realm.to_string()))?;

        let cnonce = BytesStr::from(uuid::Uuid::new_v4().simple().to_string());

        let ha1 = digest::compute_ha1(algorithm, user, &challenge, &cnonce);

        let header = DigestResponse {
            username: BytesStr::from(user.user.as_str()),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            // filled in per request by authorize_request
            uri: BytesStr::from_static(""),
            response: BytesStr::from_static(""),
            algorithm: challenge.algorithm.clone(),
            cnonce: qop.is_some().then_some(cnonce),
            qop: qop.map(BytesStr::from_static),
            nc: qop.is_some().then_some(0),
            opaque: challenge.opaque.clone(),
        };

        log::debug!("answering digest challenge for realm {:?}", &*challenge.realm);

        self.responses.push(CachedResponse {
            realm: challenge.realm,
            header,
            is_proxy,
            algorithm,
            ha1,
        });

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn challenge_headers(value: &str) -> Headers {
        let mut headers = Headers::new();
        headers.push(Name::WwwAuthenticate, value.to_string());
        headers
    }

    fn authenticator() -> DigestAuthenticator {
        let mut credentials = DigestCredentials::new();
        credentials.add_for_realm("example.org", DigestUser::new("1001", "secret"));
        DigestAuthenticator::new(credentials)
    }

    #[test]
    fn rfc2617_md5_response() {
        let mut auth = authenticator();

        auth.handle_rejection(&challenge_headers(
            "Digest realm=\"example.org\", nonce=\"abc123\"",
        ))
        .unwrap();

        let mut headers = Headers::new();
        auth.authorize_request(&mut headers, &Method::REGISTER, "sip:example.org");

        let response: DigestResponse = headers.get().unwrap();

        // MD5(MD5("1001:example.org:secret"):"abc123":MD5("REGISTER:sip:example.org"))
        let ha1 = format!("{:x}", md5::compute(b"1001:example.org:secret"));
        let ha2 = format!("{:x}", md5::compute(b"REGISTER:sip:example.org"));
        let expected = format!("{:x}", md5::compute(format!("{ha1}:abc123:{ha2}")));

        assert_eq!(&*response.response, expected);
        assert_eq!(response.nc, None);
        assert_eq!(response.cnonce, None);
    }

    #[test]
    fn qop_auth_increments_nc() {
        let mut auth = authenticator();

        auth.handle_rejection(&challenge_headers(
            "Digest realm=\"example.org\", nonce=\"abc123\", qop=\"auth\"",
        ))
        .unwrap();

        let mut headers = Headers::new();
        auth.authorize_request(&mut headers, &Method::REGISTER, "sip:example.org");
        let first: DigestResponse = headers.get().unwrap();
        assert_eq!(first.nc, Some(1));

        let mut headers = Headers::new();
        auth.authorize_request(&mut headers, &Method::REGISTER, "sip:example.org");
        let second: DigestResponse = headers.get().unwrap();
        assert_eq!(second.nc, Some(2));

        assert_ne!(first.response, second.response);
    }

    #[test]
    fn repeated_rejection_fails() {
        let mut auth = authenticator();

        let headers = challenge_headers("Digest realm=\"example.org\", nonce=\"abc123\"");

        auth.handle_rejection(&headers).unwrap();

        assert!(matches!(
            auth.handle_rejection(&headers),
            Err(DigestError::FailedToAuthenticate(_))
        ));
    }

    #[test]
    fn stale_nonce_is_retried() {
        let mut auth = authenticator();

        auth.handle_rejection(&challenge_headers(
            "Digest realm=\"example.org\", nonce=\"abc123\"",
        ))
        .unwrap();

        auth.handle_rejection(&challenge_headers(
            "Digest realm=\"example.org\", nonce=\"def456\", stale=true",
        ))
        .unwrap();

        let mut headers = Headers::new();
        auth.authorize_request(&mut headers, &Method::REGISTER, "sip:example.org");

        let response: DigestResponse = headers.get().unwrap();
        assert_eq!(response.nonce, "def456");
    }

    #[test]
    fn missing_credentials() {
        let mut auth = DigestAuthenticator::new(DigestCredentials::new());

        assert!(matches!(
            auth.handle_rejection(&challenge_headers(
                "Digest realm=\"other.org\", nonce=\"n\""
            )),
            Err(DigestError::MissingCredentials(_))
        ));
    }

    #[test]
    fn proxy_challenge_answered_under_proxy_name() {
        let mut auth = authenticator();

        let mut headers = Headers::new();
        headers.push(
            Name::ProxyAuthenticate,
            "Digest realm=\"example.org\", nonce=\"n1\"".to_string(),
        );

        auth.handle_rejection(&headers).unwrap();

        let mut request = Headers::new();
        auth.authorize_request(&mut request, &Method::INVITE, "sip:bob@example.org");

        assert!(request.raw(&Name::ProxyAuthorization).is_some());
        assert!(request.raw(&Name::Authorization).is_none());
    }
}
