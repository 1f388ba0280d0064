use crate::host::HostPort;
use crate::parse::{param_char, user_char};
use bytesstr::BytesStr;
use std::fmt;
use std::str::FromStr;

/// A `sip:` / `sips:` URI.
///
/// URI headers (the part after `?`) are carried verbatim but otherwise
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<BytesStr>,
    pub host_port: HostPort,
    pub params: Params,
    pub header_part: Option<BytesStr>,
}

impl SipUri {
    pub fn new(host_port: HostPort) -> Self {
        Self {
            sips: false,
            user: None,
            host_port,
            params: Params::new(),
            header_part: None,
        }
    }

    pub fn user(mut self, user: impl Into<BytesStr>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Equality for URI comparison purposes: scheme, user and host-port
    pub fn compare(&self, other: &Self) -> bool {
        self.sips == other.sips && self.user == other.user && self.host_port == other.host_port
    }

    pub(crate) fn parse(i: &str) -> Option<SipUri> {
        let (sips, rest) = if let Some(rest) = strip_prefix_ignore_case(i, "sips:") {
            (true, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(i, "sip:") {
            (false, rest)
        } else {
            return None;
        };

        let (user, rest) = match rest.split_once('@') {
            Some((user_part, rest)) => {
                // password in the user part is deprecated, strip it
                let user = user_part.split(':').next().unwrap_or(user_part);

                if user.is_empty() || !user.chars().all(user_char) {
                    return None;
                }

                (Some(BytesStr::from(user)), rest)
            }
            None => (None, rest),
        };

        let (rest, header_part) = match rest.split_once('?') {
            Some((rest, headers)) => (rest, Some(BytesStr::from(headers))),
            None => (rest, None),
        };

        let (host, params) = match rest.split_once(';') {
            Some((host, params)) => (host, Params::parse(params)?),
            None => (rest, Params::new()),
        };

        Some(SipUri {
            sips,
            user,
            host_port: HostPort::parse(host)?,
            params,
            header_part,
        })
    }
}

fn strip_prefix_ignore_case<'i>(i: &'i str, prefix: &str) -> Option<&'i str> {
    if i.len() >= prefix.len() && i[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&i[prefix.len()..])
    } else {
        None
    }
}

impl FromStr for SipUri {
    type Err = InvalidSipUri;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.trim()).ok_or(InvalidSipUri)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid sip uri")]
pub struct InvalidSipUri;

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.sips { "sips:" } else { "sip:" })?;

        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }

        write!(f, "{}{}", self.host_port, self.params)?;

        if let Some(header_part) = &self.header_part {
            write!(f, "?{header_part}")?;
        }

        Ok(())
    }
}

/// `;key=value` parameters of URIs and headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(BytesStr, Option<BytesStr>)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&BytesStr> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn set(&mut self, name: impl Into<BytesStr>, value: impl Into<BytesStr>) {
        let name = name.into();
        let value = Some(value.into());

        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn set_flag(&mut self, name: impl Into<BytesStr>) {
        let name = name.into();

        if !self.contains(&name) {
            self.0.push((name, None));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn parse(i: &str) -> Option<Params> {
        let mut params = Vec::new();

        for pair in i.split(';') {
            if pair.is_empty() {
                continue;
            }

            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (pair, None),
            };

            if !key.chars().all(param_char) {
                return None;
            }

            if let Some(value) = value {
                if !value.chars().all(param_char) {
                    return None;
                }
            }

            params.push((BytesStr::from(key), value.map(BytesStr::from)));
        }

        Some(Params(params))
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.0 {
            match value {
                Some(value) => write!(f, ";{key}={value}")?,
                None => write!(f, ";{key}")?,
            }
        }

        Ok(())
    }
}

/// URI with an optional display name, as used in From/To/Contact headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<BytesStr>,
    pub uri: SipUri,
}

impl NameAddr {
    pub fn uri(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
        }
    }

    pub fn new(display_name: impl Into<BytesStr>, uri: SipUri) -> Self {
        Self {
            display_name: Some(display_name.into()),
            uri,
        }
    }

    /// Parse a `name-addr` or `addr-spec`, returning the remaining input
    /// (parameters outside the angle brackets)
    pub(crate) fn parse(i: &str) -> Option<(NameAddr, &str)> {
        let i = i.trim_start();

        if let Some(open) = i.find('<') {
            let display_name = i[..open].trim();
            let display_name = crate::parse::unquote(display_name).trim();

            let close = i.find('>')?;
            let uri = SipUri::parse(i[open + 1..close].trim())?;

            let name_addr = NameAddr {
                display_name: (!display_name.is_empty()).then(|| BytesStr::from(display_name)),
                uri,
            };

            Some((name_addr, &i[close + 1..]))
        } else {
            // addr-spec form: everything after `;` belongs to the header
            let (uri, rest) = match i.find(';') {
                Some(semi) => (&i[..semi], &i[semi..]),
                None => (i, ""),
            };

            Some((NameAddr::uri(SipUri::parse(uri.trim())?), rest))
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display_name) = &self.display_name {
            write!(f, "\"{display_name}\" ")?;
        }

        write!(f, "<{}>", self.uri)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uri_round_trip() {
        for uri in [
            "sip:example.org",
            "sip:alice@example.org",
            "sip:alice@example.org:5080",
            "sips:alice@192.0.2.3:5061",
            "sip:alice@[2001:db8::1]:5060",
            "sip:alice@example.org;transport=tcp",
        ] {
            let parsed: SipUri = uri.parse().unwrap();
            assert_eq!(parsed.to_string(), uri, "{uri}");
        }
    }

    #[test]
    fn uri_components() {
        let uri: SipUri = "sips:bob@biloxi.example.com:5061;transport=tcp".parse().unwrap();

        assert!(uri.sips);
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.host_port.port, Some(5061));
        assert_eq!(uri.params.get("transport").map(|v| &**v), Some("tcp"));
    }

    #[test]
    fn invalid_uris() {
        assert!("http://example.org".parse::<SipUri>().is_err());
        assert!("sip:".parse::<SipUri>().is_err());
        assert!("sip:@example.org".parse::<SipUri>().is_err());
    }

    #[test]
    fn name_addr_forms() {
        let (name_addr, rest) = NameAddr::parse("\"Alice\" <sip:alice@example.org>;tag=88").unwrap();
        assert_eq!(name_addr.display_name.as_deref(), Some("Alice"));
        assert_eq!(rest, ";tag=88");

        let (name_addr, rest) = NameAddr::parse("sip:bob@example.org;tag=77").unwrap();
        assert_eq!(name_addr.display_name, None);
        assert_eq!(name_addr.uri.user.as_deref(), Some("bob"));
        assert_eq!(rest, ";tag=77");

        let (name_addr, _) = NameAddr::parse("<sip:carol@example.org;transport=udp>").unwrap();
        assert!(name_addr.uri.params.contains("transport"));
    }
}
