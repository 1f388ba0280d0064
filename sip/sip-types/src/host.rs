//! [`Host`] and [`HostPort`] as found in URIs and the Via header

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Either an IP address or a DNS name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Name(bytesstr::BytesStr),
}

impl Host {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Host::Ip(ip) => Some(*ip),
            Host::Name(_) => None,
        }
    }

    pub(crate) fn parse(i: &str) -> Option<Host> {
        if i.is_empty() {
            return None;
        }

        // bracketed IPv6 reference
        if let Some(inner) = i.strip_prefix('[').and_then(|i| i.strip_suffix(']')) {
            return inner.parse().ok().map(|ip| Host::Ip(IpAddr::V6(ip)));
        }

        if let Ok(ip) = i.parse::<std::net::Ipv4Addr>() {
            return Some(Host::Ip(IpAddr::V4(ip)));
        }

        let valid_name = i
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));

        valid_name.then(|| Host::Name(i.into()))
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        Host::Ip(ip)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Host::Ip(IpAddr::V4(ip)) => write!(f, "{ip}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// [`Host`] paired with an optional port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn host_name(name: impl Into<bytesstr::BytesStr>) -> Self {
        Self {
            host: Host::Name(name.into()),
            port: None,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.host.ip()
    }

    /// Socket address, if the host is an IP address. Defaults the port to
    /// 5060 when absent.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .ip()
            .map(|ip| SocketAddr::new(ip, self.port.unwrap_or(5060)))
    }

    pub(crate) fn parse(i: &str) -> Option<HostPort> {
        // IPv6 reference, optionally followed by a port
        if let Some(rest) = i.strip_prefix('[') {
            let end = rest.find(']')?;
            let ip: std::net::Ipv6Addr = rest[..end].parse().ok()?;

            let port = match rest[end + 1..].strip_prefix(':') {
                Some(port) => Some(port.parse().ok()?),
                None if rest[end + 1..].is_empty() => None,
                None => return None,
            };

            return Some(HostPort {
                host: Host::Ip(IpAddr::V6(ip)),
                port,
            });
        }

        match i.split_once(':') {
            Some((host, port)) if !port.contains(':') => Some(HostPort {
                host: Host::parse(host)?,
                port: Some(port.parse().ok()?),
            }),
            // more than one colon: a bare IPv6 address
            Some(_) => {
                let ip: std::net::Ipv6Addr = i.parse().ok()?;
                Some(HostPort {
                    host: Host::Ip(IpAddr::V6(ip)),
                    port: None,
                })
            }
            None => Some(HostPort {
                host: Host::parse(i)?,
                port: None,
            }),
        }
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().into(),
            port: Some(addr.port()),
        }
    }
}

impl FromStr for HostPort {
    type Err = InvalidHostPort;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(InvalidHostPort)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid host or host:port")]
pub struct InvalidHostPort;

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;

        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[track_caller]
    fn round_trip(i: &str) {
        let parsed: HostPort = i.parse().unwrap();
        assert_eq!(parsed.to_string(), i);
    }

    #[test]
    fn host_port_forms() {
        round_trip("example.org");
        round_trip("example.org:5060");
        round_trip("192.0.2.5");
        round_trip("192.0.2.5:5080");
        round_trip("[2001:db8::1]");
        round_trip("[2001:db8::1]:5060");
    }

    #[test]
    fn classify() {
        let named: HostPort = "sip.example.org:5060".parse().unwrap();
        assert!(named.ip().is_none());
        assert_eq!(named.port, Some(5060));

        let ip: HostPort = "192.0.2.5".parse().unwrap();
        assert_eq!(
            ip.socket_addr(),
            Some("192.0.2.5:5060".parse().unwrap())
        );
    }

    #[test]
    fn garbage_is_rejected()  {
        assert!(HostPort::parse("exa mple").is_none());
        assert!(HostPort::parse("").is_none());
        assert!(HostPort::parse("host:port").is_none());
    }
}
