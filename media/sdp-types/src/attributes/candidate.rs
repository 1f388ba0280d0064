use crate::not_whitespace;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::bytes::complete::take_while1;
use nom::character::complete::{digit1, multispace1};
use nom::combinator::{map, map_res};
use nom::error::context;
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Either an IP address or a not-yet-resolved domain name
#[derive(Debug, Clone, PartialEq)]
pub enum UntaggedAddress {
    Fqdn(BytesStr),
    IpAddress(IpAddr),
}

impl UntaggedAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            UntaggedAddress::Fqdn(_) => None,
            UntaggedAddress::IpAddress(ip) => Some(*ip),
        }
    }

    pub(crate) fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(take_while1(not_whitespace), |slice: &str| {
            match slice.parse::<IpAddr>() {
                Ok(ip) => UntaggedAddress::IpAddress(ip),
                Err(_) => UntaggedAddress::Fqdn(BytesStr::from_parse(src, slice)),
            }
        })(i)
    }
}

impl From<IpAddr> for UntaggedAddress {
    fn from(ip: IpAddr) -> Self {
        UntaggedAddress::IpAddress(ip)
    }
}

impl fmt::Display for UntaggedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UntaggedAddress::Fqdn(name) => f.write_str(name),
            UntaggedAddress::IpAddress(ip) => write!(f, "{ip}"),
        }
    }
}

/// Candidate attribute (`a=candidate`)
///
/// [RFC8839](https://www.rfc-editor.org/rfc/rfc8839.html#section-5.1)
#[derive(Debug, Clone)]
pub struct IceCandidate {
    pub foundation: BytesStr,
    pub component: u32,
    pub transport: BytesStr,
    pub priority: u64,
    pub address: UntaggedAddress,
    pub port: u16,
    /// Candidate type, `host`, `srflx`, `prflx` or `relay`
    pub typ: BytesStr,
    pub rel_addr: Option<UntaggedAddress>,
    pub rel_port: Option<u16>,
}

impl IceCandidate {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (mut i, (foundation, _, component, _, transport, _, priority, _, address, _, port)) =
            context(
                "parsing candidate",
                tuple((
                    map(take_while1(not_whitespace), |s| BytesStr::from_parse(src, s)),
                    multispace1,
                    map_res(digit1, u32::from_str),
                    multispace1,
                    map(take_while1(not_whitespace), |s| BytesStr::from_parse(src, s)),
                    multispace1,
                    map_res(digit1, u64::from_str),
                    multispace1,
                    |i| UntaggedAddress::parse(src, i),
                    multispace1,
                    map_res(digit1, u16::from_str),
                )),
            )(i)?;

        // Remaining extension parameters come as "key value" pairs, with
        // "typ" being mandatory. Unknown pairs are skipped.
        let mut typ = None;
        let mut rel_addr = None;
        let mut rel_port = None;

        loop {
            let (rem, pair) = nom::combinator::opt(tuple((
                preceded(multispace1, take_while1(not_whitespace)),
                preceded(multispace1, take_while1(not_whitespace)),
            )))(i)?;

            let Some((key, value)) = pair else {
                break;
            };

            i = rem;

            match key {
                "typ" => typ = Some(BytesStr::from_parse(src, value)),
                "raddr" => match value.parse::<IpAddr>() {
                    Ok(ip) => rel_addr = Some(UntaggedAddress::IpAddress(ip)),
                    Err(_) => rel_addr = Some(UntaggedAddress::Fqdn(BytesStr::from_parse(src, value))),
                },
                "rport" => rel_port = value.parse().ok(),
                _ => {}
            }
        }

        let Some(typ) = typ else {
            return Err(nom::Err::Error(nom::error::VerboseError {
                errors: vec![(i, nom::error::VerboseErrorKind::Context("candidate without typ"))],
            }));
        };

        Ok((
            i,
            IceCandidate {
                foundation,
                component,
                transport,
                priority,
                address,
                port,
                typ,
                rel_addr,
                rel_port,
            },
        ))
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.typ
        )?;

        if let Some(rel_addr) = &self.rel_addr {
            write!(f, " raddr {rel_addr}")?;
        }

        if let Some(rel_port) = self.rel_port {
            write!(f, " rport {rel_port}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_candidate() {
        let input = BytesStr::from_static("1 1 UDP 2130706431 192.0.2.1 20000 typ host");

        let (rem, candidate) = IceCandidate::parse(input.as_ref(), &input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(candidate.foundation, "1");
        assert_eq!(candidate.component, 1);
        assert_eq!(candidate.transport, "UDP");
        assert_eq!(candidate.priority, 2130706431);
        assert_eq!(candidate.port, 20000);
        assert_eq!(candidate.typ, "host");
        assert_eq!(candidate.to_string(), &*input);
    }

    #[test]
    fn srflx_candidate() {
        let input = BytesStr::from_static(
            "842515059 1 UDP 1694498815 198.51.100.33 31102 typ srflx raddr 10.0.0.17 rport 31102",
        );

        let (_, candidate) = IceCandidate::parse(input.as_ref(), &input).unwrap();

        assert_eq!(candidate.typ, "srflx");
        assert_eq!(
            candidate.rel_addr,
            Some(UntaggedAddress::IpAddress("10.0.0.17".parse().unwrap()))
        );
        assert_eq!(candidate.rel_port, Some(31102));
        assert_eq!(candidate.to_string(), &*input);
    }
}
