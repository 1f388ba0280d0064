use bytesstr::BytesStr;
use std::fmt;

/// Name of a SIP header.
///
/// Well known names parse from their long and compact forms and print in
/// their canonical capitalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    MaxForwards,
    Expires,
    MinExpires,
    ContentType,
    ContentLength,
    Allow,
    Supported,
    UserAgent,
    WwwAuthenticate,
    Authorization,
    ProxyAuthenticate,
    ProxyAuthorization,
    Route,
    RecordRoute,
    Other(BytesStr),
}

impl Name {
    pub fn parse(i: &str) -> Name {
        match () {
            _ if i.eq_ignore_ascii_case("Via") || i.eq_ignore_ascii_case("v") => Name::Via,
            _ if i.eq_ignore_ascii_case("From") || i.eq_ignore_ascii_case("f") => Name::From,
            _ if i.eq_ignore_ascii_case("To") || i.eq_ignore_ascii_case("t") => Name::To,
            _ if i.eq_ignore_ascii_case("Call-ID") || i.eq_ignore_ascii_case("i") => Name::CallId,
            _ if i.eq_ignore_ascii_case("CSeq") => Name::CSeq,
            _ if i.eq_ignore_ascii_case("Contact") || i.eq_ignore_ascii_case("m") => Name::Contact,
            _ if i.eq_ignore_ascii_case("Max-Forwards") => Name::MaxForwards,
            _ if i.eq_ignore_ascii_case("Expires") => Name::Expires,
            _ if i.eq_ignore_ascii_case("Min-Expires") => Name::MinExpires,
            _ if i.eq_ignore_ascii_case("Content-Type") || i.eq_ignore_ascii_case("c") => {
                Name::ContentType
            }
            _ if i.eq_ignore_ascii_case("Content-Length") || i.eq_ignore_ascii_case("l") => {
                Name::ContentLength
            }
            _ if i.eq_ignore_ascii_case("Allow") => Name::Allow,
            _ if i.eq_ignore_ascii_case("Supported") || i.eq_ignore_ascii_case("k") => {
                Name::Supported
            }
            _ if i.eq_ignore_ascii_case("User-Agent") => Name::UserAgent,
            _ if i.eq_ignore_ascii_case("WWW-Authenticate") => Name::WwwAuthenticate,
            _ if i.eq_ignore_ascii_case("Authorization") => Name::Authorization,
            _ if i.eq_ignore_ascii_case("Proxy-Authenticate") => Name::ProxyAuthenticate,
            _ if i.eq_ignore_ascii_case("Proxy-Authorization") => Name::ProxyAuthorization,
            _ if i.eq_ignore_ascii_case("Route") => Name::Route,
            _ if i.eq_ignore_ascii_case("Record-Route") => Name::RecordRoute,
            _ => Name::Other(BytesStr::from(i)),
        }
    }

    pub fn as_print_str(&self) -> &str {
        match self {
            Name::Via => "Via",
            Name::From => "From",
            Name::To => "To",
            Name::CallId => "Call-ID",
            Name::CSeq => "CSeq",
            Name::Contact => "Contact",
            Name::MaxForwards => "Max-Forwards",
            Name::Expires => "Expires",
            Name::MinExpires => "Min-Expires",
            Name::ContentType => "Content-Type",
            Name::ContentLength => "Content-Length",
            Name::Allow => "Allow",
            Name::Supported => "Supported",
            Name::UserAgent => "User-Agent",
            Name::WwwAuthenticate => "WWW-Authenticate",
            Name::Authorization => "Authorization",
            Name::ProxyAuthenticate => "Proxy-Authenticate",
            Name::ProxyAuthorization => "Proxy-Authorization",
            Name::Route => "Route",
            Name::RecordRoute => "Record-Route",
            Name::Other(other) => other,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_print_str())
    }
}

#[cfg(test)]
mod test {
    use super::Name;

    #[test]
    fn long_and_compact_forms() {
        assert_eq!(Name::parse("via"), Name::Via);
        assert_eq!(Name::parse("v"), Name::Via);
        assert_eq!(Name::parse("CALL-ID"), Name::CallId);
        assert_eq!(Name::parse("i"), Name::CallId);
        assert_eq!(Name::parse("X-Custom"), Name::Other("X-Custom".into()));
    }
}
