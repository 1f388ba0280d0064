use bytesstr::BytesStr;
use std::fmt;
use std::str::FromStr;

/// A SIP request method.
///
/// Well known methods are provided as constants, anything else is carried
/// verbatim.
///
/// ```
/// use sipkit_sip_types::Method;
///
/// let invite = Method::INVITE;
/// let custom = Method::from("HELLO");
///
/// assert_ne!(invite, custom);
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Method(Repr);

macro_rules! methods {
    ($($print:literal, $ident:ident;)+) => {
        #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        enum Repr {
            $($ident,)+
            Other(BytesStr),
        }

        impl Method {
            $(pub const $ident: Self = Self(Repr::$ident);)+

            fn from_str_impl(s: &str) -> Self {
                $(
                    if s.eq_ignore_ascii_case($print) {
                        return Self(Repr::$ident);
                    }
                )+

                Self(Repr::Other(BytesStr::from(s)))
            }
        }

        impl fmt::Display for Method {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.0 {
                    $(Repr::$ident => f.write_str($print),)+
                    Repr::Other(other) => f.write_str(other),
                }
            }
        }
    };
}

methods! {
    "INVITE",    INVITE;
    "ACK",       ACK;
    "CANCEL",    CANCEL;
    "BYE",       BYE;
    "REGISTER",  REGISTER;
    "OPTIONS",   OPTIONS;
    "INFO",      INFO;
    "MESSAGE",   MESSAGE;
    "UPDATE",    UPDATE;
    "NOTIFY",    NOTIFY;
    "SUBSCRIBE", SUBSCRIBE;
    "REFER",     REFER;
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        Self::from_str_impl(s)
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_str_impl(s))
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn known_method() {
        assert_eq!(Method::from("invite"), Method::INVITE);
        assert_eq!(Method::INVITE.to_string(), "INVITE");
    }

    #[test]
    fn extension_method() {
        let method = Method::from("PUBLISH");

        assert_ne!(method, Method::INVITE);
        assert_eq!(method.to_string(), "PUBLISH");
    }
}
