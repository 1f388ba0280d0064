use crate::header::{HeaderError, Name, TypedHeader};
use crate::method::Method;
use bytesstr::BytesStr;

macro_rules! uint_header {
    ($(#[$doc:meta])* $ident:ident, $name:expr, $int:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $ident(pub $int);

        impl TypedHeader for $ident {
            const NAME: Name = $name;

            fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
                value
                    .trim()
                    .parse()
                    .map(Self)
                    .map_err(|_| HeaderError::Malformed($name))
            }

            fn encode(&self) -> String {
                self.0.to_string()
            }
        }
    };
}

macro_rules! str_header {
    ($(#[$doc:meta])* $ident:ident, $name:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $ident(pub BytesStr);

        impl TypedHeader for $ident {
            const NAME: Name = $name;

            fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
                Ok(Self(BytesStr::from(value.trim())))
            }

            fn encode(&self) -> String {
                self.0.to_string()
            }
        }
    };
}

uint_header!(
    /// `Max-Forwards` header
    MaxForwards,
    Name::MaxForwards,
    u32
);

uint_header!(
    /// `Expires` header, binding or dialog lifetime in seconds
    Expires,
    Name::Expires,
    u32
);

uint_header!(
    /// `Content-Length` header
    ContentLength,
    Name::ContentLength,
    usize
);

str_header!(
    /// `Call-ID` header
    CallId,
    Name::CallId
);

str_header!(
    /// `Content-Type` header
    ContentType,
    Name::ContentType
);

str_header!(
    /// `User-Agent` header
    UserAgent,
    Name::UserAgent
);

impl CallId {
    pub fn new(id: impl Into<BytesStr>) -> Self {
        Self(id.into())
    }
}

/// `Allow` header, the comma separated list of supported methods
#[derive(Debug, Clone)]
pub struct Allow(pub Vec<Method>);

impl TypedHeader for Allow {
    const NAME: Name = Name::Allow;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError> {
        Ok(Self(
            value
                .split(',')
                .map(|m| Method::from(m.trim()))
                .collect(),
        ))
    }

    fn encode(&self) -> String {
        self.0
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allow_list() {
        let allow = Allow::decode(&BytesStr::from_static("INVITE, ACK,CANCEL, BYE")).unwrap();

        assert_eq!(allow.0.len(), 4);
        assert_eq!(allow.0[0], Method::INVITE);
        assert_eq!(allow.encode(), "INVITE, ACK, CANCEL, BYE");
    }

    #[test]
    fn content_length() {
        let length = ContentLength::decode(&BytesStr::from_static(" 349 ")).unwrap();
        assert_eq!(length.0, 349);
    }
}
