use bytes::Bytes;
use bytesstr::BytesStr;

/// ICE username fragment (`a=ice-ufrag`)
///
/// [RFC8839](https://www.rfc-editor.org/rfc/rfc8839.html#section-5.4)
#[derive(Debug, Clone)]
pub struct IceUsernameFragment {
    pub ufrag: BytesStr,
}

impl IceUsernameFragment {
    pub fn parse(src: &Bytes, line: &str) -> Self {
        Self {
            ufrag: BytesStr::from_parse(src, line.trim()),
        }
    }
}

/// ICE password (`a=ice-pwd`)
///
/// [RFC8839](https://www.rfc-editor.org/rfc/rfc8839.html#section-5.4)
#[derive(Debug, Clone)]
pub struct IcePassword {
    pub pwd: BytesStr,
}

impl IcePassword {
    pub fn parse(src: &Bytes, line: &str) -> Self {
        Self {
            pwd: BytesStr::from_parse(src, line.trim()),
        }
    }
}
