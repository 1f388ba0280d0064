use crate::header::typed::ContentLength;
use crate::header::{Headers, Name};
use crate::method::Method;
use crate::status_code::StatusCode;
use crate::uri::SipUri;
use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt::Write;

#[derive(Debug, thiserror::Error)]
pub enum ParseMessageError {
    #[error("message head is not valid utf8")]
    InvalidUtf8,
    #[error("message is missing the head/body separator")]
    MissingSeparator,
    #[error("malformed {0} line")]
    MalformedLine(&'static str),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
}

/// First line of a request
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

/// First line of a response
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub code: StatusCode,
    pub reason: Option<BytesStr>,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub line: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            line: RequestLine { method, uri },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Serialize for the wire, appending a Content-Length when absent
    pub fn print(&self) -> Vec<u8> {
        let mut head = format!("{} {} SIP/2.0\r\n", self.line.method, self.line.uri);
        print_tail(&mut head, &self.headers, &self.body)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub line: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(code: StatusCode) -> Self {
        Self {
            line: StatusLine { code, reason: None },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn print(&self) -> Vec<u8> {
        let reason = self
            .line
            .reason
            .as_deref()
            .or_else(|| self.line.code.reason_phrase())
            .unwrap_or("Unknown");

        let mut head = format!("SIP/2.0 {} {}\r\n", self.line.code, reason);
        print_tail(&mut head, &self.headers, &self.body)
    }
}

fn print_tail(head: &mut String, headers: &Headers, body: &[u8]) -> Vec<u8> {
    let _ = write!(head, "{headers}");

    if headers.raw(&Name::ContentLength).is_none() {
        let _ = write!(head, "Content-Length: {}\r\n", body.len());
    }

    head.push_str("\r\n");

    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body);
    out
}

/// A parsed SIP message, either kind
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn parse(bytes: impl Into<Bytes>) -> Result<Message, ParseMessageError> {
        let bytes: Bytes = bytes.into();

        let separator = memchr::memmem::find(&bytes, b"\r\n\r\n")
            .ok_or(ParseMessageError::MissingSeparator)?;

        let head = std::str::from_utf8(&bytes[..separator])
            .map_err(|_| ParseMessageError::InvalidUtf8)?;

        let mut body = bytes.slice(separator + 4..);

        let mut lines = unfold_lines(head);

        let first_line = lines.next().ok_or(ParseMessageError::MalformedLine("first"))?;

        let mut headers = Headers::new();

        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseMessageError::MalformedHeader(line.to_string()))?;

            headers.push(Name::parse(name.trim()), value.trim().to_string());
        }

        // Truncate the body to the advertised length; datagrams may carry
        // padding
        if let Ok(Some(ContentLength(len))) = headers.try_get::<ContentLength>() {
            if len <= body.len() {
                body = body.slice(..len);
            }
        }

        if let Some(rest) = first_line.strip_prefix("SIP/2.0 ") {
            // response: SIP/2.0 <code> <reason>
            let mut parts = rest.splitn(2, ' ');

            let code = parts
                .next()
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or(ParseMessageError::MalformedLine("status"))?;

            let reason = parts
                .next()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(BytesStr::from);

            Ok(Message::Response(Response {
                line: StatusLine {
                    code: StatusCode::new(code),
                    reason,
                },
                headers,
                body,
            }))
        } else {
            // request: <method> <uri> SIP/2.0
            let mut parts = first_line.split_whitespace();

            let method = parts
                .next()
                .map(Method::from)
                .ok_or(ParseMessageError::MalformedLine("request"))?;

            let uri = parts
                .next()
                .and_then(SipUri::parse)
                .ok_or(ParseMessageError::MalformedLine("request"))?;

            if parts.next() != Some("SIP/2.0") {
                return Err(ParseMessageError::MalformedLine("request"));
            }

            Ok(Message::Request(Request {
                line: RequestLine { method, uri },
                headers,
                body,
            }))
        }
    }
}

/// Iterate over header lines, joining folded continuation lines
fn unfold_lines(head: &str) -> impl Iterator<Item = String> + '_ {
    let mut lines = head.split("\r\n").peekable();

    std::iter::from_fn(move || {
        let mut line = lines.next()?.to_string();

        while let Some(next) = lines.peek() {
            if next.starts_with(' ') || next.starts_with('\t') {
                line.push(' ');
                line.push_str(lines.next().unwrap_or_default().trim_start());
            } else {
                break;
            }
        }

        Some(line)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::{CSeq, CallId, FromTo, Via};

    const INVITE: &str = "INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP 192.0.2.101:5060;branch=z9hG4bK74bf9\r\n\
        Max-Forwards: 70\r\n\
        From: \"Alice\" <sip:alice@atlanta.example.com>;tag=9fxced76sl\r\n\
        To: <sip:bob@biloxi.example.com>\r\n\
        Call-ID: 3848276298220188511@atlanta.example.com\r\n\
        CSeq: 1 INVITE\r\n\
        Content-Length: 0\r\n\
        \r\n";

    #[test]
    fn parse_request() {
        let msg = Message::parse(Bytes::from_static(INVITE.as_bytes())).unwrap();

        let Message::Request(request) = msg else {
            panic!("expected a request");
        };

        assert_eq!(request.line.method, Method::INVITE);
        assert_eq!(request.line.uri.user.as_deref(), Some("bob"));

        let via: Via = request.headers.get().unwrap();
        assert_eq!(via.branch().unwrap(), "z9hG4bK74bf9");

        let from: FromTo = request.headers.get().unwrap();
        assert_eq!(from.tag.as_deref(), Some("9fxced76sl"));

        let cseq: CSeq = request.headers.get().unwrap();
        assert_eq!(cseq.cseq, 1);

        assert!(request.body.is_empty());
    }

    #[test]
    fn parse_response_with_body() {
        let raw = "SIP/2.0 200 OK\r\n\
            Call-ID: abc\r\n\
            Content-Type: application/sdp\r\n\
            Content-Length: 4\r\n\
            \r\nv=0\n";

        let msg = Message::parse(Bytes::from_static(raw.as_bytes())).unwrap();

        let Message::Response(response) = msg else {
            panic!("expected a response");
        };

        assert_eq!(response.line.code, StatusCode::OK);
        assert_eq!(response.line.reason.as_deref(), Some("OK"));
        assert_eq!(&response.body[..], b"v=0\n");

        let call_id: CallId = response.headers.get().unwrap();
        assert_eq!(call_id.0, "abc");
    }

    #[test]
    fn folded_headers() {
        let raw = "SIP/2.0 180 Ringing\r\n\
            Call-ID: abc\r\n\
            Subject: I know you're there,\r\n \
            pick up the phone\r\n\
            \r\n";

        let msg = Message::parse(Bytes::from_static(raw.as_bytes())).unwrap();

        let Message::Response(response) = msg else {
            panic!("expected a response");
        };

        let subject = response
            .headers
            .raw(&Name::Other("Subject".into()))
            .unwrap();

        assert_eq!(subject, "I know you're there, pick up the phone");
    }

    #[test]
    fn print_appends_content_length() {
        let request = Request::new(Method::OPTIONS, "sip:example.org".parse().unwrap());
        let printed = request.print();
        let text = std::str::from_utf8(&printed).unwrap();

        assert!(text.starts_with("OPTIONS sip:example.org SIP/2.0\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn print_parse_round_trip() {
        let mut request = Request::new(Method::REGISTER, "sip:registrar.example.org".parse().unwrap());
        request.headers.push(Name::CallId, "xyz");
        request.headers.insert(&CSeq {
            cseq: 2,
            method: Method::REGISTER,
        });

        let printed = request.print();
        let reparsed = Message::parse(printed).unwrap();

        let Message::Request(reparsed) = reparsed else {
            panic!("expected a request");
        };

        assert_eq!(reparsed.line.method, Method::REGISTER);
        assert_eq!(reparsed.headers.get::<CSeq>().unwrap().cseq, 2);
        assert_eq!(reparsed.headers.get::<CallId>().unwrap().0, "xyz");
    }
}
