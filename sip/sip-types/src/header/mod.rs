//! Header map and typed header representations

use bytesstr::BytesStr;
use std::fmt;

pub mod name;
pub mod typed;

pub use name::Name;

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("missing header {0}")]
    Missing(Name),
    #[error("malformed header {0}")]
    Malformed(Name),
}

/// A typed representation of a header value
pub trait TypedHeader: Sized {
    const NAME: Name;

    fn decode(value: &BytesStr) -> Result<Self, HeaderError>;

    fn encode(&self) -> String;
}

/// Ordered multimap of raw header lines.
///
/// Values stay untyped until accessed through [`Headers::get`] /
/// [`Headers::get_all`].
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(Name, BytesStr)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a raw header line
    pub fn push(&mut self, name: Name, value: impl Into<BytesStr>) {
        self.entries.push((name, value.into()));
    }

    /// Append a typed header
    pub fn insert<H: TypedHeader>(&mut self, header: &H) {
        self.push(H::NAME, header.encode());
    }

    /// Append a typed header under a non-default name
    /// (e.g. Proxy-Authorization instead of Authorization)
    pub fn insert_named<H: TypedHeader>(&mut self, name: Name, header: &H) {
        self.push(name, header.encode());
    }

    /// Replace all occurrences of the header with a single new value
    pub fn replace<H: TypedHeader>(&mut self, header: &H) {
        self.remove(&H::NAME);
        self.insert(header);
    }

    pub fn remove(&mut self, name: &Name) {
        self.entries.retain(|(n, _)| n != name);
    }

    pub fn raw(&self, name: &Name) -> Option<&BytesStr> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn raw_all<'s>(&'s self, name: &'s Name) -> impl Iterator<Item = &'s BytesStr> + 's {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Decode the first occurrence of the typed header
    pub fn get<H: TypedHeader>(&self) -> Result<H, HeaderError> {
        let value = self.raw(&H::NAME).ok_or(HeaderError::Missing(H::NAME))?;
        H::decode(value)
    }

    /// Decode the first occurrence, `None` when absent
    pub fn try_get<H: TypedHeader>(&self) -> Result<Option<H>, HeaderError> {
        match self.raw(&H::NAME) {
            Some(value) => H::decode(value).map(Some),
            None => Ok(None),
        }
    }

    /// Decode every occurrence of the header under `name`, skipping
    /// malformed ones
    pub fn get_all_named<H: TypedHeader>(&self, name: &Name) -> Vec<H> {
        self.raw_all(name)
            .filter_map(|value| H::decode(value).ok())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &BytesStr)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::typed::CSeq;
    use super::*;
    use crate::Method;

    #[test]
    fn typed_round_trip() {
        let mut headers = Headers::new();

        headers.insert(&CSeq {
            cseq: 1,
            method: Method::INVITE,
        });

        let cseq: CSeq = headers.get().unwrap();
        assert_eq!(cseq.cseq, 1);
        assert_eq!(cseq.method, Method::INVITE);
    }

    #[test]
    fn missing_header() {
        let headers = Headers::new();

        assert!(matches!(
            headers.get::<CSeq>(),
            Err(HeaderError::Missing(Name::CSeq))
        ));
        assert!(headers.try_get::<CSeq>().unwrap().is_none());
    }
}
