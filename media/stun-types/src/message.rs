use crate::attr::Attr;
use crate::header::{message_typ, Class, MessageHead, Method, HEADER_LEN};
use crate::{padding, Error, TransactionId, MAGIC_COOKIE, NE};
use byteorder::ReadBytesExt;
use bytes::{Buf, BufMut};
use std::io::{Cursor, Read};

/// Serializer for an outgoing STUN message.
///
/// Attributes are appended in order, [`MessageBuilder::finish`] patches the
/// final message length into the header.
pub struct MessageBuilder {
    head: MessageHead,
    transaction_id: TransactionId,
    buffer: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(class: Class, method: Method, transaction_id: TransactionId) -> Self {
        let mut head = MessageHead(0);
        head.set_typ(message_typ(class, method));

        let mut buffer = Vec::with_capacity(128);
        buffer.put_u32(head.0);
        buffer.put_u32(MAGIC_COOKIE);
        buffer.put_slice(&transaction_id.0);

        Self {
            head,
            transaction_id,
            buffer,
        }
    }

    /// Append an attribute which requires no context to encode
    pub fn attr<'a, A>(&mut self, attr: A)
    where
        A: Attr<'a, Context = ()>,
    {
        self.attr_with(attr, ())
    }

    /// Append an attribute with its encoding context (e.g. an integrity key)
    pub fn attr_with<'a, A>(&mut self, attr: A, ctx: A::Context)
    where
        A: Attr<'a>,
    {
        let value_len = attr.encode_len().expect("attribute length must be known");

        self.buffer.put_u16(A::TYPE);
        self.buffer.put_u16(value_len);

        attr.encode(ctx, self);

        for _ in 0..padding(usize::from(value_len)) {
            self.buffer.put_u8(0);
        }
    }

    /// Overwrite the message length field in the already serialized header
    pub fn set_len(&mut self, len: u16) {
        self.head.set_len(len);
        self.buffer[..4].copy_from_slice(&self.head.0.to_be_bytes());
    }

    /// Cookie + transaction id as one 128 bit value, used as XOR key
    pub fn xor_id(&self) -> u128 {
        let mut id = [0u8; 16];
        id[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        id[4..].copy_from_slice(&self.transaction_id.0);
        u128::from_be_bytes(id)
    }

    pub fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn finish(mut self) -> Vec<u8> {
        let len = u16::try_from(self.buffer.len() - HEADER_LEN)
            .expect("stun message exceeds u16 length");
        self.set_len(len);
        self.buffer
    }
}

/// Byte range of a single attribute inside a parsed message
#[derive(Debug, Clone, Copy)]
pub struct RawAttr {
    pub typ: u16,
    /// Where the attribute value starts
    pub begin: usize,
    /// Where the attribute value ends
    pub end: usize,
    /// End of the value including padding
    pub padded_end: usize,
}

impl RawAttr {
    pub fn value<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.begin..self.end]
    }
}

/// A parsed STUN message. Attribute values are decoded lazily via
/// [`Message::attr`] / [`Message::attr_with`].
pub struct Message {
    buffer: Vec<u8>,
    head: MessageHead,
    class: Class,
    method: Method,
    transaction_id: TransactionId,
    attrs: Vec<RawAttr>,
}

impl Message {
    pub fn parse(buffer: impl Into<Vec<u8>>) -> Result<Message, Error> {
        let buffer: Vec<u8> = buffer.into();
        let mut cursor = Cursor::new(buffer);

        let head = MessageHead(cursor.read_u32::<NE>()?);

        if head.zeroes() != 0 {
            return Err(Error::InvalidData("not a stun message"));
        }

        let cookie = cursor.read_u32::<NE>()?;
        if cookie != MAGIC_COOKIE {
            return Err(Error::InvalidData("missing magic cookie"));
        }

        let mut transaction_id = [0u8; 12];
        cursor.read_exact(&mut transaction_id)?;

        let class = Class::from_typ(head.typ());
        let method = Method::from_typ(head.typ())?;

        let mut attrs = vec![];

        while cursor.has_remaining() {
            let typ = cursor.read_u16::<NE>()?;
            let len = usize::from(cursor.read_u16::<NE>()?);

            let begin = usize::try_from(cursor.position())?;
            let end = begin + len;
            let padded_end = end + padding(len);

            if padded_end > cursor.get_ref().len() {
                return Err(Error::InvalidData("attribute length out of bounds"));
            }

            attrs.push(RawAttr {
                typ,
                begin,
                end,
                padded_end,
            });

            cursor.set_position(u64::try_from(padded_end)?);
        }

        Ok(Message {
            buffer: cursor.into_inner(),
            head,
            class,
            method,
            transaction_id: TransactionId(transaction_id),
            attrs,
        })
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn xor_id(&self) -> u128 {
        let mut id = [0u8; 16];
        id[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        id[4..].copy_from_slice(&self.transaction_id.0);
        u128::from_be_bytes(id)
    }

    /// Decode an attribute which requires no context
    pub fn attr<'a, A>(&'a mut self) -> Option<Result<A, Error>>
    where
        A: Attr<'a, Context = ()> + 'a,
    {
        self.attr_with(())
    }

    /// Decode an attribute with its context (e.g. an integrity key).
    ///
    /// Attributes trailing a MESSAGE-INTEGRITY attribute are ignored, except
    /// FINGERPRINT which is allowed to follow it.
    pub fn attr_with<'a, A>(&'a mut self, ctx: A::Context) -> Option<Result<A, Error>>
    where
        A: Attr<'a> + 'a,
    {
        use crate::attr::{Fingerprint, MessageIntegrity};

        let mut integrity_seen = false;

        for raw in self.attrs.clone() {
            if integrity_seen && raw.typ != Fingerprint::TYPE {
                return None;
            }

            if raw.typ == A::TYPE {
                return Some(A::decode(ctx, self, raw));
            }

            if raw.typ == MessageIntegrity::TYPE {
                integrity_seen = true;
            }
        }

        None
    }

    fn set_msg_len(&mut self, len: u16) {
        self.head.set_len(len);
        self.buffer[..4].copy_from_slice(&self.head.0.to_be_bytes());
    }

    /// Run `f` with the header length field temporarily set to `len`.
    ///
    /// Integrity and fingerprint checks hash the message with the length
    /// pointing just past their own attribute.
    pub fn with_msg_len<F, R>(&mut self, len: u16, f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        let prev = self.head.len();
        self.set_msg_len(len);
        let result = f(self);
        self.set_msg_len(prev);
        result
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}
