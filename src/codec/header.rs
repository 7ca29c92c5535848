// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::BytesMut;
use tokio::io::AsyncRead;

use crate::codec::{
    cursor::ByteCursor,
    error::CodecError,
    identifier::{Identifier, TagClass},
    length::{INDEFINITE, LengthOctets},
    node::{NodeType, tag},
};

/// Identifier plus length octets of one TLV, with the derived byte counts.
///
/// Invariants held by the setters: `is_definite` iff `payload_length >= 0`,
/// and flipping a header to indefinite forces `payload_length` back to `-1`.
/// `header_length` is the on-wire size of identifier + length octets; a Root
/// header has no wire form and a `header_length` of 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub identifier: Identifier,
    pub node_type: NodeType,
    payload_length: i32,
    pub header_length: i32,
    is_definite: bool,
}

impl Default for Header {
    fn default() -> Self {
        Header::root()
    }
}

impl Header {
    pub fn from_identifier(identifier: Identifier) -> Self {
        let mut header = Self {
            identifier,
            node_type: NodeType::from_identifier(&identifier),
            payload_length: 0,
            header_length: 0,
            is_definite: true,
        };
        header.recalc_header_length();
        header
    }

    /// Header of a Root node: never serialized, sizes only.
    pub fn root() -> Self {
        Self {
            identifier: Identifier::new(TagClass::Universal, true, u32::from(tag::SEQUENCE)),
            node_type: NodeType::Root,
            payload_length: 0,
            header_length: 0,
            is_definite: true,
        }
    }

    #[inline]
    pub fn payload_length(&self) -> i32 {
        self.payload_length
    }

    #[inline]
    pub fn is_definite(&self) -> bool {
        self.is_definite
    }

    pub fn set_payload_length(&mut self, length: i32) {
        if length < 0 {
            self.set_indefinite();
        } else {
            self.payload_length = length;
            self.is_definite = true;
            self.recalc_header_length();
        }
    }

    pub fn set_indefinite(&mut self) {
        self.is_definite = false;
        self.payload_length = INDEFINITE;
        self.recalc_header_length();
    }

    /// Overwrite the payload length without touching the definite flag.
    /// The sizing pass uses this to give indefinite nodes a transient real
    /// octet count while their parents are measured.
    pub(crate) fn force_payload_length(&mut self, length: i32) {
        self.payload_length = length;
    }

    pub(crate) fn recalc_header_length(&mut self) {
        if matches!(self.node_type, NodeType::Root) {
            self.header_length = 0;
            return;
        }
        let length_value = if self.is_definite { self.payload_length } else { INDEFINITE };
        self.header_length =
            (self.identifier.length() + LengthOctets::octet_count(length_value)) as i32;
    }

    /// Header plus payload size, or `-1` for the indefinite form whose total
    /// is unknown until the terminator shows up.
    pub fn message_length(&self) -> i32 {
        if self.is_definite {
            self.header_length + self.payload_length
        } else {
            INDEFINITE
        }
    }

    fn assemble(identifier: Identifier, length: LengthOctets) -> Self {
        Self {
            identifier,
            node_type: NodeType::from_identifier(&identifier),
            payload_length: length.value,
            header_length: (identifier.length() + length.read_length) as i32,
            is_definite: length.is_definite(),
        }
    }

    pub fn read_buf(cur: &mut ByteCursor<'_>) -> Result<Self, CodecError> {
        let identifier = Identifier::read_buf(cur)?;
        let length = LengthOctets::read_buf(cur)?;
        Ok(Self::assemble(identifier, length))
    }

    /// Stream-mode read: `Ok(None)` on a clean EOF before the first
    /// identifier octet, `TruncatedHeader` for anything torn after it.
    pub async fn read_stream<R>(reader: &mut R) -> Result<Option<Self>, CodecError>
    where R: AsyncRead + Unpin {
        let Some(identifier) = Identifier::read_stream(reader).await? else {
            return Ok(None);
        };
        let length = LengthOctets::read_stream(reader).await?;
        Ok(Some(Self::assemble(identifier, length)))
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        self.identifier.encode_into(buf);
        let length_value = if self.is_definite { self.payload_length } else { INDEFINITE };
        LengthOctets::encode_into(length_value, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definite_header_round_trips() {
        let id = Identifier::new(TagClass::Universal, true, u32::from(tag::SEQUENCE));
        let mut header = Header::from_identifier(id);
        header.set_payload_length(300);
        assert_eq!(header.header_length, 4); // 1 identifier + 3 length octets
        assert_eq!(header.message_length(), 304);

        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);
        let mut cur = ByteCursor::new(&buf);
        let back = Header::read_buf(&mut cur).expect("read back");
        assert_eq!(back, header);
    }

    #[test]
    fn indefinite_forces_negative_payload_length() {
        let id = Identifier::new(TagClass::Universal, true, u32::from(tag::SEQUENCE));
        let mut header = Header::from_identifier(id);
        header.set_payload_length(40);
        header.set_indefinite();
        assert_eq!(header.payload_length(), INDEFINITE);
        assert_eq!(header.message_length(), INDEFINITE);
        assert_eq!(header.header_length, 2);
    }
}
