// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use bytes::Bytes;

use crate::codec::{
    error::CodecError,
    header::Header,
    identifier::{Identifier, TagClass},
};

/// Universal tag numbers of X.690 §8.
pub mod tag {
    pub const END_OF_CONTENT: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const INTEGER: u8 = 2;
    pub const OCTET_STRING: u8 = 4;
    pub const NULL: u8 = 5;
    pub const ENUMERATED: u8 = 10;
    pub const UTF8_STRING: u8 = 12;
    pub const SEQUENCE: u8 = 16;
    pub const SET: u8 = 17;
    pub const NUMERIC_STRING: u8 = 18;
    pub const PRINTABLE_STRING: u8 = 19;
    pub const TELETEX_STRING: u8 = 20;
    pub const VIDEOTEX_STRING: u8 = 21;
    pub const IA5_STRING: u8 = 22;
    pub const GRAPHIC_STRING: u8 = 25;
    pub const VISIBLE_STRING: u8 = 26;
    pub const GENERAL_STRING: u8 = 27;
    pub const BMP_STRING: u8 = 30;
}

/// Universal tags whose payload this library reads as text.
pub const TEXT_TAGS: [u8; 11] = [
    tag::OCTET_STRING,
    tag::UTF8_STRING,
    tag::NUMERIC_STRING,
    tag::PRINTABLE_STRING,
    tag::TELETEX_STRING,
    tag::VIDEOTEX_STRING,
    tag::IA5_STRING,
    tag::GRAPHIC_STRING,
    tag::VISIBLE_STRING,
    tag::GENERAL_STRING,
    tag::BMP_STRING,
];

/// Node classification: the tag class plus the tag number, with Root as the
/// off-wire container that serializes to nothing but its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Root,
    Universal(u8),
    Application(u32),
    ContextSpecific(u32),
    Private(u32),
}

impl NodeType {
    pub fn from_identifier(identifier: &Identifier) -> Self {
        match identifier.class {
            TagClass::Universal => NodeType::Universal(identifier.tag_number as u8),
            TagClass::Application => NodeType::Application(identifier.tag_number),
            TagClass::ContextSpecific => NodeType::ContextSpecific(identifier.tag_number),
            TagClass::Private => NodeType::Private(identifier.tag_number),
        }
    }

    pub fn tag_number(&self) -> u32 {
        match *self {
            NodeType::Root => 0,
            NodeType::Universal(t) => u32::from(t),
            NodeType::Application(t)
            | NodeType::ContextSpecific(t)
            | NodeType::Private(t) => t,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeType::Universal(t) if TEXT_TAGS.contains(t))
    }
}

/// One node of a BER tree.
///
/// Primitives carry a `payload`; constructed nodes carry `children` and no
/// payload. `bytes_read` is how many wire octets this node consumed when it
/// was decoded (header included, indefinite terminators included) so a
/// parent reader can advance past it; it does not participate in equality.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub header: Header,
    payload: Option<Bytes>,
    children: Vec<Node>,
    pub bytes_read: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.payload == other.payload
            && self.children == other.children
    }
}

impl Node {
    pub fn with_header(header: Header) -> Self {
        Self {
            header,
            payload: None,
            children: Vec::new(),
            bytes_read: 0,
        }
    }

    fn universal(tag_number: u8, constructed: bool) -> Self {
        let identifier =
            Identifier::new(TagClass::Universal, constructed, u32::from(tag_number));
        Self::with_header(Header::from_identifier(identifier))
    }

    /// Container that serializes as the bare concatenation of its children.
    pub fn root() -> Self {
        Self::with_header(Header::root())
    }

    pub fn sequence() -> Self {
        Self::universal(tag::SEQUENCE, true)
    }

    /// X.690 SET, kept order-preserving by this library.
    pub fn set() -> Self {
        Self::universal(tag::SET, true)
    }

    /// Constructed node of any class; `node_type` supplies class and tag.
    pub fn container(node_type: NodeType) -> Self {
        let identifier = match node_type {
            NodeType::Root => return Self::root(),
            NodeType::Universal(t) => {
                Identifier::new(TagClass::Universal, true, u32::from(t))
            },
            NodeType::Application(t) => Identifier::new(TagClass::Application, true, t),
            NodeType::ContextSpecific(t) => {
                Identifier::new(TagClass::ContextSpecific, true, t)
            },
            NodeType::Private(t) => Identifier::new(TagClass::Private, true, t),
        };
        Self::with_header(Header::from_identifier(identifier))
    }

    /// Primitive node of any class with a raw payload.
    pub fn primitive(node_type: NodeType, payload: Bytes) -> Self {
        let identifier = match node_type {
            NodeType::Root => Identifier::new(TagClass::Universal, false, 0),
            NodeType::Universal(t) => {
                Identifier::new(TagClass::Universal, false, u32::from(t))
            },
            NodeType::Application(t) => Identifier::new(TagClass::Application, false, t),
            NodeType::ContextSpecific(t) => {
                Identifier::new(TagClass::ContextSpecific, false, t)
            },
            NodeType::Private(t) => Identifier::new(TagClass::Private, false, t),
        };
        let mut node = Self::with_header(Header::from_identifier(identifier));
        node.set_payload(payload);
        node
    }

    pub fn null() -> Self {
        Self::universal(tag::NULL, false)
    }

    pub fn end_of_content() -> Self {
        Self::universal(tag::END_OF_CONTENT, false)
    }

    /// Boolean per X.690 §8.2: reads treat any nonzero octet as true,
    /// writes always emit `0xFF`.
    pub fn boolean(value: bool) -> Self {
        let mut node = Self::universal(tag::BOOLEAN, false);
        node.set_payload(Bytes::from_static(if value { &[0xFF] } else { &[0x00] }));
        node
    }

    pub fn integer(value: i64) -> Self {
        let mut node = Self::universal(tag::INTEGER, false);
        node.set_payload(encode_integer(value));
        node
    }

    /// Same octets as Integer, logically 32-bit.
    pub fn enumerated(value: i32) -> Self {
        let mut node = Self::universal(tag::ENUMERATED, false);
        node.set_payload(encode_integer(i64::from(value)));
        node
    }

    /// UTF-8 text with the default Utf8String tag.
    pub fn text(value: &str) -> Self {
        Self::text_with_tag(value, tag::UTF8_STRING)
    }

    /// UTF-8 text under any of the string tags of [`TEXT_TAGS`].
    pub fn text_with_tag(value: &str, string_tag: u8) -> Self {
        let mut node = Self::universal(string_tag, false);
        if !value.is_empty() {
            node.set_payload(Bytes::copy_from_slice(value.as_bytes()));
        }
        node
    }

    /// The graceful-disconnect sentinel: a Sequence holding one empty
    /// Application-class container.
    pub fn end_session_marker() -> Self {
        let mut marker = Self::sequence();
        marker.push(Self::container(NodeType::Application(0)));
        marker
    }

    #[inline]
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn set_payload(&mut self, payload: Bytes) {
        self.header.set_payload_length(payload.len() as i32);
        self.payload = if payload.is_empty() { None } else { Some(payload) };
    }

    /// Payload assignment that leaves the header untouched. Readers use
    /// this: a node decoded from the wire keeps the octet counts it was
    /// actually read with, even when the peer used a non-minimal length
    /// form.
    pub(crate) fn set_payload_raw(&mut self, payload: Bytes) {
        self.payload = if payload.is_empty() { None } else { Some(payload) };
    }

    #[inline]
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    #[inline]
    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    pub fn push(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Builder-style child insertion.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Builder-style switch to the indefinite length form.
    pub fn into_indefinite(mut self) -> Self {
        self.header.set_indefinite();
        self
    }

    #[inline]
    pub fn is_constructed(&self) -> bool {
        self.header.identifier.constructed
    }

    /// Boolean view of the payload: any nonzero first octet reads as true.
    pub fn as_bool(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.first())
            .is_some_and(|b| *b != 0)
    }

    /// Signed view of the payload. Payloads wider than 64 bits are not
    /// representable and collapse to the `-1` sentinel; the raw payload
    /// stays untouched.
    pub fn as_i64(&self) -> i64 {
        match &self.payload {
            None => 0,
            Some(p) => decode_integer(p),
        }
    }

    /// UTF-8 view of the payload; an absent payload is the empty string.
    pub fn as_text(&self) -> Result<&str, CodecError> {
        match &self.payload {
            None => Ok(""),
            Some(p) => Ok(std::str::from_utf8(p)?),
        }
    }

    /// True for a Sequence carrying at least one childless Application-class
    /// node, the shape that signals a graceful disconnect.
    pub fn signals_end_session(&self) -> bool {
        if self.header.node_type != NodeType::Universal(tag::SEQUENCE) {
            return false;
        }
        self.children.iter().any(|c| {
            matches!(c.header.node_type, NodeType::Application(_)) && c.children.is_empty()
        })
    }

    /// Two-pass sizing over the subtree.
    ///
    /// Post-order: each node's `payload_length` becomes its own payload size
    /// plus each child's header + payload (+2 for an indefinite child's
    /// `00 00` terminator), and `header_length` is refreshed against the new
    /// value. Indefinite nodes get a transient real count here so their
    /// parents can be measured. Pre-order afterwards: indefinite nodes go
    /// back to `-1`, since on-wire they carry no length.
    pub fn calculate_payload_length(&mut self) {
        self.size_subtree();
        self.clear_indefinite_lengths();
    }

    fn size_subtree(&mut self) {
        for child in &mut self.children {
            child.size_subtree();
        }
        let mut total: i64 = self.payload.as_ref().map_or(0, |p| p.len() as i64);
        for child in &self.children {
            let terminator = if child.header.is_definite() { 0 } else { 2 };
            total += i64::from(child.header.header_length)
                + i64::from(child.header.payload_length())
                + terminator;
        }
        self.header.force_payload_length(total as i32);
        self.header.recalc_header_length();
    }

    fn clear_indefinite_lengths(&mut self) {
        if !self.header.is_definite() {
            self.header.force_payload_length(super::length::INDEFINITE);
        }
        for child in &mut self.children {
            child.clear_indefinite_lengths();
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (level, node) in self.dfs_root_first() {
            for _ in 0..level {
                write!(f, "  ")?;
            }
            let form = if node.header.is_definite() { "" } else { " indefinite" };
            match node.header.node_type {
                NodeType::Root => writeln!(f, "Root{form}")?,
                NodeType::Universal(t) => match t {
                    tag::END_OF_CONTENT => writeln!(f, "EndOfContent")?,
                    tag::BOOLEAN => writeln!(f, "Boolean {}", node.as_bool())?,
                    tag::INTEGER => writeln!(f, "Integer {}", node.as_i64())?,
                    tag::NULL => writeln!(f, "Null")?,
                    tag::ENUMERATED => writeln!(f, "Enumerated {}", node.as_i64())?,
                    tag::SEQUENCE => writeln!(f, "Sequence{form}")?,
                    tag::SET => writeln!(f, "Set{form}")?,
                    t if node.header.node_type.is_text() => writeln!(
                        f,
                        "Text({t}) {:?}{form}",
                        node.as_text().unwrap_or("<non-utf8>")
                    )?,
                    t => writeln!(f, "Universal({t}){form}")?,
                },
                NodeType::Application(t) => writeln!(f, "Application({t}){form}")?,
                NodeType::ContextSpecific(t) => {
                    writeln!(f, "ContextSpecific({t}){form}")?
                },
                NodeType::Private(t) => writeln!(f, "Private({t}){form}")?,
            }
        }
        Ok(())
    }
}

/// Minimum-length two's-complement big-endian form of X.690 §8.3.2.
/// Zero encodes as a single `0x00` octet.
pub(crate) fn encode_integer(value: i64) -> Bytes {
    let be = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let lead = be[start];
        let next_high = be[start + 1] & 0x80 != 0;
        let redundant = (lead == 0x00 && !next_high) || (lead == 0xFF && next_high);
        if !redundant {
            break;
        }
        start += 1;
    }
    Bytes::copy_from_slice(&be[start..])
}

/// Big-endian two's-complement decode; wider than 64 bits collapses to the
/// `-1` sentinel.
pub(crate) fn decode_integer(payload: &[u8]) -> i64 {
    if payload.is_empty() {
        return 0;
    }
    if payload.len() * 8 > 64 {
        return -1;
    }
    let mut acc: i64 = if payload[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in payload {
        acc = (acc << 8) | i64::from(b);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_minimal_forms() {
        let cases: [(i64, &[u8]); 8] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x00, 0x80]),
            (256, &[0x01, 0x00]),
            (-1, &[0xFF]),
            (-128, &[0x80]),
            (-129, &[0xFF, 0x7F]),
            (i64::MIN, &[0x80, 0, 0, 0, 0, 0, 0, 0]),
        ];
        for (value, wire) in cases {
            assert_eq!(&encode_integer(value)[..], wire, "encoding of {value}");
            assert_eq!(decode_integer(wire), value, "decoding of {value}");
        }
    }

    #[test]
    fn oversized_integer_payload_reads_as_sentinel() {
        let wide = [0x01u8; 9];
        assert_eq!(decode_integer(&wide), -1);
    }

    #[test]
    fn end_session_marker_shape() {
        let marker = Node::end_session_marker();
        assert!(marker.signals_end_session());
        assert!(!Node::sequence().signals_end_session());

        let mut with_kids = Node::sequence();
        let app = Node::container(NodeType::Application(0)).with_child(Node::null());
        with_kids.push(app);
        assert!(!with_kids.signals_end_session());
    }
}
