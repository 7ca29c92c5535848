// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{
    error::CodecError,
    node::{Node, NodeType},
};

const INDEFINITE_TERMINATOR: [u8; 2] = [0x00, 0x00];

impl Node {
    /// Serialize this subtree. Runs the sizing pass first, so calling it on
    /// an already-sized tree is idempotent. Root-type nodes contribute no
    /// header of their own and serialize as their children back to back.
    pub fn to_bytes(&mut self) -> Bytes {
        self.calculate_payload_length();
        let capacity = match self.header.message_length() {
            n if n > 0 => n as usize,
            _ => 256,
        };
        let mut buf = BytesMut::with_capacity(capacity);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        let is_root = matches!(self.header.node_type, NodeType::Root);
        if !is_root {
            self.header.encode_into(buf);
        }

        if self.is_constructed() || is_root {
            for child in self.children() {
                child.encode_into(buf);
            }
        } else if let Some(payload) = self.payload() {
            buf.put_slice(payload);
        }

        if !is_root && !self.header.is_definite() {
            buf.put_slice(&INDEFINITE_TERMINATOR);
        }
    }

    /// Serialize and push the octets down a stream in one write.
    pub async fn write_stream<W>(&mut self, writer: &mut W) -> Result<(), CodecError>
    where W: AsyncWrite + Unpin {
        let octets = self.to_bytes();
        writer.write_all(&octets).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_leaf_encodings() {
        assert_eq!(&Node::end_of_content().to_bytes()[..], &[0x00, 0x00]);
        assert_eq!(&Node::null().to_bytes()[..], &[0x05, 0x00]);
        assert_eq!(&Node::boolean(true).to_bytes()[..], &[0x01, 0x01, 0xFF]);
        assert_eq!(&Node::boolean(false).to_bytes()[..], &[0x01, 0x01, 0x00]);
        assert_eq!(&Node::integer(0).to_bytes()[..], &[0x02, 0x01, 0x00]);
    }

    #[test]
    fn root_serializes_children_only() {
        let mut root = Node::root()
            .with_child(Node::boolean(true))
            .with_child(Node::null());
        assert_eq!(&root.to_bytes()[..], &[0x01, 0x01, 0xFF, 0x05, 0x00]);
    }

    #[test]
    fn indefinite_text_gets_terminated() {
        let mut node = Node::text("hi").into_indefinite();
        let wire = node.to_bytes();
        assert_eq!(&wire[..], &[0x0C, 0x80, b'h', b'i', 0x00, 0x00]);
    }
}
