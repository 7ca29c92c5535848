// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{
    ByteCursor, CodecError, Header, Node, NodeType,
    node::tag,
};

/// One framed X.690 message crossing a session.
///
/// A complete message carries its fully decoded node. An incomplete one is
/// the carry-forward state of a payload the socket has only partially
/// delivered: the parsed header, the octets banked so far, and how many are
/// still missing. The session keeps feeding it via
/// [`IncompleteMessage::continue_read`] until it turns complete.
#[derive(Debug, Clone)]
pub enum Message {
    Complete(Node),
    Incomplete(IncompleteMessage),
}

#[derive(Debug, Clone)]
pub struct IncompleteMessage {
    pub header: Header,
    completion: BytesMut,
    bytes_still_needed: usize,
}

impl Message {
    pub fn complete(node: Node) -> Self {
        Message::Complete(node)
    }

    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Message::Incomplete(_))
    }

    pub fn node(&self) -> Option<&Node> {
        match self {
            Message::Complete(node) => Some(node),
            Message::Incomplete(_) => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            Message::Complete(node) => Some(node),
            Message::Incomplete(_) => None,
        }
    }

    /// Session-level request id: a Sequence payload whose first child is an
    /// Integer yields that integer, anything else is `-1`.
    pub fn id(&self) -> i64 {
        let Some(node) = self.node() else { return -1 };
        if node.header.node_type != NodeType::Universal(tag::SEQUENCE) {
            return -1;
        }
        match node.children().first() {
            Some(first)
                if first.header.node_type == NodeType::Universal(tag::INTEGER) =>
            {
                first.as_i64()
            },
            _ => -1,
        }
    }

    /// True when the payload is the graceful-disconnect sentinel.
    pub fn is_end_session(&self) -> bool {
        self.node().is_some_and(Node::signals_end_session)
    }

    /// Read one message off the stream, tolerating a short payload read.
    ///
    /// `None` means the peer closed cleanly at a message boundary. The
    /// reusable `buffer` bounds how much is requested per read; a payload
    /// bigger than one read's worth comes back as `Incomplete`. Indefinite
    /// top-level frames carry no byte count to carry forward, so they are
    /// decoded straight off the stream in one piece.
    pub async fn read_buffered<R>(
        stream: &mut R,
        buffer: &mut BytesMut,
        max_payload: usize,
    ) -> Result<Option<Message>, CodecError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let Some(header) = Header::read_stream(stream).await? else {
            return Ok(None);
        };

        if !header.is_definite() {
            let node = Node::read_body_stream(stream, header, max_payload).await?;
            return Ok(Some(Message::Complete(node)));
        }

        let want = header.payload_length() as usize;
        if want > max_payload {
            return Err(CodecError::PayloadTooLarge {
                length: want,
                max: max_payload,
            });
        }
        if want == 0 {
            let mut cur = ByteCursor::new(&[]);
            let node = Node::read_content_buf(header, &mut cur, max_payload)?;
            return Ok(Some(Message::Complete(node)));
        }

        let len = want.min(buffer.len());
        let got = stream.read(&mut buffer[..len]).await?;
        if got == 0 {
            return Err(CodecError::UnexpectedEndOfContent);
        }
        if got >= want {
            let mut cur = ByteCursor::new(&buffer[..want]);
            let node = Node::read_content_buf(header, &mut cur, max_payload)?;
            return Ok(Some(Message::Complete(node)));
        }

        Ok(Some(Message::Incomplete(IncompleteMessage {
            header,
            completion: BytesMut::from(&buffer[..got]),
            bytes_still_needed: want - got,
        })))
    }
}

impl IncompleteMessage {
    #[inline]
    pub fn bytes_still_needed(&self) -> usize {
        self.bytes_still_needed
    }

    /// Pull the next chunk of the pending payload. Either finishes the
    /// message (decode and return `Complete`) or banks the chunk and stays
    /// incomplete.
    pub async fn continue_read<R>(
        mut self,
        stream: &mut R,
        buffer: &mut BytesMut,
        max_payload: usize,
    ) -> Result<Message, CodecError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let len = self.bytes_still_needed.min(buffer.len());
        let got = stream.read(&mut buffer[..len]).await?;
        if got == 0 {
            return Err(CodecError::UnexpectedEndOfContent);
        }
        self.completion.extend_from_slice(&buffer[..got]);
        self.bytes_still_needed -= got;

        if self.bytes_still_needed > 0 {
            return Ok(Message::Incomplete(self));
        }

        let mut cur = ByteCursor::new(&self.completion);
        let node = Node::read_content_buf(self.header, &mut cur, max_payload)?;
        Ok(Message::Complete(node))
    }
}
