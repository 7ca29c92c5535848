// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{future::Future, pin::Pin};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{
    MAX_PAYLOAD_SIZE_ALLOWED,
    cursor::ByteCursor,
    error::CodecError,
    header::Header,
    node::{Node, NodeType, tag},
};

/// Universal tags that are only ever primitive; seeing the constructed flag
/// on one of them is a malformed read.
fn leaf_only(node_type: NodeType) -> bool {
    matches!(
        node_type,
        NodeType::Universal(
            tag::END_OF_CONTENT
                | tag::BOOLEAN
                | tag::INTEGER
                | tag::NULL
                | tag::ENUMERATED
        )
    )
}

impl Node {
    /// Decode a single node from an in-memory buffer with the default
    /// payload cap.
    pub fn read_from_slice(buf: &[u8]) -> Result<Node, CodecError> {
        let mut cur = ByteCursor::new(buf);
        Self::read_buf(&mut cur, MAX_PAYLOAD_SIZE_ALLOWED)
    }

    /// Buffer-mode node read: header, then content dispatched on the
    /// header's class, tag and constructed flag.
    pub fn read_buf(
        cur: &mut ByteCursor<'_>,
        max_payload: usize,
    ) -> Result<Node, CodecError> {
        let header = Header::read_buf(cur)?;
        Self::read_content_buf(header, cur, max_payload)
    }

    /// Content read for an already-parsed header. The message framer uses
    /// this directly once it has buffered a complete payload.
    pub fn read_content_buf(
        header: Header,
        cur: &mut ByteCursor<'_>,
        max_payload: usize,
    ) -> Result<Node, CodecError> {
        let identifier = header.identifier;
        if identifier.constructed && leaf_only(header.node_type) {
            return Err(CodecError::InvalidConstructedRead);
        }

        let mut node = Node::with_header(header);
        let header_length = header.header_length as usize;

        if header.node_type == NodeType::Universal(tag::END_OF_CONTENT) {
            node.bytes_read = header_length;
            return Ok(node);
        }

        if identifier.constructed {
            let consumed = if header.is_definite() {
                read_children_definite(&mut node, cur, max_payload)?
            } else {
                read_children_indefinite(&mut node, cur, max_payload)?
            };
            node.bytes_read = header_length + consumed;
            return Ok(node);
        }

        // primitive
        if header.is_definite() {
            let want = header.payload_length() as usize;
            if want > max_payload {
                return Err(CodecError::PayloadTooLarge {
                    length: want,
                    max: max_payload,
                });
            }
            if want > 0 {
                node.set_payload_raw(Bytes::copy_from_slice(cur.take(want)?));
            }
            node.bytes_read = header_length + want;
        } else {
            let rest = cur.rest();
            let end = find_terminator(rest).ok_or(CodecError::UnexpectedEndOfContent)?;
            if end > max_payload {
                return Err(CodecError::PayloadTooLarge {
                    length: end,
                    max: max_payload,
                });
            }
            if end > 0 {
                node.set_payload_raw(Bytes::copy_from_slice(&rest[..end]));
            }
            cur.advance(end + 2);
            node.bytes_read = header_length + end + 2;
        }
        Ok(node)
    }

    /// Stream-mode node read. `Ok(None)` on a clean EOF before the first
    /// header octet; any later starvation is an error.
    pub async fn read_stream<R>(
        reader: &mut R,
        max_payload: usize,
    ) -> Result<Option<Node>, CodecError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let Some(header) = Header::read_stream(reader).await? else {
            return Ok(None);
        };
        Ok(Some(read_content_stream(reader, header, max_payload).await?))
    }

    /// Stream-mode content read for a header someone else already parsed.
    pub(crate) async fn read_body_stream<R>(
        reader: &mut R,
        header: Header,
        max_payload: usize,
    ) -> Result<Node, CodecError>
    where
        R: AsyncRead + Unpin + Send,
    {
        read_content_stream(reader, header, max_payload).await
    }
}

fn read_children_definite(
    node: &mut Node,
    cur: &mut ByteCursor<'_>,
    max_payload: usize,
) -> Result<usize, CodecError> {
    let want = node.header.payload_length() as usize;
    if cur.remaining() < want {
        return Err(CodecError::UnexpectedEndOfContent);
    }
    let mut consumed = 0usize;
    while consumed < want {
        let child = Node::read_buf(cur, max_payload)?;
        consumed += child.bytes_read;
        node.push(child);
    }
    if consumed > want {
        return Err(CodecError::UnexpectedEndOfContent);
    }
    Ok(consumed)
}

fn read_children_indefinite(
    node: &mut Node,
    cur: &mut ByteCursor<'_>,
    max_payload: usize,
) -> Result<usize, CodecError> {
    let mut consumed = 0usize;
    loop {
        if cur.is_empty() {
            return Err(CodecError::UnexpectedEndOfContent);
        }
        let child = Node::read_buf(cur, max_payload)?;
        consumed += child.bytes_read;
        if child.header.node_type == NodeType::Universal(tag::END_OF_CONTENT) {
            // the terminator is consumed but never kept as a child
            return Ok(consumed);
        }
        node.push(child);
    }
}

/// Offset of the first `00 00` pair, i.e. the indefinite primitive's
/// payload size.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == [0x00, 0x00])
}

fn read_content_stream<'a, R>(
    reader: &'a mut R,
    header: Header,
    max_payload: usize,
) -> Pin<Box<dyn Future<Output = Result<Node, CodecError>> + Send + 'a>>
where
    R: AsyncRead + Unpin + Send,
{
    Box::pin(async move {
        let identifier = header.identifier;
        if identifier.constructed && leaf_only(header.node_type) {
            return Err(CodecError::InvalidConstructedRead);
        }

        let mut node = Node::with_header(header);
        let header_length = header.header_length as usize;

        if header.node_type == NodeType::Universal(tag::END_OF_CONTENT) {
            node.bytes_read = header_length;
            return Ok(node);
        }

        if identifier.constructed {
            let mut consumed = 0usize;
            if header.is_definite() {
                let want = header.payload_length() as usize;
                while consumed < want {
                    let child = next_child(reader, max_payload).await?;
                    consumed += child.bytes_read;
                    node.push(child);
                }
                if consumed > want {
                    return Err(CodecError::UnexpectedEndOfContent);
                }
            } else {
                loop {
                    let child = next_child(reader, max_payload).await?;
                    consumed += child.bytes_read;
                    if child.header.node_type
                        == NodeType::Universal(tag::END_OF_CONTENT)
                    {
                        break;
                    }
                    node.push(child);
                }
            }
            node.bytes_read = header_length + consumed;
            return Ok(node);
        }

        if header.is_definite() {
            let want = header.payload_length() as usize;
            if want > max_payload {
                return Err(CodecError::PayloadTooLarge {
                    length: want,
                    max: max_payload,
                });
            }
            if want > 0 {
                let mut payload = vec![0u8; want];
                reader
                    .read_exact(&mut payload)
                    .await
                    .map_err(|_| CodecError::UnexpectedEndOfContent)?;
                node.set_payload_raw(Bytes::from(payload));
            }
            node.bytes_read = header_length + want;
        } else {
            let mut payload: Vec<u8> = Vec::new();
            loop {
                let b = reader
                    .read_u8()
                    .await
                    .map_err(|_| CodecError::UnexpectedEndOfContent)?;
                if b == 0x00 && payload.last() == Some(&0x00) {
                    payload.pop();
                    break;
                }
                if payload.len() == max_payload {
                    return Err(CodecError::PayloadTooLarge {
                        length: payload.len() + 1,
                        max: max_payload,
                    });
                }
                payload.push(b);
            }
            let consumed = payload.len() + 2;
            if !payload.is_empty() {
                node.set_payload_raw(Bytes::from(payload));
            }
            node.bytes_read = header_length + consumed;
        }
        Ok(node)
    })
}

async fn next_child<R>(reader: &mut R, max_payload: usize) -> Result<Node, CodecError>
where R: AsyncRead + Unpin + Send {
    match Node::read_stream(reader, max_payload).await? {
        Some(child) => Ok(child),
        None => Err(CodecError::UnexpectedEndOfContent),
    }
}
