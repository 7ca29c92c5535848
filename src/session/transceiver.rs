// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::future::Future;

use anyhow::{Result, bail};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    cfg::config::Config,
    session::message::{IncompleteMessage, Message},
};

/// Outcome of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Part of a message arrived; call receive again.
    Over,
    /// A full packet is in hand; deliver it.
    OverAndOut,
    /// The peer disconnected.
    Fail,
}

/// The per-packet-type codec a session runs its wire through.
///
/// `receive` pulls from the stream until it can report a packet, a partial
/// (`Over`), or a disconnect; `transmit` pushes one packet out. Receive
/// state (the reusable buffer, any half-read message) lives on the
/// transceiver, one instance per session loop.
pub trait Transceiver: Send + Sync + 'static {
    type Packet: Clone + Send + Sync + 'static;

    fn receive<R>(
        &mut self,
        reader: &mut R,
    ) -> impl Future<Output = Result<(Status, Option<Self::Packet>)>> + Send
    where R: AsyncRead + Unpin + Send;

    fn transmit<W>(
        &self,
        writer: &mut W,
        packet: &Self::Packet,
    ) -> impl Future<Output = Result<()>> + Send
    where W: AsyncWrite + Unpin + Send;

    /// Whether this packet asks for a graceful disconnect. Only the X.690
    /// transceiver has a wire-level notion of this.
    fn is_end_session(_packet: &Self::Packet) -> bool {
        false
    }
}

fn receive_buffer(len: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(len);
    buf.resize(len, 0);
    buf
}

/// Raw octets: one read, one packet.
#[derive(Debug, Clone)]
pub struct BinaryTransceiver {
    buffer: BytesMut,
}

impl BinaryTransceiver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            buffer: receive_buffer(cfg.limits.receive_buffer_length),
        }
    }
}

impl Transceiver for BinaryTransceiver {
    type Packet = Vec<u8>;

    async fn receive<R>(&mut self, reader: &mut R) -> Result<(Status, Option<Vec<u8>>)>
    where R: AsyncRead + Unpin + Send {
        let got = reader.read(&mut self.buffer[..]).await?;
        if got == 0 {
            return Ok((Status::Fail, None));
        }
        Ok((Status::OverAndOut, Some(self.buffer[..got].to_vec())))
    }

    async fn transmit<W>(&self, writer: &mut W, packet: &Vec<u8>) -> Result<()>
    where W: AsyncWrite + Unpin + Send {
        writer.write_all(packet).await?;
        Ok(())
    }
}

/// Length plus a frozen slice of the read buffer, handed to consumers
/// without copying.
#[derive(Debug, Clone)]
pub struct BinaryPacket {
    pub length: usize,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct BinaryPacketTransceiver {
    buffer_len: usize,
    buffer: BytesMut,
}

impl BinaryPacketTransceiver {
    pub fn new(cfg: &Config) -> Self {
        let buffer_len = cfg.limits.receive_buffer_length;
        Self {
            buffer_len,
            buffer: receive_buffer(buffer_len),
        }
    }
}

impl Transceiver for BinaryPacketTransceiver {
    type Packet = BinaryPacket;

    async fn receive<R>(
        &mut self,
        reader: &mut R,
    ) -> Result<(Status, Option<BinaryPacket>)>
    where R: AsyncRead + Unpin + Send {
        if self.buffer.len() < self.buffer_len {
            self.buffer.resize(self.buffer_len, 0);
        }
        let got = reader.read(&mut self.buffer[..]).await?;
        if got == 0 {
            return Ok((Status::Fail, None));
        }
        let data = self.buffer.split_to(got).freeze();
        Ok((Status::OverAndOut, Some(BinaryPacket { length: got, data })))
    }

    async fn transmit<W>(&self, writer: &mut W, packet: &BinaryPacket) -> Result<()>
    where W: AsyncWrite + Unpin + Send {
        writer.write_all(&packet.data[..packet.length]).await?;
        Ok(())
    }
}

/// Binary framing plus UTF-8 in both directions.
#[derive(Debug, Clone)]
pub struct StringTransceiver {
    buffer: BytesMut,
}

impl StringTransceiver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            buffer: receive_buffer(cfg.limits.receive_buffer_length),
        }
    }
}

impl Transceiver for StringTransceiver {
    type Packet = String;

    async fn receive<R>(&mut self, reader: &mut R) -> Result<(Status, Option<String>)>
    where R: AsyncRead + Unpin + Send {
        let got = reader.read(&mut self.buffer[..]).await?;
        if got == 0 {
            return Ok((Status::Fail, None));
        }
        let text = std::str::from_utf8(&self.buffer[..got])?.to_string();
        Ok((Status::OverAndOut, Some(text)))
    }

    async fn transmit<W>(&self, writer: &mut W, packet: &String) -> Result<()>
    where W: AsyncWrite + Unpin + Send {
        writer.write_all(packet.as_bytes()).await?;
        Ok(())
    }
}

/// X.690 message framing with partial-read carry.
///
/// A short payload read comes back as `Over` and the incomplete message is
/// parked on the transceiver; the next receive continues it instead of
/// starting a new frame, so interleaved traffic decodes in wire order.
#[derive(Debug, Clone)]
pub struct X690Transceiver {
    buffer: BytesMut,
    carried: Option<IncompleteMessage>,
    max_payload: usize,
}

impl X690Transceiver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            buffer: receive_buffer(cfg.limits.receive_buffer_length),
            carried: None,
            max_payload: cfg.limits.max_payload_size,
        }
    }

    /// The parked half-read message, if the last receive said `Over`.
    pub fn carried(&self) -> Option<&IncompleteMessage> {
        self.carried.as_ref()
    }
}

impl Transceiver for X690Transceiver {
    type Packet = Message;

    async fn receive<R>(&mut self, reader: &mut R) -> Result<(Status, Option<Message>)>
    where R: AsyncRead + Unpin + Send {
        let message = match self.carried.take() {
            Some(incomplete) => {
                incomplete
                    .continue_read(reader, &mut self.buffer, self.max_payload)
                    .await?
            },
            None => {
                match Message::read_buffered(reader, &mut self.buffer, self.max_payload)
                    .await?
                {
                    None => return Ok((Status::Fail, None)),
                    Some(message) => message,
                }
            },
        };

        match message {
            Message::Incomplete(incomplete) => {
                self.carried = Some(incomplete);
                Ok((Status::Over, None))
            },
            complete => Ok((Status::OverAndOut, Some(complete))),
        }
    }

    async fn transmit<W>(&self, writer: &mut W, packet: &Message) -> Result<()>
    where W: AsyncWrite + Unpin + Send {
        let Some(node) = packet.node() else {
            bail!("cannot transmit an incomplete message");
        };
        let mut node = node.clone();
        let octets = node.to_bytes();
        writer.write_all(&octets).await?;
        Ok(())
    }

    fn is_end_session(packet: &Message) -> bool {
        packet.is_end_session()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn binary_reads_complete_every_time() -> anyhow::Result<()> {
        let mut transceiver = BinaryTransceiver::new(&Config::default());
        let (mut near, far) = tokio::io::duplex(1024);
        let (mut far_read, _far_write) = tokio::io::split(far);

        near.write_all(b"abc").await?;
        let (status, packet) = transceiver.receive(&mut far_read).await?;
        assert_eq!(status, Status::OverAndOut);
        assert_eq!(packet.as_deref(), Some(&b"abc"[..]));

        drop(near);
        let (status, packet) = transceiver.receive(&mut far_read).await?;
        assert_eq!(status, Status::Fail);
        assert!(packet.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn binary_packet_hands_out_frozen_slices() -> anyhow::Result<()> {
        let mut transceiver = BinaryPacketTransceiver::new(&Config::default());
        let (mut near, far) = tokio::io::duplex(1024);
        let (mut far_read, _far_write) = tokio::io::split(far);

        near.write_all(&[1, 2, 3, 4]).await?;
        let (status, packet) = transceiver.receive(&mut far_read).await?;
        assert_eq!(status, Status::OverAndOut);
        let packet = packet.expect("packet");
        assert_eq!(packet.length, 4);
        assert_eq!(&packet.data[..], &[1, 2, 3, 4]);

        // the handed-out slice survives the next receive untouched
        near.write_all(&[9, 9]).await?;
        let (_, second) = transceiver.receive(&mut far_read).await?;
        assert_eq!(&packet.data[..], &[1, 2, 3, 4]);
        assert_eq!(second.expect("second").length, 2);
        Ok(())
    }

    #[tokio::test]
    async fn string_decodes_utf8() -> anyhow::Result<()> {
        let mut transceiver = StringTransceiver::new(&Config::default());
        let (mut near, far) = tokio::io::duplex(1024);
        let (mut far_read, _far_write) = tokio::io::split(far);

        near.write_all("grüß dich".as_bytes()).await?;
        let (status, packet) = transceiver.receive(&mut far_read).await?;
        assert_eq!(status, Status::OverAndOut);
        assert_eq!(packet.as_deref(), Some("grüß dich"));

        near.write_all(&[0xFF, 0xFE]).await?;
        assert!(transceiver.receive(&mut far_read).await.is_err());
        Ok(())
    }
}
