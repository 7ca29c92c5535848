// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{cursor::ByteCursor, error::CodecError};

/// Length value marking the indefinite form (`0x80` on the wire).
pub const INDEFINITE: i32 = -1;

/// The length octets of a TLV (X.690 §8.1.3).
///
/// `value == -1` means indefinite length. Payload lengths are capped at what
/// an `i32` can carry: a long form with more than 4 value octets, or a
/// 4-octet value above `i32::MAX`, is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthOctets {
    pub value: i32,
    pub read_length: usize,
}

impl LengthOctets {
    pub fn definite(value: i32) -> Self {
        Self {
            value,
            read_length: Self::octet_count(value),
        }
    }

    pub fn indefinite() -> Self {
        Self {
            value: INDEFINITE,
            read_length: 1,
        }
    }

    #[inline]
    pub fn is_definite(&self) -> bool {
        self.value >= 0
    }

    /// Encoded size in octets for a given length value.
    pub fn octet_count(length: i32) -> usize {
        if length < 0x80 {
            // covers indefinite (< 0) and the short form
            1
        } else if length < 0x100 {
            2
        } else if length < 0x1_0000 {
            3
        } else if length < 0x100_0000 {
            4
        } else {
            5
        }
    }

    pub fn encode_into(length: i32, buf: &mut BytesMut) {
        if length < 0 {
            buf.put_u8(0x80);
            return;
        }
        if length < 0x80 {
            buf.put_u8(length as u8);
            return;
        }
        let n = Self::octet_count(length) - 1;
        buf.put_u8(0x80 | n as u8);
        let be = length.to_be_bytes();
        buf.put_slice(&be[4 - n..]);
    }

    fn from_long_form(octets: &[u8]) -> Result<Self, CodecError> {
        let mut value = 0u64;
        for &b in octets {
            value = (value << 8) | u64::from(b);
        }
        if value > i32::MAX as u64 {
            return Err(CodecError::LengthTooLarge);
        }
        Ok(Self {
            value: value as i32,
            read_length: 1 + octets.len(),
        })
    }

    /// Buffer-mode read; every missing octet is a bounds error.
    pub fn read_buf(cur: &mut ByteCursor<'_>) -> Result<Self, CodecError> {
        let first = cur.read_u8()?;
        if first < 0x80 {
            return Ok(Self {
                value: i32::from(first),
                read_length: 1,
            });
        }
        if first == 0x80 {
            return Ok(Self::indefinite());
        }
        let n = usize::from(first & 0x7F);
        if n > 4 {
            return Err(CodecError::LengthTooLarge);
        }
        Self::from_long_form(cur.take(n)?)
    }

    /// Stream-mode read; the identifier was already consumed, so any EOF
    /// here leaves a torn header behind.
    pub async fn read_stream<R>(reader: &mut R) -> Result<Self, CodecError>
    where R: AsyncRead + Unpin {
        let first = reader
            .read_u8()
            .await
            .map_err(|_| CodecError::TruncatedHeader)?;
        if first < 0x80 {
            return Ok(Self {
                value: i32::from(first),
                read_length: 1,
            });
        }
        if first == 0x80 {
            return Ok(Self::indefinite());
        }
        let n = usize::from(first & 0x7F);
        if n > 4 {
            return Err(CodecError::LengthTooLarge);
        }
        let mut octets = [0u8; 4];
        reader
            .read_exact(&mut octets[..n])
            .await
            .map_err(|_| CodecError::TruncatedHeader)?;
        Self::from_long_form(&octets[..n])
    }
}
