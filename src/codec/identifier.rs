// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{cursor::ByteCursor, error::CodecError};

/// Low-five-bits sentinel announcing a multi-octet tag number.
const MULTI_OCTET_TAG: u8 = 0x1F;

/// Tag class from bits 8–7 of the first identifier octet (X.690 §8.1.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl TagClass {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0,
            TagClass::Application => 1,
            TagClass::ContextSpecific => 2,
            TagClass::Private => 3,
        }
    }
}

/// The identifier octets of a TLV: class, constructed flag, tag number.
///
/// Tag numbers below 31 use the standard single-octet form and are fully
/// interoperable. Larger tag numbers use a length-preserving house encoding:
/// the writer emits `0xFF` filler octets subtracting `0x7F` per octet and the
/// reader adds `b & 0x7F` per octet until the top bit clears. This
/// round-trips against itself but is NOT the base-128 form of X.690
/// §8.1.2.4; peers outside this library only understand tags < 31.
///
/// Two identifiers are equal only if class, tag number, constructed flag and
/// encoded octet count all match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub class: TagClass,
    pub constructed: bool,
    pub tag_number: u32,
    length: usize,
}

impl Identifier {
    pub fn new(class: TagClass, constructed: bool, tag_number: u32) -> Self {
        Self {
            class,
            constructed,
            tag_number,
            length: Self::octet_count(tag_number),
        }
    }

    /// Encoded size in octets for a given tag number.
    pub fn octet_count(tag_number: u32) -> usize {
        if tag_number < 31 {
            1
        } else {
            1 + (tag_number as usize).div_ceil(0x7F)
        }
    }

    /// Number of octets this identifier occupies on the wire.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        let lead = (self.class.bits() << 6) | if self.constructed { 0x20 } else { 0 };
        if self.tag_number < 31 {
            buf.put_u8(lead | self.tag_number as u8);
            return;
        }
        buf.put_u8(lead | MULTI_OCTET_TAG);
        let mut rest = self.tag_number;
        while rest > 0x7F {
            buf.put_u8(0xFF);
            rest -= 0x7F;
        }
        buf.put_u8(rest as u8);
    }

    fn from_parts(first: u8, tag_number: u32, length: usize) -> Self {
        Self {
            class: TagClass::from_bits(first >> 6),
            constructed: (first >> 5) & 1 == 1,
            tag_number,
            length,
        }
    }

    /// Buffer-mode read. A missing first octet is the caller's bounds error;
    /// an octet missing mid-tag is a truncated header.
    pub fn read_buf(cur: &mut ByteCursor<'_>) -> Result<Self, CodecError> {
        let first = cur.read_u8()?;
        let low5 = first & MULTI_OCTET_TAG;
        if low5 < 31 {
            return Ok(Self::from_parts(first, u32::from(low5), 1));
        }

        let mut tag_number = 0u32;
        let mut length = 1usize;
        loop {
            let b = cur.read_u8().map_err(|_| CodecError::TruncatedHeader)?;
            length += 1;
            tag_number = tag_number.wrapping_add(u32::from(b & 0x7F));
            if b & 0x80 == 0 {
                return Ok(Self::from_parts(first, tag_number, length));
            }
        }
    }

    /// Stream-mode read. A clean EOF on the very first octet yields
    /// `Ok(None)`; EOF anywhere later in the tag is a truncated header.
    pub async fn read_stream<R>(reader: &mut R) -> Result<Option<Self>, CodecError>
    where R: AsyncRead + Unpin {
        let mut first = [0u8; 1];
        if reader.read(&mut first).await? == 0 {
            return Ok(None);
        }
        let first = first[0];
        let low5 = first & MULTI_OCTET_TAG;
        if low5 < 31 {
            return Ok(Some(Self::from_parts(first, u32::from(low5), 1)));
        }

        let mut tag_number = 0u32;
        let mut length = 1usize;
        loop {
            let b = reader
                .read_u8()
                .await
                .map_err(|_| CodecError::TruncatedHeader)?;
            length += 1;
            tag_number = tag_number.wrapping_add(u32::from(b & 0x7F));
            if b & 0x80 == 0 {
                return Ok(Some(Self::from_parts(first, tag_number, length)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_octet_form() {
        let id = Identifier::new(TagClass::Universal, false, 16);
        let mut buf = BytesMut::new();
        id.encode_into(&mut buf);
        assert_eq!(&buf[..], &[0x10]);

        let id = Identifier::new(TagClass::ContextSpecific, true, 3);
        let mut buf = BytesMut::new();
        id.encode_into(&mut buf);
        assert_eq!(&buf[..], &[0xA3]);
    }

    #[test]
    fn multi_octet_form_round_trips() {
        for tag in [31u32, 127, 128, 200, 16384, 65535] {
            let id = Identifier::new(TagClass::Application, true, tag);
            let mut buf = BytesMut::new();
            id.encode_into(&mut buf);
            assert_eq!(buf.len(), Identifier::octet_count(tag));

            let mut cur = ByteCursor::new(&buf);
            let back = Identifier::read_buf(&mut cur).expect("read back");
            assert_eq!(back, id);
            assert_eq!(cur.position(), buf.len());
        }
    }
}
