// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use ber_sockets_rs::codec::{ByteCursor, Identifier, TagClass};
use bytes::BytesMut;

const CLASSES: [TagClass; 4] = [
    TagClass::Universal,
    TagClass::Application,
    TagClass::ContextSpecific,
    TagClass::Private,
];

#[test]
fn round_trip_buffer_mode_full_range() -> Result<()> {
    for class in CLASSES {
        for constructed in [false, true] {
            for tag_number in 0..65536u32 {
                let id = Identifier::new(class, constructed, tag_number);
                let mut buf = BytesMut::new();
                id.encode_into(&mut buf);
                assert_eq!(buf.len(), id.length(), "encoded size for tag {tag_number}");

                let mut cur = ByteCursor::new(&buf);
                let back = Identifier::read_buf(&mut cur)?;
                assert_eq!(back, id, "tag {tag_number} class {class:?}");
                assert_eq!(cur.position(), buf.len());
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn round_trip_stream_mode() -> Result<()> {
    for class in CLASSES {
        for tag_number in [0u32, 5, 30, 31, 127, 128, 255, 4096, 65535] {
            let id = Identifier::new(class, true, tag_number);
            let mut buf = BytesMut::new();
            id.encode_into(&mut buf);

            let mut stream = &buf[..];
            let back = Identifier::read_stream(&mut stream)
                .await?
                .expect("identifier available");
            assert_eq!(back, id);
            assert!(stream.is_empty(), "all octets consumed for tag {tag_number}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn stream_eof_on_first_octet_is_none() -> Result<()> {
    let mut stream: &[u8] = &[];
    assert!(Identifier::read_stream(&mut stream).await?.is_none());
    Ok(())
}

#[test]
fn first_octet_bit_layout() {
    let id = Identifier::new(TagClass::ContextSpecific, true, 5);
    let mut buf = BytesMut::new();
    id.encode_into(&mut buf);
    // class 2 in bits 8-7, constructed bit 6, tag in the low five
    assert_eq!(buf[0], 0b1010_0101);
}

#[test]
fn equality_includes_encoded_length() {
    let written = Identifier::new(TagClass::Universal, false, 40);
    // same logical tag decoded from a padded encoding: 0x1F, 0x80+0, 0x28
    let padded = [0x1F, 0x80, 0x28];
    let mut cur = ByteCursor::new(&padded);
    let decoded = Identifier::read_buf(&mut cur).expect("decodes");
    assert_eq!(decoded.tag_number, 40);
    assert_ne!(decoded, written, "longer encoding must not compare equal");
}
