// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Failure modes of the X.690 codec.
///
/// A clean end-of-stream at a message boundary is not an error: stream-mode
/// readers report it as `Ok(None)` and the session layer closes the
/// connection. Everything below tears the current read down.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Identifier or length octets ended before the header was complete.
    #[error("truncated identifier or length octets")]
    TruncatedHeader,

    /// The length octets declare more than 4 value octets, or a 4-octet
    /// value that does not fit a 32-bit payload length.
    #[error("length octets exceed the 32-bit payload cap")]
    LengthTooLarge,

    /// A primitive payload larger than the configured receive cap.
    #[error("payload of {length} bytes exceeds the allowed maximum of {max}")]
    PayloadTooLarge { length: usize, max: usize },

    /// Constructed content ran out before the declared length was consumed,
    /// or an indefinite-length block was never terminated by `00 00`.
    #[error("content ended before the declared or terminated end")]
    UnexpectedEndOfContent,

    /// A leaf-only tag (EndOfContent, Boolean, Integer, Null, Enumerated)
    /// arrived with the constructed flag set.
    #[error("primitive content requested from a constructed identifier")]
    InvalidConstructedRead,

    /// Buffer-mode read past the end of the input slice.
    #[error("read of {wanted} bytes at offset {offset} is out of bounds (len {len})")]
    Bounds {
        offset: usize,
        wanted: usize,
        len: usize,
    },

    /// Text payload that is not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
