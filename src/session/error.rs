// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use thiserror::Error;

/// Session-layer failures that callers match on. Codec failures surface as
/// [`crate::codec::CodecError`] through the same `anyhow` results.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("session is closed")]
    Closed,
}
