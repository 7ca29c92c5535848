// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Endpoint compositions: the 1:N router and the 1:1 proxy.

pub mod proxy;
pub mod router;

pub use proxy::Proxy;
pub use router::{BeforeSendHook, ResponseHook, Router, RouterEvents, RouterLink};
