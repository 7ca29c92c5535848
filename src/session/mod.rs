// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Message framing and the session/endpoint machinery on top of the codec.

#![allow(clippy::module_inception)]
pub mod endpoint;
pub mod error;
pub mod events;
pub mod message;
pub mod session;
pub mod stream;
pub mod transceiver;

pub use endpoint::{Client, EndpointEvents, Server, SessionInit};
pub use error::SessionError;
pub use events::Handlers;
pub use message::{IncompleteMessage, Message};
pub use session::{Session, SessionEvents, SessionLoop};
pub use stream::SessionStream;
pub use transceiver::{
    BinaryPacket, BinaryPacketTransceiver, BinaryTransceiver, Status,
    StringTransceiver, Transceiver, X690Transceiver,
};
