// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Result, bail};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    select,
    sync::Mutex,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::{
    error::SessionError,
    events::Handlers,
    stream::SessionStream,
    transceiver::{Status, Transceiver},
};

/// Events a single session raises. Handlers run on the session's task, in
/// wire order for one session; ordering across sessions is unspecified.
pub struct SessionEvents<P> {
    /// `(session id, packet)` for every completed inbound packet.
    pub message_received: Handlers<(u64, P)>,
    /// Session id, raised exactly once when the receive loop exits.
    pub end: Handlers<u64>,
    /// `(session id, error text)` for receive errors and panicking
    /// handlers.
    pub exception_thrown: Handlers<(u64, String)>,
}

impl<P> Default for SessionEvents<P> {
    fn default() -> Self {
        Self {
            message_received: Handlers::new(),
            end: Handlers::new(),
            exception_thrown: Handlers::new(),
        }
    }
}

/// One connected stream with a running receive loop.
///
/// The loop blocks on the transceiver's receive, delivers packets to the
/// event surface, and exits on disconnect, error, cancellation, or an
/// end-session packet. The write half stays available for sends until the
/// session closes.
pub struct Session<T: Transceiver> {
    id: u64,
    writer: Mutex<WriteHalf<SessionStream>>,
    transceiver: T,
    cancel: CancellationToken,
    pub events: SessionEvents<T::Packet>,
    last_packet: StdMutex<Option<T::Packet>>,
}

/// The not-yet-running receive half of a freshly built session. Endpoints
/// register the session and fire `SessionSpawned` before spawning it.
pub struct SessionLoop<T: Transceiver> {
    session: Arc<Session<T>>,
    reader: ReadHalf<SessionStream>,
    codec: T,
}

impl<T: Transceiver + Clone> Session<T> {
    /// Split the stream and build the session plus its unstarted loop.
    pub fn prepare(
        id: u64,
        stream: SessionStream,
        transceiver: T,
        cancel: CancellationToken,
    ) -> (Arc<Self>, SessionLoop<T>) {
        let (reader, writer) = tokio::io::split(stream);
        let session = Arc::new(Self {
            id,
            writer: Mutex::new(writer),
            transceiver: transceiver.clone(),
            cancel,
            events: SessionEvents::default(),
            last_packet: StdMutex::new(None),
        });
        let looper = SessionLoop {
            session: session.clone(),
            reader,
            codec: transceiver,
        };
        (session, looper)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once the loop has exited or close was requested.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// The most recently delivered packet, if any.
    pub fn last_packet(&self) -> Option<T::Packet> {
        self.last_packet.lock().ok().and_then(|p| p.clone())
    }

    /// Serialize one packet onto the wire. Rejected once the session is
    /// closed.
    pub async fn send(&self, packet: &T::Packet) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!(SessionError::Closed);
        }
        let mut writer = self.writer.lock().await;
        self.transceiver.transmit(&mut *writer, packet).await
    }

    /// Request close: cancels the token; the receive loop observes it,
    /// shuts the stream down and raises `End`. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    async fn finish(&self) {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("session {} shutdown: {e}", self.id);
        }
    }
}

impl<T: Transceiver + Clone> SessionLoop<T> {
    /// Run the receive loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let session = self.session;
        loop {
            let received = select! {
                _ = session.cancel.cancelled() => break,
                received = self.codec.receive(&mut self.reader) => received,
            };
            match received {
                Ok((Status::OverAndOut, Some(packet))) => {
                    let end_session = T::is_end_session(&packet);
                    if let Ok(mut last) = session.last_packet.lock() {
                        *last = Some(packet.clone());
                    }
                    let delivered =
                        session.events.message_received.emit(&(session.id, packet));
                    if !delivered {
                        session.events.exception_thrown.emit(&(
                            session.id,
                            "message handler panicked".to_string(),
                        ));
                        break;
                    }
                    if end_session {
                        debug!("session {} received end-session", session.id);
                        break;
                    }
                },
                Ok((Status::Over, _)) => continue,
                Ok((Status::Fail, _)) | Ok((Status::OverAndOut, None)) => {
                    debug!("session {} disconnected", session.id);
                    break;
                },
                Err(e) => {
                    warn!("session {} receive failed: {e}", session.id);
                    session
                        .events
                        .exception_thrown
                        .emit(&(session.id, e.to_string()));
                    break;
                },
            }
        }
        session.finish().await;
        session.events.end.emit(&session.id);
    }
}
