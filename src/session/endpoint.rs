// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::SocketAddr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use socket2::{SockRef, TcpKeepalive};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tokio_native_tls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    session::{
        error::SessionError,
        events::Handlers,
        session::Session,
        stream::SessionStream,
        transceiver::Transceiver,
    },
};

/// Hook invoked on every freshly built session before its loop starts.
/// Routers use it to attach their subscriptions without racing the first
/// inbound packet.
pub type SessionInit<T> = Box<dyn Fn(&Arc<Session<T>>) + Send + Sync>;

/// TCP-level socket options on every session socket, accepted or connected:
/// Nagle per config, keep-alive probing at the configured idle time and
/// interval.
fn apply_socket_options(socket: &TcpStream, cfg: &Config) -> std::io::Result<()> {
    socket.set_nodelay(cfg.connection.nodelay)?;
    let keepalive = TcpKeepalive::new()
        .with_time(cfg.keep_alive_time())
        .with_interval(cfg.keep_alive_interval());
    SockRef::from(socket).set_tcp_keepalive(&keepalive)
}

pub struct EndpointEvents {
    /// Session id, raised after registration and before the loop starts.
    pub session_spawned: Handlers<u64>,
    /// Session id, raised exactly once after the session's loop exits.
    pub session_closed: Handlers<u64>,
}

impl Default for EndpointEvents {
    fn default() -> Self {
        Self {
            session_spawned: Handlers::new(),
            session_closed: Handlers::new(),
        }
    }
}

/// Listening endpoint: accepts connections and runs one session task per
/// peer, tracked in a concurrent id-keyed map.
pub struct Server<T: Transceiver + Clone> {
    cfg: Config,
    local_addr: SocketAddr,
    pub sessions: DashMap<u64, Arc<Session<T>>>,
    next_session_id: AtomicU64,
    cancel: CancellationToken,
    pub events: EndpointEvents,
    prototype: T,
    tls: Option<TlsAcceptor>,
    initializer: RwLock<Option<SessionInit<T>>>,
}

impl<T: Transceiver + Clone> Server<T> {
    /// Bind, listen, and start accepting on a background task.
    pub async fn bind(addr: &str, cfg: Config, prototype: T) -> Result<Arc<Self>> {
        Self::bind_with(addr, cfg, prototype, None, None).await
    }

    /// Full-surface bind: optional TLS acceptor for inbound handshakes and
    /// an optional session initializer.
    pub async fn bind_with(
        addr: &str,
        cfg: Config,
        prototype: T,
        tls: Option<TlsAcceptor>,
        initializer: Option<SessionInit<T>>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        let server = Arc::new(Self {
            cfg,
            local_addr: listener.local_addr()?,
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            events: EndpointEvents::default(),
            prototype,
            tls,
            initializer: RwLock::new(initializer),
        });

        let acceptor = server.clone();
        tokio::spawn(async move {
            acceptor.accept_loop(listener).await;
        });

        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session(&self, id: u64) -> Option<Arc<Session<T>>> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// Cancel every session and stop accepting. Sessions unregister
    /// themselves as their loops exit.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((socket, peer)) => {
                    debug!("accepted {peer}");
                    if let Err(e) = self.clone().spawn_session(socket).await {
                        warn!("failed to start session for {peer}: {e}");
                    }
                },
                Err(e) => {
                    warn!("accept failed: {e}");
                },
            }
        }
        debug!("accept loop on {} finished", self.local_addr);
    }

    async fn spawn_session(self: Arc<Self>, socket: TcpStream) -> Result<()> {
        apply_socket_options(&socket, &self.cfg)?;
        let stream = match &self.tls {
            Some(acceptor) => SessionStream::server_tls(socket, acceptor).await?,
            None => SessionStream::plain(socket),
        };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let (session, looper) =
            Session::prepare(id, stream, self.prototype.clone(), cancel);

        if let Ok(init) = self.initializer.read()
            && let Some(init) = init.as_ref()
        {
            init(&session);
        }

        self.sessions.insert(id, session);
        self.events.session_spawned.emit(&id);

        let handle = looper.spawn();
        let server = self.clone();
        tokio::spawn(async move {
            let _ = handle.await;
            server.sessions.remove(&id);
            server.events.session_closed.emit(&id);
        });
        Ok(())
    }
}

/// Connecting endpoint: a single outbound session with a connect deadline.
pub struct Client<T: Transceiver + Clone> {
    pub session: Arc<Session<T>>,
}

impl<T: Transceiver + Clone> Client<T> {
    pub async fn connect(addr: &str, cfg: Config, prototype: T) -> Result<Self> {
        Self::connect_with(addr, cfg, prototype, None).await
    }

    /// Connect with an optional TLS client handshake against `domain`.
    /// Exceeding the configured deadline fails with
    /// [`SessionError::Timeout`].
    pub async fn connect_with(
        addr: &str,
        cfg: Config,
        prototype: T,
        tls: Option<(TlsConnector, String)>,
    ) -> Result<Self> {
        let deadline = cfg.connect_timeout();
        let connected = timeout(deadline, async {
            let socket = TcpStream::connect(addr).await?;
            apply_socket_options(&socket, &cfg)?;
            match &tls {
                Some((connector, domain)) => {
                    SessionStream::client_tls(socket, domain, connector).await
                },
                None => Ok(SessionStream::plain(socket)),
            }
        })
        .await;
        let stream = match connected {
            Ok(stream) => stream.with_context(|| format!("connect {addr}"))?,
            Err(_) => bail!(SessionError::Timeout(deadline)),
        };

        let (session, looper) =
            Session::prepare(1, stream, prototype, CancellationToken::new());
        looper.spawn();
        Ok(Self { session })
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_active()
    }

    pub async fn send(&self, packet: &T::Packet) -> Result<()> {
        self.session.send(packet).await
    }

    pub fn close(&self) {
        self.session.close();
    }
}
