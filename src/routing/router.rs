// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::SocketAddr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::{Result, ensure};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    session::{
        Client, Handlers, Message, Server, Session, SessionInit, X690Transceiver,
    },
};

type X690Session = Arc<Session<X690Transceiver>>;
type X690Client = Arc<Client<X690Transceiver>>;

/// Per-target transform applied to a client message before it is forwarded
/// during a broadcast. `None` drops the message for that target.
pub type BeforeSendHook = Box<dyn Fn(Message, usize) -> Option<Message> + Send + Sync>;

/// Transform applied to a routed remote's response before it goes back to
/// the client. `None` swallows the response.
pub type ResponseHook = Box<dyn Fn(Message) -> Option<Message> + Send + Sync>;

pub struct RouterEvents {
    /// `(common session id, message)` for every message the client sent.
    pub client_message_received: Handlers<(u64, Message)>,
    /// `(common session id, remote index, message)` when the routed remote
    /// answered; the response is then relayed to the client.
    pub server_message_received: Handlers<(u64, usize, Message)>,
    /// `(common session id, remote index)` when a non-routed remote
    /// answered; its message is dropped.
    pub other_server_message_received: Handlers<(u64, usize)>,
}

impl Default for RouterEvents {
    fn default() -> Self {
        Self {
            client_message_received: Handlers::new(),
            server_message_received: Handlers::new(),
            other_server_message_received: Handlers::new(),
        }
    }
}

/// One accepted client session and its fan-out of remote sessions.
pub struct RouterLink {
    pub common: X690Session,
    remotes: OnceCell<Vec<X690Client>>,
    route: AtomicUsize,
    is_broadcast: AtomicBool,
    remote_count: usize,
}

impl RouterLink {
    /// Index of the remote whose responses reach the client. Writes are
    /// clamped into `[0, N)`.
    pub fn route(&self) -> usize {
        self.route.load(Ordering::Relaxed)
    }

    pub fn set_route(&self, route: usize) {
        self.route
            .store(route.min(self.remote_count.saturating_sub(1)), Ordering::Relaxed);
    }

    pub fn is_broadcast(&self) -> bool {
        self.is_broadcast.load(Ordering::Relaxed)
    }

    pub fn set_broadcast(&self, broadcast: bool) {
        self.is_broadcast.store(broadcast, Ordering::Relaxed);
    }

    fn close_remotes(&self) {
        if let Some(remotes) = self.remotes.get() {
            for remote in remotes {
                remote.close();
            }
        }
    }
}

enum LinkEvent {
    FromCommon(Message),
    FromRemote(usize, Message),
    CommonClosed,
    RemoteClosed(usize),
}

struct RouterShared {
    cfg: Config,
    targets: Vec<String>,
    links: DashMap<u64, Arc<RouterLink>>,
    events: RouterEvents,
    client_before_send: RwLock<Option<BeforeSendHook>>,
    server_response: RwLock<Option<ResponseHook>>,
}

/// 1:N relay. Listens on one local endpoint; every accepted session gets
/// its own set of outbound sessions to the configured targets, with
/// per-session routing and broadcast control.
pub struct Router {
    pub server: Arc<Server<X690Transceiver>>,
    shared: Arc<RouterShared>,
}

impl Router {
    pub async fn start(
        listen_addr: &str,
        targets: Vec<String>,
        cfg: Config,
    ) -> Result<Arc<Self>> {
        ensure!(!targets.is_empty(), "router needs at least one target");

        let shared = Arc::new(RouterShared {
            cfg: cfg.clone(),
            targets,
            links: DashMap::new(),
            events: RouterEvents::default(),
            client_before_send: RwLock::new(None),
            server_response: RwLock::new(None),
        });

        let wiring = shared.clone();
        let initializer: SessionInit<X690Transceiver> =
            Box::new(move |session| wire_common(&wiring, session));

        let prototype = X690Transceiver::new(&cfg);
        let server =
            Server::bind_with(listen_addr, cfg, prototype, None, Some(initializer))
                .await?;

        Ok(Arc::new(Self { server, shared }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn events(&self) -> &RouterEvents {
        &self.shared.events
    }

    pub fn link(&self, common_id: u64) -> Option<Arc<RouterLink>> {
        self.shared.links.get(&common_id).map(|l| l.clone())
    }

    pub fn set_client_before_send(&self, hook: BeforeSendHook) {
        if let Ok(mut slot) = self.shared.client_before_send.write() {
            *slot = Some(hook);
        }
    }

    pub fn set_server_response(&self, hook: ResponseHook) {
        if let Ok(mut slot) = self.shared.server_response.write() {
            *slot = Some(hook);
        }
    }

    /// Close the listening side and every link, both directions.
    pub fn close(&self) {
        self.server.close();
        for link in self.shared.links.iter() {
            link.close_remotes();
        }
    }
}

fn wire_common(shared: &Arc<RouterShared>, session: &X690Session) {
    let (tx, rx) = mpsc::unbounded_channel();

    let link = Arc::new(RouterLink {
        common: session.clone(),
        remotes: OnceCell::new(),
        route: AtomicUsize::new(0),
        is_broadcast: AtomicBool::new(false),
        remote_count: shared.targets.len(),
    });
    shared.links.insert(session.id(), link.clone());

    let from_common = tx.clone();
    session
        .events
        .message_received
        .subscribe(move |(_, message): &(u64, Message)| {
            let _ = from_common.send(LinkEvent::FromCommon(message.clone()));
        });
    let on_end = tx.clone();
    session.events.end.subscribe(move |_| {
        let _ = on_end.send(LinkEvent::CommonClosed);
    });

    tokio::spawn(run_link(shared.clone(), link, tx, rx));
}

async fn run_link(
    shared: Arc<RouterShared>,
    link: Arc<RouterLink>,
    tx: UnboundedSender<LinkEvent>,
    mut rx: UnboundedReceiver<LinkEvent>,
) {
    let common_id = link.common.id();

    let mut remotes: Vec<X690Client> = Vec::with_capacity(shared.targets.len());
    for (index, target) in shared.targets.iter().enumerate() {
        let transceiver = X690Transceiver::new(&shared.cfg);
        match Client::connect(target, shared.cfg.clone(), transceiver).await {
            Ok(client) => {
                let from_remote = tx.clone();
                client.session.events.message_received.subscribe(
                    move |(_, message): &(u64, Message)| {
                        let _ = from_remote
                            .send(LinkEvent::FromRemote(index, message.clone()));
                    },
                );
                let on_end = tx.clone();
                client.session.events.end.subscribe(move |_| {
                    let _ = on_end.send(LinkEvent::RemoteClosed(index));
                });
                remotes.push(Arc::new(client));
            },
            Err(e) => {
                warn!("router: connect to {target} failed: {e}");
                link.common.close();
                shared.links.remove(&common_id);
                return;
            },
        }
    }
    let _ = link.remotes.set(remotes.clone());

    while let Some(event) = rx.recv().await {
        match event {
            LinkEvent::FromCommon(message) => {
                shared
                    .events
                    .client_message_received
                    .emit(&(common_id, message.clone()));
                if message.is_end_session() {
                    debug!("router: link {common_id} got end-session from client");
                    link.close_remotes();
                    continue;
                }
                forward_to_remotes(&shared, &link, &remotes, message).await;
            },
            LinkEvent::FromRemote(index, message) => {
                if message.is_end_session() {
                    debug!("router: link {common_id} got end-session from remote {index}");
                    link.common.close();
                    continue;
                }
                if index == link.route() {
                    shared
                        .events
                        .server_message_received
                        .emit(&(common_id, index, message.clone()));
                    if let Some(out) = apply_response(&shared, message)
                        && let Err(e) = link.common.send(&out).await
                    {
                        warn!("router: relay to client {common_id} failed: {e}");
                    }
                } else {
                    shared
                        .events
                        .other_server_message_received
                        .emit(&(common_id, index));
                }
            },
            LinkEvent::CommonClosed => {
                link.close_remotes();
                break;
            },
            LinkEvent::RemoteClosed(index) => {
                debug!("router: remote {index} of link {common_id} closed");
                link.common.close();
            },
        }
    }

    shared.links.remove(&common_id);
    debug!("router: link {common_id} finished");
}

/// Broadcast walks every remote, in index order for route 0 and reversed
/// otherwise, each send filtered through the before-send hook; unicast goes
/// to the routed remote alone.
async fn forward_to_remotes(
    shared: &RouterShared,
    link: &RouterLink,
    remotes: &[X690Client],
    message: Message,
) {
    let route = link.route();
    if link.is_broadcast() {
        let order: Vec<usize> = if route == 0 {
            (0..remotes.len()).collect()
        } else {
            (0..remotes.len()).rev().collect()
        };
        for index in order {
            let Some(out) = apply_before_send(shared, message.clone(), index) else {
                continue;
            };
            if let Err(e) = remotes[index].send(&out).await {
                warn!("router: broadcast to remote {index} failed: {e}");
            }
        }
    } else if let Some(out) = apply_before_send(shared, message, route)
        && let Err(e) = remotes[route].send(&out).await
    {
        warn!("router: forward to remote {route} failed: {e}");
    }
}

fn apply_before_send(
    shared: &RouterShared,
    message: Message,
    index: usize,
) -> Option<Message> {
    match shared.client_before_send.read() {
        Ok(guard) => match guard.as_ref() {
            Some(hook) => hook(message, index),
            None => Some(message),
        },
        Err(_) => Some(message),
    }
}

fn apply_response(shared: &RouterShared, message: Message) -> Option<Message> {
    match shared.server_response.read() {
        Ok(guard) => match guard.as_ref() {
            Some(hook) => hook(message),
            None => Some(message),
        },
        Err(_) => Some(message),
    }
}
