// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;

use crate::{
    cfg::config::Config,
    routing::router::{BeforeSendHook, ResponseHook, Router, RouterEvents},
    session::Message,
};

/// 1:1 relay: a router with a single target and a symmetric hook surface.
pub struct Proxy {
    pub router: Arc<Router>,
}

impl Proxy {
    pub async fn start(listen_addr: &str, target: &str, cfg: Config) -> Result<Self> {
        let router = Router::start(listen_addr, vec![target.to_string()], cfg).await?;
        Ok(Self { router })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.router.local_addr()
    }

    pub fn events(&self) -> &RouterEvents {
        self.router.events()
    }

    /// Transform or drop messages flowing client → server.
    pub fn set_client_message_hook<F>(&self, hook: F)
    where F: Fn(Message) -> Option<Message> + Send + Sync + 'static {
        let hook: BeforeSendHook = Box::new(move |message, _| hook(message));
        self.router.set_client_before_send(hook);
    }

    /// Transform or drop messages flowing server → client.
    pub fn set_server_message_hook<F>(&self, hook: F)
    where F: Fn(Message) -> Option<Message> + Send + Sync + 'static {
        let hook: ResponseHook = Box::new(hook);
        self.router.set_server_response(hook);
    }

    pub fn close(&self) {
        self.router.close();
    }
}
