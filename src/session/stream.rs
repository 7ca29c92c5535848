// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_native_tls::{TlsAcceptor, TlsConnector, TlsStream};

/// One connected byte stream, plain TCP or TLS on top of it.
///
/// TLS authentication happens inline at construction, so by the time a
/// session owns the stream it is already an authenticated pipe.
pub enum SessionStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl SessionStream {
    pub fn plain(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    /// Client-side handshake against `domain`.
    pub async fn client_tls(
        stream: TcpStream,
        domain: &str,
        connector: &TlsConnector,
    ) -> Result<Self> {
        let tls = connector.connect(domain, stream).await?;
        Ok(Self::Tls(Box::new(tls)))
    }

    /// Server-side handshake with the acceptor's identity.
    pub async fn server_tls(stream: TcpStream, acceptor: &TlsAcceptor) -> Result<Self> {
        let tls = acceptor.accept(stream).await?;
        Ok(Self::Tls(Box::new(tls)))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
