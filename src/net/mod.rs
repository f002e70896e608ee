//! TCP transport and optional TLS wrapping (spec §4.8).
//!
//! `TcpServer` listens on one or more addresses with a configurable
//! backlog and hands off accepted connections; `TcpSocket` wraps a plain
//! or TLS-wrapped stream behind the [`crate::reactor::IODevice`] contract
//! so the rest of the stack (`StreamBuffer`, HTTP layer, RPC dispatcher)
//! never needs to know whether it's talking to a bare socket or a TLS
//! session.

mod tls;

pub use tls::{CertificateVerifier, SslCtx, TlsProtocol, VerifyMode};

use crate::error::{Error, Result};
use crate::reactor::{AsyncIoDevice, ByteSink, ByteSource, IODevice, Timespan};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Listens on one (ip, port) pair; accepting is non-blocking (`accept()`
/// just doesn't resolve until a peer connects). Binding to several
/// addresses is handled by running one `TcpServer` per address — this
/// mirrors the teacher's one-listener-per-bind accept loop
/// (`voice::call_server::start_call_server`) rather than multiplexing
/// several listeners behind a single `accept()`.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr, backlog: u32) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next plain-TCP connection. TLS wrapping, if any, happens
    /// afterwards via [`TcpSocket::ssl_accept`].
    pub async fn accept(&self) -> Result<(TcpSocket, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        Ok((TcpSocket::Plain(AsyncIoDevice::new(stream)), peer))
    }
}

/// A connected socket, either plain or TLS-wrapped. Both variants satisfy
/// [`IODevice`], so callers never match on this enum themselves.
pub enum TcpSocket {
    Plain(AsyncIoDevice<TcpStream>),
    Tls(AsyncIoDevice<tokio_rustls::server::TlsStream<TcpStream>>),
    TlsClient(AsyncIoDevice<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl TcpSocket {
    /// Initiate a plain connection.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::Plain(AsyncIoDevice::new(stream)))
    }

    /// Server-side TLS handshake over an already-accepted plain socket
    /// (spec §4.8 `sslAccept`). Certificate acceptance is delegated to
    /// `ctx`'s configured verifier; a rejection surfaces as
    /// [`Error::SslCertificateNotAccepted`].
    pub async fn ssl_accept(self, ctx: &SslCtx) -> Result<Self> {
        let plain = match self {
            Self::Plain(dev) => dev.into_inner(),
            _ => return Err(Error::System("socket is already TLS-wrapped".into())),
        };
        let acceptor = TlsAcceptor::from(ctx.server_config()?);
        let stream = acceptor
            .accept(plain)
            .await
            .map_err(|_| Error::SslCertificateNotAccepted)?;
        Ok(Self::Tls(AsyncIoDevice::new(stream)))
    }

    /// Client-side TLS handshake (spec §4.8 `sslConnect`).
    pub async fn ssl_connect(self, ctx: &SslCtx, server_name: &str) -> Result<Self> {
        let plain = match self {
            Self::Plain(dev) => dev.into_inner(),
            _ => return Err(Error::System("socket is already TLS-wrapped".into())),
        };
        let connector = TlsConnector::from(ctx.client_config()?);
        let name = tokio_rustls::rustls::pki_types::ServerName::try_from(server_name.to_owned())
            .map_err(|_| Error::System(format!("invalid server name: {server_name}")))?;
        let stream = connector
            .connect(name, plain)
            .await
            .map_err(|_| Error::SslCertificateNotAccepted)?;
        Ok(Self::TlsClient(AsyncIoDevice::new(stream)))
    }
}

#[async_trait::async_trait]
impl ByteSource for TcpSocket {
    async fn read(&mut self, buf: &mut [u8], deadline: Timespan) -> Result<usize> {
        match self {
            Self::Plain(d) => d.read(buf, deadline).await,
            Self::Tls(d) => d.read(buf, deadline).await,
            Self::TlsClient(d) => d.read(buf, deadline).await,
        }
    }
}

#[async_trait::async_trait]
impl ByteSink for TcpSocket {
    async fn write(&mut self, buf: &[u8], deadline: Timespan) -> Result<usize> {
        match self {
            Self::Plain(d) => d.write(buf, deadline).await,
            Self::Tls(d) => d.write(buf, deadline).await,
            Self::TlsClient(d) => d.write(buf, deadline).await,
        }
    }
}

#[async_trait::async_trait]
impl IODevice for TcpSocket {
    fn eof(&self) -> bool {
        match self {
            Self::Plain(d) => d.eof(),
            Self::Tls(d) => d.eof(),
            Self::TlsClient(d) => d.eof(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_round_trip() {
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), 16)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let client_task = tokio::spawn(async move { TcpSocket::connect(addr).await.unwrap() });

        let (mut accepted, _peer) = server.accept().await.unwrap();
        let mut client = client_task.await.unwrap();

        client.write(b"ping", Timespan::from_secs(5)).await.unwrap();
        let mut buf = [0u8; 4];
        let n = accepted.read(&mut buf, Timespan::from_secs(5)).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }
}
