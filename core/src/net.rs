/*
 * net.rs
 * Copyright (C) 2026 Emberweb contributors
 *
 * This file is part of Emberweb, an embedded web server and client.
 *
 * Emberweb is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Emberweb is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Emberweb.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Unified stream type (plain TCP, client TLS, server TLS) plus TLS
//! configuration helpers and deadline-bounded I/O. Client roots come from
//! the platform store with webpki-roots as fallback; server credentials are
//! PEM files referenced by the listener config.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::server::TlsStream as ServerTlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// One socket: plain TCP or a negotiated TLS session, either side.
/// `Closed` stands in after the socket has been torn down or handed off
/// (e.g. to a WebSocket engine); I/O on it fails with `NotConnected`.
pub enum NetStream {
    Plain(TcpStream),
    ClientTls(ClientTlsStream<TcpStream>),
    ServerTls(ServerTlsStream<TcpStream>),
    Closed,
}

impl NetStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, NetStream::ClientTls(_) | NetStream::ServerTls(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, NetStream::Closed)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            NetStream::Plain(s) => s.local_addr(),
            NetStream::ClientTls(s) => s.get_ref().0.local_addr(),
            NetStream::ServerTls(s) => s.get_ref().0.local_addr(),
            NetStream::Closed => Err(not_connected()),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            NetStream::Plain(s) => s.peer_addr(),
            NetStream::ClientTls(s) => s.get_ref().0.peer_addr(),
            NetStream::ServerTls(s) => s.get_ref().0.peer_addr(),
            NetStream::Closed => Err(not_connected()),
        }
    }

    /// Take the stream out, leaving `Closed` behind. Used when the HTTP
    /// connection is repurposed for WebSocket framing.
    pub fn take(&mut self) -> NetStream {
        std::mem::replace(self, NetStream::Closed)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream closed")
}

impl AsyncRead for NetStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::ClientTls(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::ServerTls(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Closed => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::ClientTls(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::ServerTls(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NetStream::ClientTls(s) => Pin::new(s).poll_flush(cx),
            NetStream::ServerTls(s) => Pin::new(s).poll_flush(cx),
            NetStream::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            NetStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::ClientTls(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::ServerTls(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::Closed => Poll::Ready(Ok(())),
        }
    }
}

/// Build a root certificate store: platform native certs first, webpki-roots
/// as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

/// Client TLS config for HTTP/1.1 (ALPN `http/1.1`, no client auth).
pub fn client_tls_config() -> Arc<ClientConfig> {
    static CONFIG: std::sync::OnceLock<Arc<ClientConfig>> = std::sync::OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let mut config = ClientConfig::builder()
                .with_root_certificates(build_root_store())
                .with_no_client_auth();
            config.alpn_protocols = vec![b"http/1.1".to_vec()];
            Arc::new(config)
        })
        .clone()
}

/// Server TLS acceptor from PEM certificate-chain and private-key files.
pub fn server_tls_acceptor(certificate: &str, key: &str) -> io::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(std::fs::File::open(certificate)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(std::fs::File::open(key)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key in PEM"))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Connect to `host:port`, negotiating TLS when `secure`. The whole connect,
/// including the TLS handshake, is bounded by `deadline`.
pub async fn connect(host: &str, port: u16, secure: bool, deadline: Option<Instant>) -> io::Result<NetStream> {
    let addr = format!("{}:{}", host, port);
    let tcp = with_deadline(deadline, TcpStream::connect(&addr)).await?;
    if !secure {
        return Ok(NetStream::Plain(tcp));
    }
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?;
    let connector = TlsConnector::from(client_tls_config());
    let tls = with_deadline(deadline, connector.connect(server_name, tcp))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
    Ok(NetStream::ClientTls(tls))
}

/// Run a future, failing with `TimedOut` when the deadline passes first.
pub async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match deadline {
        Some(when) => match tokio::time::timeout_at(when, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "deadline expired")),
        },
        None => fut.await,
    }
}

/// Deadline-bounded read of at most `buf.len()` bytes.
pub async fn read_deadline(
    stream: &mut NetStream,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> io::Result<usize> {
    with_deadline(deadline, stream.read(buf)).await
}

/// Deadline-bounded write of the whole buffer, flushed.
pub async fn write_all_deadline(
    stream: &mut NetStream,
    buf: &[u8],
    deadline: Option<Instant>,
) -> io::Result<()> {
    with_deadline(deadline, async {
        stream.write_all(buf).await?;
        stream.flush().await
    })
    .await
}
