/*
 * listener.rs
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

//! Listener accept loop: each accepted socket gets exactly one connection
//! context on its own task. TLS listeners negotiate before the request
//! engine sees the stream.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::net::NetStream;
use crate::server::host::WebHost;
use crate::server::web::Web;

pub(crate) async fn run_listener(
    host: Arc<WebHost>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        let (tcp, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(target: "web", error = %e, "accept failed");
                continue;
            }
        };
        let live = host.connections.fetch_add(1, Ordering::SeqCst) + 1;
        if live as u64 > host.max_connections {
            tracing::trace!(
                target: "web",
                live,
                max = host.max_connections,
                "too many connections"
            );
            host.connections.fetch_sub(1, Ordering::SeqCst);
            drop(tcp);
            continue;
        }
        let host = host.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let stream = match &acceptor {
                Some(acceptor) => match acceptor.accept(tcp).await {
                    Ok(tls) => NetStream::ServerTls(tls),
                    Err(e) => {
                        tracing::trace!(target: "web", %peer, error = %e, "tls accept failed");
                        host.connections.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                },
                None => NetStream::Plain(tcp),
            };
            let conn = host.next_conn();
            tracing::trace!(target: "web", conn, %peer, "connection open");
            let web = Web::new(host.clone(), stream, conn);
            web.process().await;
            tracing::trace!(target: "web", conn, %peer, "connection closed");
            host.connections.fetch_sub(1, Ordering::SeqCst);
        });
    }
}
