/*
 * lib.rs
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

//! Embedded HTTP/1.1 server and client core.
//!
//! The server side is a keep-alive request engine with routing, sessions,
//! authentication, file and action handlers, streaming multipart upload,
//! WebSocket upgrade and Server-Sent Events. The client side (`client::Url`)
//! shares the same wire-protocol state machines: chunked transfer decoding,
//! header parsing, connection reuse, SSE and WebSocket upgrade.
//!
//! Each connection runs on its own tokio task and blocks on socket I/O while
//! other connections progress. Configuration parsing, TLS, JSON and the
//! crypto primitives are consumed from the ecosystem, not implemented here.

pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod net;

pub mod client;
pub mod server;
pub mod ws;

pub use config::WebConfig;
pub use error::WebError;
pub use server::host::WebHost;
pub use server::web::Web;
pub use client::url::Url;
