/*
 * web.rs
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

//! Per-connection request engine. One `Web` owns one socket and serves
//! requests in sequence: parse headers, resolve redirects, route,
//! authorize, dispatch to the action or file handler, finalize, then reset
//! for keep-alive. Pipelined bytes over-read into the rx buffer survive the
//! reset and feed the next request. Requests run under two deadlines: a
//! parse deadline while headers arrive, then a per-I/O inactivity deadline
//! clamped by the total request deadline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::time::Instant;

use crate::codec::escape::{decode, encode_uri, validate_uri_chars};
use crate::codec::date::{format_http_date, parse_http_date};
use crate::codec::mime::mime_for_ext;
use crate::codec::path::normalize_path;
use crate::codec::status::status_text;
use crate::codec::url::ParsedUrl;
use crate::http::body::{BodyState, ChunkState, UNLIMITED};
use crate::http::buffer::{buffer_until, find_pattern, BUFSIZE};
use crate::http::headers::{HeaderBlock, HeaderMap};
use crate::net::{write_all_deadline, NetStream};
use crate::server::action::Action;
use crate::server::host::{HookEvent, WebHost};
use crate::server::route::RouteHandler;
use crate::server::upload::Upload;
use crate::ws::{handshake, WebSockets};
use std::io;

/// Request and connection context: one per accepted socket, reused across
/// keep-alive requests.
pub struct Web {
    pub(crate) host: Arc<WebHost>,
    pub(crate) stream: NetStream,
    pub(crate) rx: BytesMut,

    /// Monotonic connection id.
    pub conn: i64,
    /// Requests already served on this socket.
    pub reuse: u64,
    pub(crate) secure: bool,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) peer_addr: Option<SocketAddr>,

    // Request
    pub method: String,
    pub url: String,
    pub path: String,
    pub query: Option<String>,
    pub hash: Option<String>,
    pub protocol: String,
    pub http10: bool,
    pub ext: Option<String>,
    pub mime: Option<String>,
    pub(crate) headers: HeaderBlock,
    pub cookie: Option<String>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub origin: Option<String>,
    pub since: Option<SystemTime>,

    // Body framing
    pub rx_len: i64,
    pub(crate) body_state: BodyState,
    pub(crate) form_body: bool,
    pub(crate) json_body: bool,
    /// Buffered request body for non-streaming routes.
    pub body: BytesMut,
    /// Form/JSON body variables.
    pub vars: serde_json::Map<String, serde_json::Value>,
    /// Query string variables.
    pub qvars: serde_json::Map<String, serde_json::Value>,

    // Response
    pub status: u16,
    pub(crate) tx_headers: HeaderMap,
    pub tx_len: i64,
    pub(crate) tx_remaining: i64,
    pub(crate) wrote_headers: bool,
    pub(crate) creating_headers: bool,
    pub complete: bool,
    pub(crate) redirect_target: Option<String>,

    // Lifecycle
    pub(crate) auth_checked: bool,
    pub(crate) authenticated: bool,
    pub close: bool,
    pub exists: bool,
    pub username: Option<String>,
    pub role: Option<String>,
    pub(crate) role_id: Option<usize>,
    pub(crate) session_id: Option<String>,
    pub(crate) route_index: Option<usize>,
    pub(crate) error_msg: Option<String>,

    // Upload
    pub uploads: HashMap<String, Upload>,
    pub(crate) boundary: Option<Vec<u8>>,

    // Deadlines
    pub(crate) started: Instant,
    pub(crate) deadline: Option<Instant>,
}

impl Web {
    pub(crate) fn new(host: Arc<WebHost>, stream: NetStream, conn: i64) -> Self {
        let secure = stream.is_secure();
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        Self {
            host,
            stream,
            rx: BytesMut::with_capacity(BUFSIZE),
            conn,
            reuse: 0,
            secure,
            local_addr,
            peer_addr,
            method: String::new(),
            url: String::new(),
            path: String::new(),
            query: None,
            hash: None,
            protocol: String::new(),
            http10: false,
            ext: None,
            mime: None,
            headers: HeaderBlock::default(),
            cookie: None,
            content_type: None,
            content_disposition: None,
            origin: None,
            since: None,
            rx_len: -1,
            body_state: BodyState::new(),
            form_body: false,
            json_body: false,
            body: BytesMut::new(),
            vars: serde_json::Map::new(),
            qvars: serde_json::Map::new(),
            status: 200,
            tx_headers: HeaderMap::new(),
            tx_len: -1,
            tx_remaining: UNLIMITED,
            wrote_headers: false,
            creating_headers: false,
            complete: false,
            redirect_target: None,
            auth_checked: false,
            authenticated: false,
            close: false,
            exists: false,
            username: None,
            role: None,
            role_id: None,
            session_id: None,
            route_index: None,
            error_msg: None,
            uploads: HashMap::new(),
            boundary: None,
            started: Instant::now(),
            deadline: None,
        }
    }

    /// The request scheme as seen by the client.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Address of the listening endpoint serving this connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn host(&self) -> &Arc<WebHost> {
        &self.host
    }

    /// A request header value, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Iterate the parsed request headers.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter()
    }

    /// A body/form variable as a string.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(|v| v.as_str())
    }

    pub fn var_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.var(name).unwrap_or(default)
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.vars
            .insert(name.to_string(), serde_json::Value::String(value.to_string()));
    }

    pub fn remove_var(&mut self, name: &str) {
        self.vars.remove(name);
    }

    /// A query variable as a string.
    pub fn qvar(&self, name: &str) -> Option<&str> {
        self.qvars.get(name).and_then(|v| v.as_str())
    }

    // ------------------------------------------------------------------
    // Connection lifecycle

    /// Serve requests on this connection until it closes. Implements
    /// keep-alive and pipelining: requests are strictly serial and
    /// responses go out in request order.
    pub(crate) async fn process(mut self) {
        self.run_hook(HookEvent::Connect).await;
        while !self.close {
            if self.serve_request().await.is_err() {
                break;
            }
            self.reset().await;
        }
        self.run_hook(HookEvent::Disconnect).await;
        self.cleanup_uploads().await;
    }

    async fn serve_request(&mut self) -> io::Result<()> {
        self.started = Instant::now();
        self.deadline = self.host.parse_timeout.map(|t| self.started + t);

        let size = match buffer_until(
            &mut self.stream,
            &mut self.rx,
            b"\r\n\r\n",
            self.host.max_header,
            false,
            self.deadline,
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                // Idle keep-alive close is normal; anything else is logged
                if self.reuse == 0 || !self.rx.is_empty() {
                    tracing::trace!(target: "web", conn = self.conn, error = %e, "request read failed");
                }
                self.close = true;
                return Err(e);
            }
        };
        self.parse_headers(size).await?;
        self.add_standard_headers();
        self.run_hook(HookEvent::Start).await;

        self.handle_request().await?;
        self.run_hook(HookEvent::End).await;
        Ok(())
    }

    /// Reset for the next request on the same socket. The rx buffer keeps
    /// any pipelined bytes already read.
    async fn reset(&mut self) {
        if self.close {
            return;
        }
        if !self.body_state.is_complete() {
            if self.consume_input().await.is_err() {
                self.close = true;
                return;
            }
        }
        self.cleanup_uploads().await;

        self.method.clear();
        self.url.clear();
        self.path.clear();
        self.query = None;
        self.hash = None;
        self.protocol.clear();
        self.http10 = false;
        self.ext = None;
        self.mime = None;
        self.headers.clear();
        self.cookie = None;
        self.content_type = None;
        self.content_disposition = None;
        self.origin = None;
        self.since = None;
        self.rx_len = -1;
        self.body_state = BodyState::new();
        self.form_body = false;
        self.json_body = false;
        self.body.clear();
        self.vars = serde_json::Map::new();
        self.qvars = serde_json::Map::new();
        self.status = 200;
        self.tx_headers.clear();
        self.tx_len = -1;
        self.tx_remaining = UNLIMITED;
        self.wrote_headers = false;
        self.creating_headers = false;
        self.complete = false;
        self.redirect_target = None;
        self.auth_checked = false;
        self.authenticated = false;
        self.exists = false;
        self.username = None;
        self.role = None;
        self.role_id = None;
        self.session_id = None;
        self.route_index = None;
        self.error_msg = None;
        self.uploads = HashMap::new();
        self.boundary = None;
        self.reuse += 1;
    }

    async fn cleanup_uploads(&mut self) {
        if !self.host.upload_remove {
            self.uploads.clear();
            return;
        }
        for upload in self.uploads.values_mut() {
            upload.discard().await;
        }
        self.uploads.clear();
    }

    // ------------------------------------------------------------------
    // Parse

    async fn parse_headers(&mut self, size: usize) -> io::Result<()> {
        if size <= 10 {
            return Err(self.net_error("bad request header").await);
        }
        let mut head = self.rx.split_to(size);
        // Drop the final CRLF of the blank line; each header keeps its own
        head.truncate(size - 2);

        let line_end = match find_pattern(&head, b"\r\n") {
            Some(n) => n,
            None => return Err(self.net_error("bad request header").await),
        };
        {
            let line = match std::str::from_utf8(&head[..line_end]) {
                Ok(l) => l,
                Err(_) => return Err(self.net_error("bad request line").await),
            };
            let mut tokens = line.split_ascii_whitespace();
            let (method, url, protocol) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(m), Some(u), Some(p)) => (m, u, p),
                _ => return Err(self.net_error("bad request line").await),
            };
            if tokens.next().is_some() {
                return Err(self.net_error("bad request line").await);
            }
            self.method = method.to_ascii_uppercase();
            self.url = url.to_string();
            self.protocol = protocol.to_ascii_uppercase();
        }
        // HTTP/1.0 is supported without keep-alive
        if self.protocol == "HTTP/1.0" {
            self.http10 = true;
            self.close = true;
        } else if self.protocol != "HTTP/1.1" {
            return Err(self.net_error("bad protocol").await);
        }

        let block = match HeaderBlock::parse(&head[line_end + 2..]) {
            Ok(b) => b,
            Err(_) => return Err(self.net_error("bad headers").await),
        };
        self.headers = block;
        self.interpret_headers().await?;
        self.validate_url().await?;
        self.update_deadline();
        Ok(())
    }

    /// Apply the recognized request headers to the connection state.
    async fn interpret_headers(&mut self) -> io::Result<()> {
        let headers = std::mem::take(&mut self.headers);
        let mut content_length: Option<i64> = None;
        let mut chunked = false;
        let mut result = Ok(());

        for (name, value) in headers.iter() {
            match name.to_ascii_lowercase().as_str() {
                "content-length" => match value.trim().parse::<i64>() {
                    Ok(n) if n >= 0 => content_length = Some(n),
                    _ => {
                        result = Err(self.net_error("bad content length").await);
                        break;
                    }
                },
                "content-type" => {
                    self.content_type = Some(value.to_string());
                    if value.starts_with("multipart/form-data") {
                        if let Err(e) = self.init_upload(value).await {
                            result = Err(e);
                            break;
                        }
                    } else if value == "application/x-www-form-urlencoded" {
                        self.form_body = true;
                    } else if value == "application/json" {
                        self.json_body = true;
                    }
                }
                "content-disposition" => {
                    self.content_disposition = Some(value.to_string());
                }
                "connection" => {
                    if value.eq_ignore_ascii_case("close") {
                        self.close = true;
                    }
                }
                "cookie" => match &mut self.cookie {
                    Some(prior) => {
                        prior.push_str("; ");
                        prior.push_str(value);
                    }
                    None => self.cookie = Some(value.to_string()),
                },
                "if-modified-since" => {
                    self.since = parse_http_date(value);
                }
                "origin" => {
                    self.origin = Some(value.to_string());
                }
                "transfer-encoding" => {
                    if value.to_ascii_lowercase().contains("chunked") {
                        chunked = true;
                    }
                }
                _ => {}
            }
        }
        self.headers = headers;
        result?;

        // RFC 7230: chunked with an explicit length is a smuggling vector
        if chunked && content_length.is_some() {
            return Err(self
                .net_error("chunked transfer with content length")
                .await);
        }
        if let Some(len) = content_length {
            self.rx_len = len;
        }
        self.body_state.set_framing(self.rx_len, chunked);
        if !chunked && self.boundary.is_none() && self.rx_len < 0 {
            self.body_state.remaining = 0;
        }
        Ok(())
    }

    async fn validate_url(&mut self) -> io::Result<()> {
        if self.url.is_empty() {
            return Err(self.net_error("empty URL").await);
        }
        if !validate_uri_chars(&self.url) {
            return Err(self.net_error("bad characters in URL").await);
        }
        let decoded = decode(&self.url);
        self.url = decoded;

        // The hash comes after the query
        let mut path = self.url.clone();
        if let Some(i) = path.find('#') {
            self.hash = Some(path[i + 1..].to_string());
            path.truncate(i);
        }
        if let Some(i) = path.find('?') {
            self.query = Some(path[i + 1..].to_string());
            path.truncate(i);
        }
        self.path = match normalize_path(&path) {
            Some(p) => p,
            None => return Err(self.net_error("illegal URL").await),
        };
        let last_segment = self.path.rsplit('/').next().unwrap_or("");
        if let Some(dot) = last_segment.rfind('.') {
            if dot + 1 < last_segment.len() {
                self.ext = Some(last_segment[dot..].to_string());
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch

    async fn handle_request(&mut self) -> io::Result<()> {
        if self.complete {
            return Ok(());
        }
        if self.redirect_request().await? {
            return Ok(());
        }
        if !self.route_request().await? {
            return Ok(());
        }
        let index = match self.route_index {
            Some(i) => i,
            None => return Ok(()),
        };
        let route = &self.host.routes[index];
        let (handler, stream_route, has_methods, methods_header) = (
            route.handler,
            route.stream,
            route.methods.is_some(),
            route.methods_header(),
        );

        if self.method == "OPTIONS" && has_methods {
            self.process_options(methods_header.unwrap_or_default()).await?;
            return Ok(());
        }
        if self.boundary.is_some() {
            self.process_upload().await?;
            if self.complete {
                return Ok(());
            }
        }
        if self.query.is_some() {
            self.process_query();
        }
        if !stream_route
            && (self.body_state.remaining > 0 || self.body_state.chunked != ChunkState::None)
        {
            self.read_body().await?;
            if self.complete {
                return Ok(());
            }
            self.process_body().await?;
            if self.complete {
                return Ok(());
            }
        }
        self.update_deadline();

        // Request ready to run; the hook may handle it outright
        self.run_hook(HookEvent::Run).await;
        if self.complete {
            return Ok(());
        }
        match handler {
            RouteHandler::Action => self.action_handler().await,
            RouteHandler::File => crate::server::file::file_handler(self).await,
        }
    }

    /// Apply host-level redirect rules. True when the request was answered.
    async fn redirect_request(&mut self) -> io::Result<bool> {
        let local = match self.local_addr {
            Some(a) => a,
            None => return Ok(false),
        };
        let hit = self.host.redirects.iter().position(|r| {
            r.matches(
                self.scheme(),
                self.host.name.as_deref(),
                local,
                &self.path,
                self.query.as_deref(),
                self.hash.as_deref(),
            )
        });
        if let Some(i) = hit {
            let (status, to) = {
                let r = &self.host.redirects[i];
                (r.status, r.to.clone())
            };
            self.redirect(status, &to).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Match the route table and apply its method/auth/trim/redirect
    /// semantics. False when the request was already answered.
    async fn route_request(&mut self) -> io::Result<bool> {
        let index = self.host.routes.iter().position(|r| r.matches(&self.path));
        let index = match index {
            Some(i) => i,
            None => {
                tracing::info!(target: "web", path = %self.path, "no route to serve request");
                self.run_hook(HookEvent::NotFound).await;
                if !self.complete {
                    self.write_response(404, "No matching route").await?;
                }
                return Ok(false);
            }
        };
        let (allows, redirect, role, trim) = {
            let route = &self.host.routes[index];
            (
                route.allows_method(&self.method),
                route.redirect.clone(),
                route.role.clone(),
                route.trim.clone(),
            )
        };
        if !allows && self.method != "OPTIONS" {
            self.error(405, "Unsupported method").await?;
            return Ok(false);
        }
        self.route_index = Some(index);

        if let Some(target) = redirect {
            self.redirect(302, &target).await?;
            return Ok(false);
        }
        if let Some(required) = role {
            if !self.can(&required).await? {
                return Ok(false);
            }
        }
        if let Some(trim) = trim {
            if let Some(stripped) = self.path.strip_prefix(trim.as_str()) {
                let mut path = stripped.to_string();
                if !path.starts_with('/') {
                    path.insert(0, '/');
                }
                self.path = path;
            }
        }
        Ok(true)
    }

    async fn action_handler(&mut self) -> io::Result<()> {
        let actions: Vec<Action> = self.host.actions.read().unwrap().clone();
        for action in actions {
            if self.path.starts_with(&action.prefix) {
                if let Some(role) = &action.role {
                    if !self.can(role).await? {
                        return Ok(());
                    }
                }
                self.run_hook(HookEvent::Action).await;
                return (action.func)(self).await;
            }
        }
        self.error(404, "No action to handle request").await
    }

    /// Respond to OPTIONS with the route's allowed methods.
    async fn process_options(&mut self, methods: String) -> io::Result<()> {
        self.tx_headers
            .set("Access-Control-Allow-Methods", methods);
        self.write_response(200, "").await
    }

    /// Emit `Access-Control-Allow-Origin` for the request origin, or the
    /// canonical scheme and host when the request carried no Origin.
    pub fn add_access_control_header(&mut self) {
        match self.origin.clone() {
            Some(origin) => {
                self.tx_headers.set("Access-Control-Allow-Origin", origin);
            }
            None => {
                let value = format!("{}://{}", self.scheme(), self.host_name());
                self.tx_headers.set("Access-Control-Allow-Origin", value);
            }
        }
    }

    /// Hostname serving this request: the canonical config name, or the
    /// bound address.
    pub fn host_name(&self) -> String {
        if let Some(name) = &self.host.name {
            return name.clone();
        }
        match self.local_addr {
            Some(addr) => {
                let ip = addr.ip();
                if ip.is_loopback() {
                    format!("localhost:{}", addr.port())
                } else {
                    format!("{}:{}", ip, addr.port())
                }
            }
            None => "localhost".to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Body

    /// Read up to `buf.len()` request body bytes through the framing
    /// pipeline (Content-Length or chunked). Zero at end of body.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self
            .body_state
            .read(&mut self.stream, &mut self.rx, buf, self.deadline)
            .await
        {
            Ok(n) => {
                self.update_deadline();
                Ok(n)
            }
            Err(e) => {
                if self.body_state.remaining > 0 {
                    Err(self.net_error(&format!("cannot read from socket: {}", e)).await)
                } else {
                    self.close = true;
                    Ok(0)
                }
            }
        }
    }

    /// Drain any unread request body so keep-alive can proceed.
    pub async fn consume_input(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; BUFSIZE];
        loop {
            let n = self.read(&mut scratch).await?;
            if n == 0 {
                return Ok(());
            }
        }
    }

    async fn read_body(&mut self) -> io::Result<()> {
        let max_body = self.host.max_body;
        loop {
            let mut scratch = [0u8; BUFSIZE];
            let n = self.read(&mut scratch).await?;
            if n == 0 {
                break;
            }
            if self.body.len() + n > max_body as usize {
                // An oversize body compromises framing; close after responding
                self.close = true;
                self.error(413, "Request is too big").await?;
                return Ok(());
            }
            self.body.extend_from_slice(&scratch[..n]);
        }
        Ok(())
    }

    async fn process_body(&mut self) -> io::Result<()> {
        if self.json_body {
            match serde_json::from_slice::<serde_json::Value>(&self.body) {
                Ok(serde_json::Value::Object(map)) => self.vars = map,
                Ok(other) => {
                    self.vars.insert("value".to_string(), other);
                }
                Err(_) => {
                    self.error(400, "JSON body is malformed").await?;
                }
            }
        } else if self.form_body {
            let body = String::from_utf8_lossy(&self.body).into_owned();
            let vars = parse_encoded(&body);
            self.vars.extend(vars);
        }
        Ok(())
    }

    fn process_query(&mut self) {
        if let Some(query) = &self.query {
            self.qvars = parse_encoded(query);
        }
    }

    // ------------------------------------------------------------------
    // Response

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Define a response header, replacing any prior value.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.tx_headers.set(name, value);
    }

    /// Append a response header without replacing (e.g. `Set-Cookie`).
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.tx_headers.add(name, value);
    }

    pub fn set_content_type(&mut self, mime: &str) {
        self.mime = Some(mime.to_string());
    }

    pub fn set_content_length(&mut self, len: i64) {
        if len >= 0 {
            self.tx_len = len;
        }
    }

    fn add_standard_headers(&mut self) {
        let headers = self.host.headers.clone();
        for (name, value) in headers {
            self.tx_headers.set(name, value);
        }
    }

    /// Emit the status line and headers. Called implicitly by the first
    /// body write. With no known content length the response switches to
    /// chunked transfer and the blank line is merged into the first chunk
    /// prefix.
    pub async fn write_headers(&mut self) -> io::Result<()> {
        if self.creating_headers || self.wrote_headers {
            return Ok(());
        }
        self.creating_headers = true;
        let status = if self.status == 0 { 500 } else { self.status };

        self.tx_headers
            .set("Date", format_http_date(SystemTime::now()));
        self.tx_headers.set(
            "Connection",
            if self.close { "close" } else { "keep-alive" },
        );
        let body_suppressed = (100..200).contains(&status) || status == 204 || status == 304;
        if body_suppressed {
            // No content length or body for 1xx, 204 and 304
            self.tx_remaining = 0;
        } else if self.tx_len < 0 {
            self.tx_headers.set("Transfer-Encoding", "chunked");
        } else {
            self.tx_remaining = self.tx_len;
            self.tx_headers.set("Content-Length", self.tx_len.to_string());
        }
        if let Some(target) = &self.redirect_target {
            let target = target.clone();
            self.tx_headers.set("Location", target);
        }
        if self.mime.is_none() {
            if let Some(ext) = &self.ext {
                self.mime = mime_for_ext(&self.host.mime_table, ext).map(|s| s.to_string());
            }
        }
        if let Some(mime) = &self.mime {
            let mime = mime.clone();
            self.tx_headers.set("Content-Type", mime);
        }

        let protocol = if self.protocol.is_empty() {
            "HTTP/1.1"
        } else {
            &self.protocol
        };
        let mut out = BytesMut::with_capacity(256);
        out.extend_from_slice(
            format!("{} {} {}\r\n", protocol, status, status_text(status)).as_bytes(),
        );
        for (name, value) in self.tx_headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if self.tx_len >= 0 || body_suppressed {
            // Chunked responses delay this; it rides with the first chunk
            out.extend_from_slice(b"\r\n");
        }
        tracing::trace!(target: "web", conn = self.conn, status, "response headers");
        write_all_deadline(&mut self.stream, &out, self.deadline).await?;
        self.creating_headers = false;
        self.wrote_headers = true;
        if body_suppressed {
            self.complete = true;
        }
        Ok(())
    }

    /// Emit a chunk prefix before body data when using chunked transfer.
    /// A zero size emits the terminator and completes the response.
    async fn write_chunk_divider(&mut self, size: usize) -> io::Result<()> {
        if self.tx_len >= 0 || !self.wrote_headers {
            return Ok(());
        }
        let divider = if size == 0 {
            self.complete = true;
            "\r\n0\r\n\r\n".to_string()
        } else {
            format!("\r\n{:x}\r\n", size)
        };
        write_all_deadline(&mut self.stream, divider.as_bytes(), self.deadline).await
    }

    /// Write response body data. Headers go out first if they have not
    /// already. An empty write finalizes the response.
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.complete {
            if !buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "writing after response complete",
                ));
            }
            return Ok(0);
        }
        if !self.wrote_headers {
            self.write_headers().await?;
            if self.complete {
                return Ok(0);
            }
        }
        self.write_chunk_divider(buf.len()).await?;
        if !buf.is_empty() {
            write_all_deadline(&mut self.stream, buf, self.deadline).await?;
            if self.tx_remaining != UNLIMITED {
                self.tx_remaining -= buf.len() as i64;
            }
        }
        if self.tx_remaining <= 0 {
            self.complete = true;
        }
        self.update_deadline();
        Ok(buf.len())
    }

    /// Write a string body fragment.
    pub async fn write_text(&mut self, text: &str) -> io::Result<usize> {
        self.write(text.as_bytes()).await
    }

    /// Serialize a JSON value as the response body.
    pub async fn write_json(&mut self, value: &serde_json::Value) -> io::Result<usize> {
        let text = value.to_string();
        self.write(text.as_bytes()).await
    }

    /// Finish the response: flushes the chunked trailer when needed.
    pub async fn finalize(&mut self) -> io::Result<()> {
        self.write(&[]).await.map(|_| ())
    }

    /// Write one Server-Sent Event frame. The response must already carry
    /// `Content-Type: text/event-stream`.
    pub async fn write_sse_event(
        &mut self,
        id: Option<u64>,
        event: Option<&str>,
        data: &str,
    ) -> io::Result<()> {
        let mut frame = String::new();
        if let Some(id) = id {
            frame.push_str(&format!("id: {}\n", id));
        }
        if let Some(event) = event {
            frame.push_str(&format!("event: {}\n", event));
        }
        for line in data.split('\n') {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        self.write(frame.as_bytes()).await.map(|_| ())
    }

    /// Emit a single complete response with a text body and finalize.
    pub async fn write_response(&mut self, status: u16, message: &str) -> io::Result<()> {
        if self.stream.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        let message = match &self.error_msg {
            Some(m) => m.clone(),
            None => message.to_string(),
        };
        self.tx_len = message.len() as i64;
        if status != 0 {
            self.status = status;
        }
        if self.mime.is_none() {
            self.mime = Some("text/plain".to_string());
        }
        self.write_headers().await?;
        if self.status != 204 && self.method != "HEAD" && !message.is_empty() && !self.complete {
            self.write(message.as_bytes()).await?;
        }
        self.finalize().await?;
        if !matches!(self.status, 200 | 204 | 301 | 302 | 401) {
            tracing::debug!(target: "web", conn = self.conn, status = self.status, message = %message, "response");
        }
        Ok(())
    }

    /// Redirect to `target`, which may be relative; missing URL components
    /// come from the current request. Default ports are elided.
    pub async fn redirect(&mut self, status: u16, target: &str) -> io::Result<()> {
        let parsed = match ParsedUrl::parse(target) {
            Some(p) => p,
            None => {
                return self.write_response(404, "Cannot parse redirection target").await;
            }
        };
        let scheme = parsed
            .scheme
            .clone()
            .unwrap_or_else(|| self.scheme().to_string());
        let host = match parsed.host.clone() {
            Some(h) => h,
            None => {
                let name = self.host_name();
                match name.split_once(':') {
                    Some((h, _)) => h.to_string(),
                    None => name,
                }
            }
        };
        let mut port = parsed.port;
        if port == 0 && parsed.host.is_none() && parsed.scheme.as_deref() == Some(self.scheme()) {
            // Keep the current port when the scheme is unchanged
            if let Some(addr) = self.local_addr {
                port = addr.port();
            }
        } else if port == 0 && parsed.scheme.is_none() && parsed.host.is_none() {
            if let Some(addr) = self.local_addr {
                port = addr.port();
            }
        }
        let (path, query, hash) = if let Some(p) = parsed.path.clone() {
            (p, parsed.query.clone(), parsed.hash.clone())
        } else {
            // Keep the current path, query and hash
            (
                self.path.trim_start_matches('/').to_string(),
                parsed.query.clone().or_else(|| self.query.clone()),
                parsed.hash.clone().or_else(|| self.hash.clone()),
            )
        };
        if (port == 80 && scheme == "http") || (port == 443 && scheme == "https") {
            port = 0;
        }
        let mut uri = format!("{}://{}", scheme, host);
        if port != 0 {
            uri.push_str(&format!(":{}", port));
        }
        uri.push('/');
        uri.push_str(&path);
        if let Some(q) = query {
            uri.push('?');
            uri.push_str(&q);
        }
        if let Some(h) = hash {
            uri.push('#');
            uri.push_str(&h);
        }
        self.redirect_target = Some(encode_uri(&uri));
        self.write_response(status, "").await
    }

    /// Issue an error response. The connection stays usable for further
    /// requests; status zero forces a close after the response attempt.
    pub async fn error(&mut self, status: u16, message: &str) -> io::Result<()> {
        if self.error_msg.is_none() {
            self.error_msg = Some(message.to_string());
        }
        self.write_response(status, message).await?;
        if status == 0 {
            self.close = true;
        }
        self.run_hook(HookEvent::Error).await;
        Ok(())
    }

    /// A connection-compromising failure: no response is sent, the socket
    /// closes. Returns the error for the caller to propagate.
    pub async fn net_error(&mut self, message: &str) -> io::Error {
        if self.error_msg.is_none() {
            self.error_msg = Some(message.to_string());
            tracing::trace!(target: "web", conn = self.conn, message, "network error");
        }
        self.status = 550;
        self.close = true;
        self.complete = true;
        let _ = self.stream.take();
        self.run_hook(HookEvent::Error).await;
        io::Error::new(io::ErrorKind::InvalidData, message.to_string())
    }

    /// The error message recorded by the first failure, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    // ------------------------------------------------------------------
    // Deadlines

    /// Bump the deadline after I/O progress: the inactivity timeout,
    /// clamped by the total request timeout.
    pub fn update_deadline(&mut self) {
        let inactivity = self
            .host
            .inactivity_timeout
            .map(|t| Instant::now() + t);
        let request = self.host.request_timeout.map(|t| self.started + t);
        self.deadline = match (inactivity, request) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
    }

    /// Extend the deadline for a long-running handler.
    pub fn extend_timeout(&mut self, extra: std::time::Duration) {
        self.deadline = Some(Instant::now() + extra);
    }

    // ------------------------------------------------------------------
    // WebSocket upgrade

    /// True when the request asks for a WebSocket upgrade.
    pub fn is_websocket_request(&self) -> bool {
        let upgrade = self
            .headers
            .get("Upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        let connection = self
            .headers
            .get("Connection")
            .map(|v| v.to_ascii_lowercase().contains("upgrade"))
            .unwrap_or(false);
        upgrade && connection && self.headers.get("Sec-WebSocket-Key").is_some()
    }

    /// Complete the WebSocket handshake and hand the socket to the frame
    /// engine. The HTTP connection is finished afterwards.
    pub async fn upgrade_web_socket(&mut self) -> io::Result<WebSockets> {
        if !self.is_websocket_request() {
            self.error(400, "Not a WebSocket request").await?;
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not an upgrade"));
        }
        match self.headers.get("Sec-WebSocket-Version") {
            Some(v) if v.trim() == handshake::WS_VERSION => {}
            _ => {
                self.error(400, "Unsupported WebSocket version").await?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, "bad ws version"));
            }
        }
        let key = self
            .headers
            .get("Sec-WebSocket-Key")
            .unwrap_or_default()
            .trim()
            .to_string();
        // Accept the first offered subprotocol, if any
        let protocol = self
            .headers
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.split(',').next())
            .map(|p| p.trim().to_string());

        let response = handshake::build_server_response(&key, protocol.as_deref());
        write_all_deadline(&mut self.stream, response.as_bytes(), self.deadline).await?;
        tracing::debug!(target: "web", conn = self.conn, "upgraded to websocket");

        self.wrote_headers = true;
        self.complete = true;
        self.close = true;
        let stream = self.stream.take();
        let rx = std::mem::take(&mut self.rx);
        let mut ws = WebSockets::new(stream, rx, false);
        ws.set_client_key(key);
        ws.set_protocol(protocol);
        Ok(ws)
    }

    // ------------------------------------------------------------------

    pub(crate) async fn run_hook(&mut self, event: HookEvent) {
        let hook = self.host.hook.read().unwrap().clone();
        if let Some(hook) = hook {
            hook(self, event).await;
        }
    }
}

/// Parse `key[=value]` pairs separated by `&`, percent-decoding both sides.
fn parse_encoded(text: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        };
        map.insert(key, serde_json::Value::String(value));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_pairs() {
        let map = parse_encoded("a=1&b=hello+world&c&d=%41");
        assert_eq!(map.get("a").unwrap(), "1");
        assert_eq!(map.get("b").unwrap(), "hello world");
        assert_eq!(map.get("c").unwrap(), "");
        assert_eq!(map.get("d").unwrap(), "A");
    }
}
