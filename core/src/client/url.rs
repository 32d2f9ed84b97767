/*
 * url.rs
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

//! URL client: the server parser's dual. One `Url` owns one socket and
//! reuses it across requests to the same origin; bodies travel through the
//! same Content-Length/chunked pipeline the server uses. Connection-level
//! failures retry; anything after a status line does not. Non-OK statuses
//! surface through `status`, not the error channel.

use std::path::Path;
use std::time::Duration;

use bytes::BytesMut;
use tokio::time::Instant;

use crate::codec::url::ParsedUrl;
use crate::error::{Result, WebError};
use crate::http::body::{BodyState, ChunkState, UNLIMITED};
use crate::http::buffer::{buffer_until, find_pattern, BUFSIZE};
use crate::http::headers::HeaderBlock;
use crate::net::{connect, write_all_deadline, NetStream};
use crate::ws::{handshake, WebSockets};

/// Default whole-request timeout.
pub const URL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection-level retries.
pub const URL_RETRIES: u32 = 2;
/// Response header size cap.
const MAX_RESPONSE_HEADER: usize = 64 * 1024;

/// HTTP/1.1 client request context, reusable across requests.
pub struct Url {
    stream: NetStream,
    rx: BytesMut,
    response: BytesMut,

    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Request path without its leading slash.
    pub path: String,
    pub query: Option<String>,
    pub hash: Option<String>,
    pub method: String,

    pub status: u16,
    rx_len: i64,
    body: BodyState,
    rx_headers: Option<HeaderBlock>,
    /// `Location` of a redirect response.
    pub redirect: Option<String>,
    close: bool,
    http10: bool,

    tx_len: i64,
    wrote_headers: bool,
    boundary: Option<String>,

    retries: u32,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    error: Option<String>,
    got_response: bool,
}

impl Url {
    pub fn new() -> Self {
        Self {
            stream: NetStream::Closed,
            rx: BytesMut::with_capacity(BUFSIZE),
            response: BytesMut::new(),
            scheme: String::new(),
            host: String::new(),
            port: 0,
            path: String::new(),
            query: None,
            hash: None,
            method: String::new(),
            status: 0,
            rx_len: -1,
            body: BodyState::new(),
            rx_headers: None,
            redirect: None,
            close: false,
            http10: false,
            tx_len: -1,
            wrote_headers: false,
            boundary: None,
            retries: URL_RETRIES,
            timeout: Some(URL_TIMEOUT),
            deadline: None,
            error: None,
            got_response: false,
        }
    }

    /// Whole-request timeout; `None` means no deadline.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    /// Speak HTTP/1.0: no keep-alive, connection closes per request.
    pub fn set_http10(&mut self, http10: bool) {
        self.http10 = http10;
        if http10 {
            self.close = true;
        }
    }

    /// Drop the connection.
    pub fn close(&mut self) {
        let _ = self.stream.take();
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// A response header value, case-insensitive. Valid after the response
    /// headers arrive.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.rx_headers.as_ref().and_then(|h| h.get(name))
    }

    // ------------------------------------------------------------------
    // Request

    /// Begin a request: parse the URL, reuse or open the connection, and
    /// record the body length (`-1` selects chunked transfer).
    pub async fn start(&mut self, method: &str, uri: &str, tx_len: i64) -> Result<()> {
        self.deadline = self.timeout.map(|t| Instant::now() + t);
        self.reset_request();
        self.connect_host(uri).await?;
        self.method = method.to_ascii_uppercase();
        if tx_len >= 0 {
            self.tx_len = tx_len;
        }
        Ok(())
    }

    fn reset_request(&mut self) {
        // A connection with unread response data cannot be reused
        if !self.stream.is_closed() && (!self.body.is_complete() || self.close) {
            let _ = self.stream.take();
        }
        self.method.clear();
        self.status = 0;
        self.rx_len = -1;
        self.body = BodyState::new();
        self.rx_headers = None;
        self.redirect = None;
        self.close = self.http10;
        self.tx_len = -1;
        self.wrote_headers = false;
        self.boundary = None;
        self.error = None;
        self.got_response = false;
        self.rx.clear();
        self.response.clear();
    }

    /// Parse the URI and connect, reusing the socket when the scheme, host
    /// and port are unchanged and it is still open.
    async fn connect_host(&mut self, uri: &str) -> Result<()> {
        let parsed = ParsedUrl::parse(uri)
            .ok_or_else(|| self.fail(WebError::BadUrl(format!("bad URL: {}", uri))))?;
        let scheme = parsed.scheme.clone().unwrap_or_else(|| "http".to_string());
        let host = parsed
            .host
            .clone()
            .ok_or_else(|| self.fail(WebError::BadUrl(format!("URL has no host: {}", uri))))?;
        let port = parsed.effective_port();

        let same_origin = scheme == self.scheme && host == self.host && port == self.port;
        if !same_origin || self.stream.is_closed() {
            let _ = self.stream.take();
            let secure = scheme == "https";
            self.stream = connect(&host, port, secure, self.deadline)
                .await
                .map_err(|e| self.fail(WebError::CantConnect(e.to_string())))?;
        }
        self.scheme = scheme;
        self.host = host;
        self.port = port;
        self.path = parsed.path.unwrap_or_default();
        self.query = parsed.query;
        self.hash = parsed.hash;
        Ok(())
    }

    /// Emit the request line and headers. `headers` is raw header text,
    /// each line `Name: value\r\n`. Host and body framing headers are added
    /// unless already present. With chunked framing the blank line is
    /// merged into the first chunk prefix.
    pub async fn write_headers(&mut self, headers: Option<&str>) -> Result<()> {
        let protocol = if self.http10 { "HTTP/1.0" } else { "HTTP/1.1" };
        let mut out = String::with_capacity(256);
        out.push_str(&self.method);
        out.push_str(" /");
        out.push_str(&self.path);
        if let Some(q) = &self.query {
            out.push('?');
            out.push_str(q);
        }
        if let Some(h) = &self.hash {
            out.push('#');
            out.push_str(h);
        }
        out.push(' ');
        out.push_str(protocol);
        out.push_str("\r\n");

        let extra = headers.unwrap_or("");
        out.push_str(extra);
        let extra_lower = extra.to_ascii_lowercase();

        if !extra_lower.contains("host:") {
            if self.port != 80 && self.port != 443 {
                out.push_str(&format!("Host: {}:{}\r\n", self.host, self.port));
            } else {
                out.push_str(&format!("Host: {}\r\n", self.host));
            }
        }
        if let Some(boundary) = &self.boundary {
            out.push_str(&format!(
                "Content-Type: multipart/form-data; boundary={}\r\n",
                &boundary[2..]
            ));
        } else if !extra_lower.contains("content-length:")
            && !extra_lower.contains("transfer-encoding:")
        {
            if self.tx_len >= 0 {
                if self.tx_len > 0 || self.method != "GET" {
                    out.push_str(&format!("Content-Length: {}\r\n", self.tx_len));
                }
            } else {
                out.push_str("Transfer-Encoding: chunked\r\n");
            }
        }
        if self.tx_len >= 0 || self.boundary.is_some() {
            // Chunked requests delay this; it rides with the first chunk
            out.push_str("\r\n");
        }
        write_all_deadline(&mut self.stream, out.as_bytes(), self.deadline)
            .await
            .map_err(|e| self.fail_io("cannot send request", e))?;
        self.wrote_headers = true;
        Ok(())
    }

    async fn write_chunk_divider(&mut self, size: usize) -> Result<()> {
        if self.tx_len >= 0 || self.boundary.is_some() {
            return Ok(());
        }
        let divider = if size == 0 {
            "\r\n0\r\n\r\n".to_string()
        } else {
            format!("\r\n{:x}\r\n", size)
        };
        write_all_deadline(&mut self.stream, divider.as_bytes(), self.deadline)
            .await
            .map_err(|e| self.fail_io("cannot write to socket", e))?;
        Ok(())
    }

    /// Write request body data. An empty write ends the body; the response
    /// headers are read once the last body byte is out.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.wrote_headers {
            self.write_headers(None).await?;
        }
        self.write_chunk_divider(buf.len()).await?;
        if !buf.is_empty() {
            write_all_deadline(&mut self.stream, buf, self.deadline)
                .await
                .map_err(|e| self.fail_io("cannot write to socket", e))?;
        }
        if buf.is_empty() || buf.len() as i64 == self.tx_len {
            if self.rx_headers.is_none() {
                self.read_response_headers().await?;
            }
        }
        if self.close && self.body.is_complete() {
            let _ = self.stream.take();
        }
        Ok(buf.len())
    }

    /// End the request body (chunked terminator or flush) and read the
    /// response status and headers.
    pub async fn finalize(&mut self) -> Result<()> {
        self.write(&[]).await.map(|_| ())
    }

    /// Stream a file as the request body.
    pub async fn write_file(&mut self, path: &Path) -> Result<()> {
        use tokio::io::AsyncReadExt;
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| self.fail(WebError::Io(e)))?;
        let mut buf = [0u8; BUFSIZE];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| self.fail(WebError::Io(e)))?;
            if n == 0 {
                return Ok(());
            }
            self.write(&buf[..n]).await?;
        }
    }

    // ------------------------------------------------------------------
    // Response

    async fn read_response_headers(&mut self) -> Result<()> {
        let size = buffer_until(
            &mut self.stream,
            &mut self.rx,
            b"\r\n\r\n",
            MAX_RESPONSE_HEADER,
            false,
            self.deadline,
        )
        .await
        .map_err(|e| self.fail_io("cannot read response", e))?;
        if size <= 10 {
            return Err(self.fail(WebError::BadResponse("bad response header".into())));
        }
        let head = self.rx.split_to(size);
        let line_end = find_pattern(&head, b"\r\n")
            .ok_or_else(|| self.fail(WebError::BadResponse("bad response line".into())))?;
        let line = std::str::from_utf8(&head[..line_end])
            .map_err(|_| self.fail(WebError::BadResponse("bad response line".into())))?;
        // HTTP/1.1 200 OK
        let mut tokens = line.splitn(3, ' ');
        let _protocol = tokens.next().unwrap_or("");
        self.status = tokens
            .next()
            .and_then(|s| s.trim().parse::<u16>().ok())
            .ok_or_else(|| self.fail(WebError::BadResponse("bad response status".into())))?;

        let headers = HeaderBlock::parse(&head[line_end + 2..size - 2])
            .map_err(|_| self.fail(WebError::BadResponse("bad response headers".into())))?;

        let mut chunked = false;
        for (name, value) in headers.iter() {
            match name.to_ascii_lowercase().as_str() {
                "content-length" => {
                    self.rx_len = value.trim().parse::<i64>().unwrap_or(-1);
                }
                "connection" => {
                    if value.eq_ignore_ascii_case("close") {
                        self.close = true;
                    }
                }
                "location" => {
                    self.redirect = Some(value.to_string());
                }
                "transfer-encoding" => {
                    if value.to_ascii_lowercase().contains("chunked") {
                        chunked = true;
                    }
                }
                _ => {}
            }
        }
        self.rx_headers = Some(headers);

        if self.status == 204
            || self.status == 304
            || self.method == "HEAD"
            || self.redirect.is_some()
        {
            self.body.set_framing(0, false);
        } else {
            self.body.set_framing(self.rx_len, chunked);
        }
        Ok(())
    }

    /// Read response body bytes through the shared framing pipeline. Zero
    /// at the end of the body.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.got_response {
            return Err(self.fail(WebError::BadResponse(
                "read after response buffered".into(),
            )));
        }
        if self.rx_headers.is_none() {
            self.read_response_headers().await?;
        }
        if self.body.is_complete() && self.rx.is_empty() {
            return Ok(0);
        }
        match self
            .body
            .read(&mut self.stream, &mut self.rx, buf, self.deadline)
            .await
        {
            Ok(n) => Ok(n),
            Err(e) => {
                let bounded = self.body.chunked != ChunkState::None
                    || (self.body.remaining > 0 && self.body.remaining != UNLIMITED);
                if bounded {
                    Err(self.fail_io("cannot read from socket", e))
                } else {
                    // Read-until-close: EOF ends the body
                    self.close = true;
                    self.body.remaining = 0;
                    Ok(0)
                }
            }
        }
    }

    /// Buffer the remaining response body and return it as text.
    pub async fn get_response(&mut self) -> Result<String> {
        if !self.got_response {
            let mut buf = [0u8; BUFSIZE];
            loop {
                let n = self.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                self.response.extend_from_slice(&buf[..n]);
            }
            self.got_response = true;
            if self.close {
                let _ = self.stream.take();
            }
        }
        Ok(String::from_utf8_lossy(&self.response).into_owned())
    }

    /// Parse the response body as JSON.
    pub async fn get_json_response(&mut self) -> Result<serde_json::Value> {
        let text = self.get_response().await?;
        serde_json::from_str(&text)
            .map_err(|e| self.fail(WebError::BadResponse(format!("bad JSON response: {}", e))))
    }

    // ------------------------------------------------------------------
    // Convenience wrappers

    /// Issue a whole request and return the response status. Connection
    /// failures retry up to the configured count; failures after a status
    /// line never retry.
    pub async fn fetch(
        &mut self,
        method: &str,
        uri: &str,
        data: &[u8],
        headers: Option<&str>,
    ) -> Result<u16> {
        let mut tries = self.retries + 1;
        loop {
            tries -= 1;
            match self.fetch_once(method, uri, data, headers).await {
                Ok(status) => return Ok(status),
                Err(e) if tries > 0 && self.status == 0 => {
                    tracing::trace!(target: "url", host = %self.host, error = %e, "retrying request");
                    self.close();
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(
        &mut self,
        method: &str,
        uri: &str,
        data: &[u8],
        headers: Option<&str>,
    ) -> Result<u16> {
        self.start(method, uri, data.len() as i64).await?;
        self.write_headers(headers).await?;
        self.write(data).await?;
        Ok(self.status)
    }

    /// One-shot GET; the body on a 200, an error otherwise.
    pub async fn get(uri: &str, headers: Option<&str>) -> Result<String> {
        let mut url = Url::new();
        let status = url.fetch("GET", uri, b"", headers).await?;
        let body = url.get_response().await?;
        if status != 200 {
            return Err(WebError::BadResponse(format!("status {}", status)));
        }
        Ok(body)
    }

    /// One-shot POST.
    pub async fn post(uri: &str, data: &[u8], headers: Option<&str>) -> Result<String> {
        let mut url = Url::new();
        let status = url.fetch("POST", uri, data, headers).await?;
        let body = url.get_response().await?;
        if status != 200 {
            return Err(WebError::BadResponse(format!("status {}", status)));
        }
        Ok(body)
    }

    /// One-shot GET returning parsed JSON.
    pub async fn get_json(uri: &str, headers: Option<&str>) -> Result<serde_json::Value> {
        let mut url = Url::new();
        url.fetch("GET", uri, b"", headers).await?;
        url.get_json_response().await
    }

    /// One-shot POST returning parsed JSON.
    pub async fn post_json(
        uri: &str,
        data: &[u8],
        headers: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut url = Url::new();
        url.fetch("POST", uri, data, headers).await?;
        url.get_json_response().await
    }

    /// Issue a request and parse the response as JSON.
    pub async fn json(
        &mut self,
        method: &str,
        uri: &str,
        data: &[u8],
        headers: Option<&str>,
    ) -> Result<serde_json::Value> {
        self.fetch(method, uri, data, headers).await?;
        self.get_json_response().await
    }

    // ------------------------------------------------------------------
    // Multipart upload

    /// Send a multipart/form-data request: form fields first, then the
    /// given files streamed from disk. Call after `start(method, uri, -1)`.
    pub async fn upload(
        &mut self,
        files: &[&Path],
        forms: &[(&str, &str)],
        headers: Option<&str>,
    ) -> Result<u16> {
        let boundary = match &self.boundary {
            Some(b) => b.clone(),
            None => {
                let b = format!("--BOUNDARY--{:016x}", rand::random::<u64>());
                self.boundary = Some(b.clone());
                b
            }
        };
        self.write_headers(headers).await?;

        for (name, value) in forms {
            let part = format!(
                "{}\r\nContent-Disposition: form-data; name=\"{}\";\r\n\
                 Content-Type: application/x-www-form-urlencoded\r\n\r\n{}\r\n",
                boundary, name, value
            );
            self.write(part.as_bytes()).await?;
        }
        for (index, path) in files.iter().enumerate() {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| self.fail(WebError::BadUrl(format!("bad path: {:?}", path))))?
                .to_string();
            let head = format!(
                "{}\r\nContent-Disposition: form-data; name=\"file{}\"; filename=\"{}\"\r\n\r\n",
                boundary, index, name
            );
            self.write(head.as_bytes()).await?;
            self.write_file(path).await?;
            self.write(b"\r\n").await?;
        }
        let terminator = format!("{}--\r\n", boundary);
        self.write(terminator.as_bytes()).await?;
        self.finalize().await?;
        Ok(self.status)
    }

    // ------------------------------------------------------------------
    // WebSocket

    /// Upgrade to WebSocket: handshake on a fresh request, verify the
    /// accept key, and hand the socket to the frame engine (client mode,
    /// frames masked with per-frame random keys).
    pub async fn web_socket(&mut self, uri: &str, protocol: Option<&str>) -> Result<WebSockets> {
        // Map ws/wss onto the HTTP connect path
        let http_uri = uri
            .replacen("ws://", "http://", 1)
            .replacen("wss://", "https://", 1);
        self.start("GET", &http_uri, 0).await?;

        let key = handshake::make_client_key().map_err(|e| self.fail(WebError::Io(e)))?;
        let mut path = format!("/{}", self.path);
        if let Some(q) = &self.query {
            path.push('?');
            path.push_str(q);
        }
        let request =
            handshake::build_client_request(&self.host, self.port, &path, &key, protocol);
        write_all_deadline(&mut self.stream, request.as_bytes(), self.deadline)
            .await
            .map_err(|e| self.fail_io("cannot send handshake", e))?;
        self.wrote_headers = true;
        self.read_response_headers().await?;
        if self.status != 101 {
            return Err(self.fail(WebError::BadResponse(format!(
                "expected 101 Switching Protocols, got {}",
                self.status
            ))));
        }
        let accept = self.response_header("Sec-WebSocket-Accept").map(str::to_string);
        handshake::verify_accept(accept.as_deref(), &key)
            .map_err(|e| self.fail(WebError::BadResponse(e.to_string())))?;
        let selected = self
            .response_header("Sec-WebSocket-Protocol")
            .map(str::to_string);

        let stream = self.stream.take();
        let rx = std::mem::take(&mut self.rx);
        let mut ws = WebSockets::new(stream, rx, true);
        ws.set_client_key(key);
        ws.set_protocol(selected);
        Ok(ws)
    }

    // ------------------------------------------------------------------

    /// Record the first error and drop the connection, like the server's
    /// net-error path.
    fn fail(&mut self, error: WebError) -> WebError {
        if self.error.is_none() {
            self.error = Some(error.to_string());
            tracing::trace!(target: "url", host = %self.host, port = self.port, error = %self.error.as_deref().unwrap_or(""), "request failed");
        }
        let _ = self.stream.take();
        error
    }

    fn fail_io(&mut self, context: &str, error: std::io::Error) -> WebError {
        if error.kind() == std::io::ErrorKind::TimedOut {
            self.fail(WebError::Timeout(format!("{}: {}", context, error)))
        } else {
            self.fail(WebError::Io(std::io::Error::new(
                error.kind(),
                format!("{}: {}", context, error),
            )))
        }
    }
}

impl Default for Url {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_parses_url() {
        let mut url = Url::new();
        // Connection will fail fast; the parse happens first
        let result = url
            .start("get", "http://127.0.0.1:1/index.html?query=true#frag", 0)
            .await;
        assert!(result.is_err());
        assert_eq!(url.scheme, "");
        // Parse errors are distinguishable from connect errors
        let result = url.start("GET", "no-host-at-all", 0).await;
        assert!(matches!(result, Err(WebError::BadUrl(_))));
    }

    #[test]
    fn reset_preserves_origin() {
        let mut url = Url::new();
        url.scheme = "http".to_string();
        url.host = "example.com".to_string();
        url.port = 80;
        url.status = 200;
        url.reset_request();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.status, 0);
    }
}
