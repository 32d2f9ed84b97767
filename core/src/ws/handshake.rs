/*
 * handshake.rs
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

//! WebSocket opening handshake (RFC 6455 §4): accept-key derivation, the
//! client upgrade request and the server 101 response.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::io;

/// Magic GUID appended to the client key before hashing (RFC 6455 §4.2.2).
const WS_ACCEPT_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// WebSocket protocol version this engine speaks.
pub const WS_VERSION: &str = "13";

/// Compute `Sec-WebSocket-Accept` from the base64 client key:
/// base64(SHA1(key + MAGIC)).
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_ACCEPT_MAGIC);
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh base64 client key from 16 random bytes.
pub fn make_client_key() -> io::Result<String> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(BASE64.encode(raw))
}

/// Build the client upgrade request.
pub fn build_client_request(
    host: &str,
    port: u16,
    path: &str,
    key: &str,
    protocol: Option<&str>,
) -> String {
    let host_header = if port == 80 || port == 443 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    let mut req = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\nSec-WebSocket-Version: {}\r\n",
        path, host_header, key, WS_VERSION
    );
    if let Some(p) = protocol {
        req.push_str("Sec-WebSocket-Protocol: ");
        req.push_str(p);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    req
}

/// Build the server `101 Switching Protocols` response for a validated
/// upgrade request.
pub fn build_server_response(client_key: &str, protocol: Option<&str>) -> String {
    let mut resp = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        accept_key(client_key)
    );
    if let Some(p) = protocol {
        resp.push_str("Sec-WebSocket-Protocol: ");
        resp.push_str(p);
        resp.push_str("\r\n");
    }
    resp.push_str("\r\n");
    resp
}

/// Verify the server's `Sec-WebSocket-Accept` against the key we sent.
pub fn verify_accept(accept_header: Option<&str>, client_key: &str) -> io::Result<()> {
    let expected = accept_key(client_key);
    match accept_header {
        Some(h) if h.trim() == expected => Ok(()),
        Some(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Sec-WebSocket-Accept mismatch",
        )),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Sec-WebSocket-Accept",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_6455_example_key() {
        // Worked example from RFC 6455 §1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn verify_matches() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert!(verify_accept(Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), key).is_ok());
        assert!(verify_accept(Some("bogus"), key).is_err());
        assert!(verify_accept(None, key).is_err());
    }

    #[test]
    fn request_and_response_shape() {
        let req = build_client_request("example.com", 8080, "/chat", "KEY", Some("chat"));
        assert!(req.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.com:8080\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.contains("Sec-WebSocket-Protocol: chat\r\n"));
        assert!(req.ends_with("\r\n\r\n"));

        let resp = build_server_response("KEY", None);
        assert!(resp.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(resp.contains("Upgrade: websocket\r\n"));
        assert!(resp.ends_with("\r\n\r\n"));
    }
}
