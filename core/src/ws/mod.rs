/*
 * mod.rs
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

//! WebSocket message engine (RFC 6455, version 13). Owns a socket after a
//! successful upgrade and drives framing for either side: the server Web
//! engine hands its connection here on upgrade, the URL client after its
//! handshake. Handles fragmentation, control frames, UTF-8 validation,
//! ping/pong and the close handshake; the application sees open, message,
//! partial-message, error and close events through `WsHandler`.

pub mod frame;
pub mod handshake;

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::time::Instant;

use crate::http::buffer::fill_some;
use crate::net::{write_all_deadline, NetStream};
use self::frame::{
    decode_frame, encode_frame, Frame, MAX_CONTROL_PAYLOAD, OP_BINARY, OP_CLOSE, OP_CONTINUATION,
    OP_PING, OP_PONG, OP_TEXT,
};

/// Maximum frame payload accepted or sent in one frame.
pub const WS_MAX_FRAME: usize = 131072;
/// Maximum accumulated message size.
pub const WS_MAX_MESSAGE: usize = 1024 * 1024;

pub const WS_STATUS_OK: u16 = 1000;
pub const WS_STATUS_GOING_AWAY: u16 = 1001;
pub const WS_STATUS_PROTOCOL_ERROR: u16 = 1002;
pub const WS_STATUS_UNSUPPORTED_TYPE: u16 = 1003;
pub const WS_STATUS_NO_STATUS: u16 = 1005;
pub const WS_STATUS_COMMS_ERROR: u16 = 1006;
pub const WS_STATUS_INVALID_UTF8: u16 = 1007;
pub const WS_STATUS_POLICY_VIOLATION: u16 = 1008;
pub const WS_STATUS_MESSAGE_TOO_LARGE: u16 = 1009;
pub const WS_STATUS_INTERNAL_ERROR: u16 = 1011;
pub const WS_STATUS_TLS_ERROR: u16 = 1015;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// Application callback for WebSocket events. Defaults are no-ops so
/// handlers implement only what they need.
pub trait WsHandler: Send {
    /// The connection entered the open state.
    fn open(&mut self) {}

    /// A complete message (or the final fragment of one).
    fn message(&mut self, kind: MessageKind, data: &[u8]) {
        let _ = (kind, data);
    }

    /// A non-final fragment, delivered as it arrives.
    fn partial_message(&mut self, kind: MessageKind, data: &[u8]) {
        let _ = (kind, data);
    }

    /// Protocol or transport failure; a close follows.
    fn error(&mut self, message: &str) {
        let _ = message;
    }

    /// Close handshake finished or the connection died. Status 1005 means
    /// the peer sent no status; 1006 a transport failure.
    fn closed(&mut self, status: u16, reason: &str) {
        let _ = (status, reason);
    }

    /// Return true to leave the run loop after the current event.
    fn should_stop(&self) -> bool {
        false
    }
}

/// A WebSocket connection after a completed handshake.
pub struct WebSockets {
    stream: NetStream,
    rx: BytesMut,
    client: bool,
    state: WsState,
    max_frame: usize,
    max_message: usize,
    validate_utf8: bool,
    ping_period: Option<Duration>,

    message: BytesMut,
    message_opcode: u8,
    utf8: Utf8Acc,
    send_continuation: bool,

    close_sent: bool,
    orderly_closed: bool,
    close_status: u16,
    close_reason: String,

    protocol: Option<String>,
    client_key: Option<String>,
}

impl WebSockets {
    /// Wrap a stream that has already completed the HTTP upgrade. `client`
    /// selects the masking direction. `rx` carries any bytes over-read
    /// during the handshake.
    pub fn new(stream: NetStream, rx: BytesMut, client: bool) -> Self {
        Self {
            stream,
            rx,
            client,
            state: WsState::Connecting,
            max_frame: WS_MAX_FRAME,
            max_message: WS_MAX_MESSAGE,
            validate_utf8: true,
            ping_period: None,
            message: BytesMut::new(),
            message_opcode: 0,
            utf8: Utf8Acc::default(),
            send_continuation: false,
            close_sent: false,
            orderly_closed: false,
            close_status: WS_STATUS_NO_STATUS,
            close_reason: String::new(),
            protocol: None,
            client_key: None,
        }
    }

    /// Set the per-frame and per-message limits. Zero keeps the default.
    pub fn set_limits(&mut self, max_frame: usize, max_message: usize) {
        if max_frame > 0 {
            self.max_frame = max_frame;
        }
        if max_message > 0 {
            self.max_message = max_message;
        }
    }

    /// Emit pings on this period; a ping without a pong before the next
    /// tick closes the connection with status 1006.
    pub fn set_ping_period(&mut self, period: Duration) {
        self.ping_period = if period.is_zero() { None } else { Some(period) };
    }

    pub fn set_validate_utf8(&mut self, validate: bool) {
        self.validate_utf8 = validate;
    }

    pub fn set_protocol(&mut self, protocol: Option<String>) {
        self.protocol = protocol;
    }

    /// Negotiated subprotocol, when one was selected.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub(crate) fn set_client_key(&mut self, key: String) {
        self.client_key = Some(key);
    }

    /// The base64 key the client sent in `Sec-WebSocket-Key`.
    pub fn client_key(&self) -> Option<&str> {
        self.client_key.as_deref()
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    /// True when the peer completed the close handshake (vs a dead socket).
    pub fn orderly_closed(&self) -> bool {
        self.orderly_closed
    }

    pub fn close_status(&self) -> u16 {
        self.close_status
    }

    pub fn close_reason(&self) -> &str {
        &self.close_reason
    }

    /// Drive the connection: decode frames and dispatch events until the
    /// close handshake completes, the handler asks to stop, or the
    /// transport fails.
    pub async fn run(&mut self, handler: &mut dyn WsHandler) -> io::Result<()> {
        if self.state == WsState::Connecting {
            self.state = WsState::Open;
            handler.open();
        }
        let mut next_ping = self.ping_period.map(|p| Instant::now() + p);
        let mut awaiting_pong = false;

        loop {
            // Drain every complete frame already buffered
            loop {
                let frame = match decode_frame(&mut self.rx, !self.client, self.max_frame) {
                    Ok(f) => f,
                    Err(e) => {
                        let status = if e.kind() == io::ErrorKind::InvalidData {
                            if e.to_string().contains("maximum size") {
                                WS_STATUS_MESSAGE_TOO_LARGE
                            } else {
                                WS_STATUS_PROTOCOL_ERROR
                            }
                        } else {
                            WS_STATUS_COMMS_ERROR
                        };
                        return self.fail(status, &e.to_string(), handler).await;
                    }
                };
                let Some(frame) = frame else { break };
                if frame.opcode == OP_PONG {
                    awaiting_pong = false;
                }
                match self.handle_frame(frame, handler).await {
                    Ok(()) => {}
                    Err(HandleError::Protocol(status, msg)) => {
                        return self.fail(status, &msg, handler).await;
                    }
                    Err(HandleError::Io(e)) => {
                        self.transport_failed(handler);
                        return Err(e);
                    }
                }
                if self.state == WsState::Closed {
                    return Ok(());
                }
                if handler.should_stop() {
                    return Ok(());
                }
            }
            if handler.should_stop() {
                return Ok(());
            }

            // Need more data; wake for the ping timer if one is armed
            enum Wake {
                Read(io::Result<usize>),
                PingTick(Instant),
            }
            let wake = match next_ping {
                Some(when) => {
                    tokio::select! {
                        res = fill_some(&mut self.stream, &mut self.rx, None) => Wake::Read(res),
                        _ = tokio::time::sleep_until(when) => Wake::PingTick(when),
                    }
                }
                None => Wake::Read(fill_some(&mut self.stream, &mut self.rx, None).await),
            };
            let n = match wake {
                Wake::PingTick(when) => {
                    if awaiting_pong {
                        return self
                            .fail(WS_STATUS_COMMS_ERROR, "ping timeout", handler)
                            .await;
                    }
                    self.send_control(OP_PING, b"").await?;
                    awaiting_pong = true;
                    next_ping = self.ping_period.map(|p| when + p);
                    continue;
                }
                Wake::Read(res) => res,
            };
            match n {
                Ok(0) => {
                    // Peer vanished without a close handshake
                    self.state = WsState::Closed;
                    self.close_status = WS_STATUS_COMMS_ERROR;
                    handler.closed(WS_STATUS_COMMS_ERROR, "connection closed");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    self.transport_failed(handler);
                    return Err(e);
                }
            }
        }
    }

    /// Receive the next complete message, driving control frames and the
    /// close handshake along the way. `None` after the connection closes.
    pub async fn recv(&mut self) -> io::Result<Option<(MessageKind, Vec<u8>)>> {
        #[derive(Default)]
        struct OneMessage {
            message: Option<(MessageKind, Vec<u8>)>,
        }
        impl WsHandler for OneMessage {
            fn message(&mut self, kind: MessageKind, data: &[u8]) {
                self.message = Some((kind, data.to_vec()));
            }
            fn should_stop(&self) -> bool {
                self.message.is_some()
            }
        }
        if self.state == WsState::Closed {
            return Ok(None);
        }
        let mut handler = OneMessage::default();
        self.run(&mut handler).await?;
        Ok(handler.message)
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        handler: &mut dyn WsHandler,
    ) -> Result<(), HandleError> {
        match frame.opcode {
            OP_PING => {
                if self.state == WsState::Open {
                    let payload = frame.payload.clone();
                    self.send_control(OP_PONG, &payload).await?;
                }
                Ok(())
            }
            OP_PONG => Ok(()),
            OP_CLOSE => {
                let (status, reason) = parse_close_payload(&frame.payload)?;
                self.close_status = status;
                self.close_reason = reason.clone();
                if !self.close_sent {
                    // Echo the close before tearing down
                    let _ = self.send_close(status_for_echo(status), "").await;
                }
                self.state = WsState::Closed;
                self.orderly_closed = true;
                handler.closed(status, &reason);
                Ok(())
            }
            OP_TEXT | OP_BINARY => {
                if self.message_opcode != 0 {
                    return Err(HandleError::Protocol(
                        WS_STATUS_PROTOCOL_ERROR,
                        "data frame inside fragmented message".into(),
                    ));
                }
                self.message_opcode = frame.opcode;
                self.utf8.reset();
                self.accumulate(frame, handler)
            }
            OP_CONTINUATION => {
                if self.message_opcode == 0 {
                    return Err(HandleError::Protocol(
                        WS_STATUS_PROTOCOL_ERROR,
                        "continuation without a message".into(),
                    ));
                }
                self.accumulate(frame, handler)
            }
            _ => Err(HandleError::Protocol(
                WS_STATUS_PROTOCOL_ERROR,
                "bad opcode".into(),
            )),
        }
    }

    fn accumulate(&mut self, frame: Frame, handler: &mut dyn WsHandler) -> Result<(), HandleError> {
        let kind = if self.message_opcode == OP_TEXT {
            MessageKind::Text
        } else {
            MessageKind::Binary
        };
        if self.message.len() + frame.payload.len() > self.max_message {
            return Err(HandleError::Protocol(
                WS_STATUS_MESSAGE_TOO_LARGE,
                "message exceeds maximum size".into(),
            ));
        }
        if kind == MessageKind::Text && self.validate_utf8 && !self.utf8.push(&frame.payload) {
            return Err(HandleError::Protocol(
                WS_STATUS_INVALID_UTF8,
                "invalid UTF-8 in text message".into(),
            ));
        }
        if frame.fin {
            if kind == MessageKind::Text && self.validate_utf8 && !self.utf8.finish() {
                return Err(HandleError::Protocol(
                    WS_STATUS_INVALID_UTF8,
                    "truncated UTF-8 in text message".into(),
                ));
            }
            if self.message.is_empty() {
                handler.message(kind, &frame.payload);
            } else {
                self.message.extend_from_slice(&frame.payload);
                let message = self.message.split();
                handler.message(kind, &message);
            }
            self.message_opcode = 0;
        } else {
            handler.partial_message(kind, &frame.payload);
            self.message.extend_from_slice(&frame.payload);
        }
        Ok(())
    }

    /// Send a text message.
    pub async fn send(&mut self, text: &str) -> io::Result<()> {
        self.send_block(MessageKind::Text, text.as_bytes(), false).await
    }

    /// Send a binary message.
    pub async fn send_binary(&mut self, data: &[u8]) -> io::Result<()> {
        self.send_block(MessageKind::Binary, data, false).await
    }

    /// Send one message block, split into frames at the frame limit. With
    /// `more` set, the final frame leaves FIN clear and the next call
    /// continues the same message.
    pub async fn send_block(&mut self, kind: MessageKind, data: &[u8], more: bool) -> io::Result<()> {
        if self.state != WsState::Open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not open"));
        }
        let first_opcode = if self.send_continuation {
            OP_CONTINUATION
        } else if kind == MessageKind::Text {
            OP_TEXT
        } else {
            OP_BINARY
        };
        let mut out = BytesMut::with_capacity(data.len() + 16);
        let mut chunks = data.chunks(self.max_frame).peekable();
        if data.is_empty() {
            encode_frame(first_opcode, b"", !more, self.mask_key()?, &mut out);
        } else {
            let mut first = true;
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none();
                let opcode = if first { first_opcode } else { OP_CONTINUATION };
                encode_frame(opcode, chunk, last && !more, self.mask_key()?, &mut out);
                first = false;
            }
        }
        self.send_continuation = more;
        write_all_deadline(&mut self.stream, &out, None).await
    }

    /// Send a close frame. The reason is capped at 124 bytes wire space.
    pub async fn send_close(&mut self, status: u16, reason: &str) -> io::Result<()> {
        if self.close_sent {
            return Ok(());
        }
        let mut cut = reason.len().min(MAX_CONTROL_PAYLOAD - 1);
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        let reason = &reason[..cut];
        let mut payload = Vec::with_capacity(2 + reason.len());
        if status != WS_STATUS_NO_STATUS {
            payload.extend_from_slice(&status.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        self.close_sent = true;
        if self.state == WsState::Open {
            self.state = WsState::Closing;
        }
        self.send_control(OP_CLOSE, &payload).await
    }

    async fn send_control(&mut self, opcode: u8, payload: &[u8]) -> io::Result<()> {
        let mut out = BytesMut::with_capacity(payload.len() + 16);
        encode_frame(opcode, payload, true, self.mask_key()?, &mut out);
        write_all_deadline(&mut self.stream, &out, None).await
    }

    fn mask_key(&self) -> io::Result<Option<[u8; 4]>> {
        if !self.client {
            return Ok(None);
        }
        let mut key = [0u8; 4];
        getrandom::getrandom(&mut key)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Some(key))
    }

    async fn fail(
        &mut self,
        status: u16,
        message: &str,
        handler: &mut dyn WsHandler,
    ) -> io::Result<()> {
        tracing::debug!(target: "ws", status, message, "websocket failure");
        let _ = self.send_close(status, message).await;
        self.state = WsState::Closed;
        self.close_status = status;
        self.close_reason = message.to_string();
        handler.error(message);
        handler.closed(status, message);
        Err(io::Error::new(io::ErrorKind::InvalidData, message.to_string()))
    }

    fn transport_failed(&mut self, handler: &mut dyn WsHandler) {
        self.state = WsState::Closed;
        self.close_status = WS_STATUS_COMMS_ERROR;
        handler.error("transport failure");
        handler.closed(WS_STATUS_COMMS_ERROR, "transport failure");
    }
}

#[derive(Debug)]
enum HandleError {
    Protocol(u16, String),
    Io(io::Error),
}

impl From<io::Error> for HandleError {
    fn from(e: io::Error) -> Self {
        HandleError::Io(e)
    }
}

/// Echo the peer's close status unless it is one we must not send back.
fn status_for_echo(status: u16) -> u16 {
    match status {
        WS_STATUS_NO_STATUS | WS_STATUS_COMMS_ERROR => WS_STATUS_OK,
        s => s,
    }
}

fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), HandleError> {
    if payload.is_empty() {
        return Ok((WS_STATUS_NO_STATUS, String::new()));
    }
    if payload.len() == 1 {
        return Err(HandleError::Protocol(
            WS_STATUS_PROTOCOL_ERROR,
            "one byte close payload".into(),
        ));
    }
    let status = u16::from_be_bytes([payload[0], payload[1]]);
    let valid = matches!(status, 1000..=1003 | 1007..=1011 | 1015 | 3000..=4999);
    if !valid {
        return Err(HandleError::Protocol(
            WS_STATUS_PROTOCOL_ERROR,
            "bad close status".into(),
        ));
    }
    let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| {
            HandleError::Protocol(WS_STATUS_INVALID_UTF8, "close reason not UTF-8".into())
        })?
        .to_string();
    Ok((status, reason))
}

/// Incremental UTF-8 validation across frame boundaries. Up to three bytes
/// of an incomplete codepoint carry over between frames.
#[derive(Debug, Default)]
struct Utf8Acc {
    pending: Vec<u8>,
}

impl Utf8Acc {
    fn reset(&mut self) {
        self.pending.clear();
    }

    /// Validate the next chunk. Returns false on definitively invalid
    /// UTF-8; an incomplete trailing codepoint is held for the next chunk.
    fn push(&mut self, data: &[u8]) -> bool {
        let bytes: Vec<u8> = if self.pending.is_empty() {
            data.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(data);
            joined
        };
        match std::str::from_utf8(&bytes) {
            Ok(_) => {
                self.pending.clear();
                true
            }
            Err(e) => {
                if e.error_len().is_some() {
                    return false;
                }
                let tail = &bytes[e.valid_up_to()..];
                if tail.len() > 3 {
                    return false;
                }
                self.pending = tail.to_vec();
                true
            }
        }
    }

    /// True when no incomplete codepoint is pending (call at FIN).
    fn finish(&mut self) -> bool {
        let complete = self.pending.is_empty();
        self.pending.clear();
        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_across_boundaries() {
        let snowman = "☃".as_bytes(); // e2 98 83
        let mut acc = Utf8Acc::default();
        assert!(acc.push(&snowman[..1]));
        assert!(acc.push(&snowman[1..2]));
        assert!(acc.push(&snowman[2..]));
        assert!(acc.finish());
    }

    #[test]
    fn utf8_invalid() {
        let mut acc = Utf8Acc::default();
        assert!(!acc.push(&[0xff, 0xfe]));
        let mut acc = Utf8Acc::default();
        assert!(acc.push(&[0xe2, 0x98]));
        assert!(!acc.finish());
    }

    #[test]
    fn close_payload_parse() {
        assert!(matches!(parse_close_payload(b""), Ok((WS_STATUS_NO_STATUS, _))));
        let mut p = 1000u16.to_be_bytes().to_vec();
        p.extend_from_slice(b"done");
        let (status, reason) = parse_close_payload(&p).unwrap();
        assert_eq!(status, 1000);
        assert_eq!(reason, "done");
        assert!(parse_close_payload(&[0x03]).is_err());
        assert!(parse_close_payload(&999u16.to_be_bytes()).is_err());
    }
}
