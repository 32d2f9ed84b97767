/*
 * sse.rs
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

//! Server-Sent Events client: line-oriented parsing over the URL client.
//! A line starting with `:` is a comment; `field: value` accumulates into
//! the pending event; a blank line dispatches it. Multi-line data joins
//! with newlines; `id` persists as the last-event-id across events.

use crate::error::{Result, WebError};
use crate::http::buffer::BUFSIZE;

use super::url::Url;

/// One dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Last event id seen, sticky across events.
    pub id: Option<String>,
    /// Event type; absent means the default `message` event.
    pub event: Option<String>,
    pub data: String,
    /// Reconnect interval in milliseconds, when the server sent one.
    pub retry: Option<u64>,
}

/// Incremental event-stream parser.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed stream bytes; returns the events completed by this chunk.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(event) = self.take_line(&line) {
                    out.push(event);
                }
            } else {
                self.line.push(b);
            }
        }
        out
    }

    fn take_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        let line = String::from_utf8_lossy(line);
        if line.starts_with(':') {
            // Comment
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line.as_ref(), ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
        None
    }

    /// Blank line: dispatch the pending event, discarding empty ones.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if data.is_empty() && event.is_none() {
            return None;
        }
        Some(SseEvent {
            id: self.last_id.clone(),
            event,
            data: data.join("\n"),
            retry: self.retry,
        })
    }
}

impl Url {
    /// GET an event stream and dispatch each event to the callback until
    /// the server closes or the callback returns false. The response must
    /// carry `Content-Type: text/event-stream`.
    pub async fn get_events<F>(&mut self, uri: &str, headers: Option<&str>, mut callback: F) -> Result<()>
    where
        F: FnMut(&SseEvent) -> bool,
    {
        self.start("GET", uri, 0).await?;
        self.write_headers(headers).await?;
        self.finalize().await?;

        if self.status != 200 {
            return Err(WebError::BadResponse(format!("status {}", self.status)));
        }
        let content_type = self.response_header("Content-Type").unwrap_or("");
        if !content_type.starts_with("text/event-stream") {
            return Err(WebError::BadResponse(format!(
                "not an event stream: {}",
                content_type
            )));
        }
        let mut parser = SseParser::new();
        let mut buf = [0u8; BUFSIZE];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            for event in parser.feed(&buf[..n]) {
                if !callback(&event) {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn multi_line_data_joined() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: one\ndata: two\n\n");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn fields_and_comments() {
        let mut p = SseParser::new();
        let events = p.feed(b": comment\nevent: tick\nid: 7\nretry: 250\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("tick"));
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].retry, Some(250));
    }

    #[test]
    fn id_is_sticky() {
        let mut p = SseParser::new();
        let events = p.feed(b"id: 1\ndata: a\n\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id.as_deref(), Some("1"));
    }

    #[test]
    fn blank_without_data_not_dispatched() {
        let mut p = SseParser::new();
        let events = p.feed(b"\n\n: ping\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn split_across_chunks() {
        let mut p = SseParser::new();
        assert!(p.feed(b"data: par").is_empty());
        assert!(p.feed(b"tial\n").is_empty());
        let events = p.feed(b"\n");
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn crlf_lines() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn hundred_events() {
        let mut p = SseParser::new();
        let mut stream = Vec::new();
        for i in 0..100 {
            stream.extend_from_slice(format!("data: event {}\n\n", i).as_bytes());
        }
        let events = p.feed(&stream);
        assert_eq!(events.len(), 100);
        assert_eq!(events[99].data, "event 99");
    }
}
