/*
 * body.rs
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

//! Body framing: the read pipeline shared by the server request engine and
//! the URL client. A body is either Content-Length bounded, chunked, or
//! read-until-close (client only). Chunk decoding runs a two-state machine:
//! a hex size line, then that many data bytes and a trailing CRLF.

use bytes::BytesMut;
use tokio::time::Instant;

use crate::http::buffer::{buffer_until, fill_some};
use crate::net::NetStream;
use std::io;

/// Sentinel for "no known bound" on remaining body bytes.
pub const UNLIMITED: i64 = i64::MAX;

/// Chunk size lines are tiny; cap the scan so a bad peer cannot buffer.
const CHUNK_LINE_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not using chunked transfer encoding.
    None,
    /// Expecting a chunk size line.
    Start,
    /// Inside chunk data.
    Data,
}

/// Receive-side body framing state.
#[derive(Debug, Clone, Copy)]
pub struct BodyState {
    pub chunked: ChunkState,
    /// Bytes of body left to deliver; `UNLIMITED` while chunked or when the
    /// client reads until close.
    pub remaining: i64,
    pub chunk_remaining: i64,
}

impl BodyState {
    pub fn new() -> Self {
        Self {
            chunked: ChunkState::None,
            remaining: UNLIMITED,
            chunk_remaining: 0,
        }
    }

    /// Configure from parsed headers: a Content-Length, chunked encoding,
    /// or neither (`len < 0` with `chunked` false leaves the state
    /// read-until-close; callers that know better set `remaining`).
    pub fn set_framing(&mut self, len: i64, chunked: bool) {
        if chunked {
            self.chunked = ChunkState::Start;
            self.remaining = UNLIMITED;
        } else {
            self.chunked = ChunkState::None;
            self.remaining = if len >= 0 { len } else { UNLIMITED };
        }
    }

    /// True when no more body bytes will be delivered.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Read up to `buf.len()` body bytes. Returns zero at the end of the
    /// body. Socket errors and premature EOF surface as errors; the caller
    /// decides whether that compromises the connection.
    pub async fn read(
        &mut self,
        stream: &mut NetStream,
        rx: &mut BytesMut,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        match self.chunked {
            ChunkState::None => {
                let want = buf.len().min(self.remaining.min(i64::from(u32::MAX)) as usize);
                let n = read_block(stream, rx, &mut buf[..want], deadline).await?;
                if self.remaining != UNLIMITED {
                    if n == 0 && self.remaining > 0 {
                        return Err(short_body());
                    }
                    self.remaining -= n as i64;
                } else if n == 0 {
                    // Read-until-close: orderly end
                    self.remaining = 0;
                }
                Ok(n)
            }
            ChunkState::Start | ChunkState::Data => self.read_chunk(stream, rx, buf, deadline).await,
        }
    }

    async fn read_chunk(
        &mut self,
        stream: &mut NetStream,
        rx: &mut BytesMut,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> io::Result<usize> {
        if self.chunked == ChunkState::Start {
            let size = read_chunk_line(stream, rx, deadline).await?;
            if size == 0 {
                // Zero chunk ends the body; consume the final CRLF
                consume_crlf_line(stream, rx, deadline).await?;
                self.chunk_remaining = 0;
                self.remaining = 0;
                return Ok(0);
            }
            self.chunk_remaining = size;
            self.chunked = ChunkState::Data;
        }
        let want = buf.len().min(self.chunk_remaining.min(i64::from(u32::MAX)) as usize);
        let n = read_block(stream, rx, &mut buf[..want], deadline).await?;
        if n == 0 {
            return Err(short_body());
        }
        self.chunk_remaining -= n as i64;
        if self.chunk_remaining == 0 {
            // Chunk done; consume the trailing CRLF and rearm for the next
            self.chunked = ChunkState::Start;
            consume_crlf_line(stream, rx, deadline).await?;
        }
        Ok(n)
    }

    /// Drain and discard the rest of the body (keep-alive preservation).
    pub async fn drain(
        &mut self,
        stream: &mut NetStream,
        rx: &mut BytesMut,
        deadline: Option<Instant>,
    ) -> io::Result<()> {
        let mut scratch = [0u8; super::buffer::BUFSIZE];
        loop {
            let n = self.read(stream, rx, &mut scratch, deadline).await?;
            if n == 0 {
                return Ok(());
            }
        }
    }
}

impl Default for BodyState {
    fn default() -> Self {
        Self::new()
    }
}

fn short_body() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid body")
}

/// Copy buffered bytes out of `rx`, filling from the socket when empty.
/// Returns zero only on EOF with an empty buffer.
async fn read_block(
    stream: &mut NetStream,
    rx: &mut BytesMut,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> io::Result<usize> {
    if rx.is_empty() && !buf.is_empty() {
        let n = fill_some(stream, rx, deadline).await?;
        if n == 0 {
            return Ok(0);
        }
    }
    let n = rx.len().min(buf.len());
    buf[..n].copy_from_slice(&rx[..n]);
    let _ = rx.split_to(n);
    Ok(n)
}

/// Read a chunk size line: hex digits, optional `;extension`, CRLF.
async fn read_chunk_line(
    stream: &mut NetStream,
    rx: &mut BytesMut,
    deadline: Option<Instant>,
) -> io::Result<i64> {
    let n = buffer_until(stream, rx, b"\r\n", CHUNK_LINE_CAP, false, deadline)
        .await
        .map_err(|_| bad_chunk())?;
    let line = rx.split_to(n);
    let text = std::str::from_utf8(&line[..n - 2]).map_err(|_| bad_chunk())?;
    let hex = text.split(';').next().unwrap_or("").trim();
    if hex.is_empty() || !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(bad_chunk());
    }
    i64::from_str_radix(hex, 16).map_err(|_| bad_chunk())
}

/// Consume an expected bare CRLF (after chunk data and after the zero
/// chunk).
async fn consume_crlf_line(
    stream: &mut NetStream,
    rx: &mut BytesMut,
    deadline: Option<Instant>,
) -> io::Result<()> {
    while rx.len() < 2 {
        let n = fill_some(stream, rx, deadline).await?;
        if n == 0 {
            return Err(short_body());
        }
    }
    let crlf = rx.split_to(2);
    if &crlf[..] != b"\r\n" {
        return Err(bad_chunk());
    }
    Ok(())
}

fn bad_chunk() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "bad chunk specification")
}
