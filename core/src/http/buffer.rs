/*
 * buffer.rs
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

//! Pattern-bounded buffered reads. `buffer_until` grows the rx buffer from
//! the socket until a pattern appears or the size cap is reached; it is the
//! primitive under header parsing, chunk-size lines and multipart boundary
//! scanning. Over-read bytes stay in the buffer for the next consumer,
//! which is what makes request pipelining safe.

use bytes::BytesMut;
use tokio::time::Instant;

use crate::net::{read_deadline, NetStream};
use std::io;

/// I/O granularity for socket reads and file streaming.
pub const BUFSIZE: usize = 8192;

/// Find `pattern` in `buf`, returning the offset of its first byte.
pub fn find_pattern(buf: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || buf.len() < pattern.len() {
        return None;
    }
    let first = pattern[0];
    let mut start = 0;
    while start + pattern.len() <= buf.len() {
        match buf[start..].iter().position(|&b| b == first) {
            Some(offset) => {
                let at = start + offset;
                if at + pattern.len() > buf.len() {
                    return None;
                }
                if &buf[at..at + pattern.len()] == pattern {
                    return Some(at);
                }
                start = at + 1;
            }
            None => return None,
        }
    }
    None
}

/// Read one socket chunk into `rx`. Returns the number of bytes read; zero
/// means orderly EOF.
pub async fn fill_some(
    stream: &mut NetStream,
    rx: &mut BytesMut,
    deadline: Option<Instant>,
) -> io::Result<usize> {
    let mut tmp = [0u8; BUFSIZE];
    let n = read_deadline(stream, &mut tmp, deadline).await?;
    rx.extend_from_slice(&tmp[..n]);
    Ok(n)
}

/// Buffer socket data into `rx` until `pattern` appears or `limit` bytes are
/// buffered. Returns the length from the buffer start to the end of the
/// pattern. Returns `Ok(0)` when the pattern was not found within the limit
/// and `allow_short` is set; otherwise the missing pattern is an error, as
/// is any socket error or premature EOF.
pub async fn buffer_until(
    stream: &mut NetStream,
    rx: &mut BytesMut,
    pattern: &[u8],
    limit: usize,
    allow_short: bool,
    deadline: Option<Instant>,
) -> io::Result<usize> {
    loop {
        if let Some(at) = find_pattern(rx, pattern) {
            return Ok(at + pattern.len());
        }
        if rx.len() >= limit {
            if allow_short {
                return Ok(0);
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing pattern boundary",
            ));
        }
        let n = fill_some(stream, rx, deadline).await?;
        if n == 0 {
            // EOF: the pattern can never arrive, short or not
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before pattern",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_scan() {
        assert_eq!(find_pattern(b"abcdef", b"cd"), Some(2));
        assert_eq!(find_pattern(b"abcdef", b"ef"), Some(4));
        assert_eq!(find_pattern(b"abcdef", b"fg"), None);
        assert_eq!(find_pattern(b"aaab", b"aab"), Some(1));
        assert_eq!(find_pattern(b"ab", b"abc"), None);
        assert_eq!(find_pattern(b"", b"a"), None);
    }

    #[test]
    fn pattern_at_boundary() {
        assert_eq!(find_pattern(b"\r\n\r\n", b"\r\n\r\n"), Some(0));
        assert_eq!(find_pattern(b"x\r\n\r\n", b"\r\n\r\n"), Some(1));
        assert_eq!(find_pattern(b"\r\n\r", b"\r\n\r\n"), None);
    }
}
