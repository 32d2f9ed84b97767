/*
 * frame.rs
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

//! WebSocket frame format (RFC 6455 §5): decoder for receive, encoder for
//! send. Client-to-server frames must be masked; server-to-client frames
//! must not be. Reserved bits must be zero (no extensions).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

/// Control frame payloads are capped by the protocol.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn is_control(&self) -> bool {
        self.opcode & 0x8 != 0
    }
}

/// Decode one frame from `buf` if a complete frame is buffered, consuming
/// it. `masked_input` selects the direction contract: the server requires
/// masked frames, the client forbids them. `max_frame` bounds data frame
/// payloads.
pub fn decode_frame(
    buf: &mut BytesMut,
    masked_input: bool,
    max_frame: usize,
) -> io::Result<Option<Frame>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & 0x80 != 0;
    let rsv = b0 & 0x70;
    let opcode = b0 & 0x0f;
    let masked = b1 & 0x80 != 0;
    let len7 = (b1 & 0x7f) as usize;

    if rsv != 0 {
        return Err(protocol_error("reserved bits set"));
    }
    if masked != masked_input {
        return Err(protocol_error(if masked_input {
            "unmasked frame from client"
        } else {
            "masked frame from server"
        }));
    }
    match opcode {
        OP_CONTINUATION | OP_TEXT | OP_BINARY | OP_CLOSE | OP_PING | OP_PONG => {}
        _ => return Err(protocol_error("bad opcode")),
    }

    let mut header = 2;
    let payload_len: u64 = match len7 {
        126 => {
            if buf.len() < header + 2 {
                return Ok(None);
            }
            header += 2;
            u16::from_be_bytes([buf[2], buf[3]]) as u64
        }
        127 => {
            if buf.len() < header + 8 {
                return Ok(None);
            }
            header += 8;
            u64::from_be_bytes([buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9]])
        }
        n => n as u64,
    };

    let is_control = opcode & 0x8 != 0;
    if is_control {
        if payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(protocol_error("control frame payload too long"));
        }
        if !fin {
            return Err(protocol_error("fragmented control frame"));
        }
    } else if payload_len > max_frame as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds maximum size",
        ));
    }

    let mask_len = if masked { 4 } else { 0 };
    let total = header + mask_len + payload_len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(header);
    let mask_key = if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&buf[..4]);
        buf.advance(4);
        Some(key)
    } else {
        None
    };
    let mut payload = buf.split_to(payload_len as usize);
    if let Some(key) = mask_key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }
    Ok(Some(Frame {
        fin,
        opcode,
        payload: payload.freeze(),
    }))
}

/// Encode one frame. A mask key is applied when given (client side); the
/// server sends unmasked. `fin` clears for all but the final frame of a
/// fragmented message.
pub fn encode_frame(
    opcode: u8,
    payload: &[u8],
    fin: bool,
    mask_key: Option<[u8; 4]>,
    out: &mut BytesMut,
) {
    let fin_bit: u8 = if fin { 0x80 } else { 0 };
    let mask_bit: u8 = if mask_key.is_some() { 0x80 } else { 0 };
    out.put_u8(fin_bit | (opcode & 0x0f));
    let len = payload.len();
    if len < 126 {
        out.put_u8(mask_bit | len as u8);
    } else if len < 65536 {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }
    match mask_key {
        Some(key) => {
            out.put_slice(&key);
            for (i, &b) in payload.iter().enumerate() {
                out.put_u8(b ^ key[i % 4]);
            }
        }
        None => out.put_slice(payload),
    }
}

fn protocol_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(data: &[u8], masked: bool) -> io::Result<Vec<Frame>> {
        let mut buf = BytesMut::from(data);
        let mut out = Vec::new();
        while let Some(f) = decode_frame(&mut buf, masked, 1 << 20)? {
            out.push(f);
        }
        Ok(out)
    }

    #[test]
    fn unmasked_round_trip() {
        let mut out = BytesMut::new();
        encode_frame(OP_TEXT, b"hello", true, None, &mut out);
        let frames = decode_all(&out, false).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OP_TEXT);
        assert_eq!(&frames[0].payload[..], b"hello");
    }

    #[test]
    fn masked_round_trip() {
        let mut out = BytesMut::new();
        encode_frame(OP_BINARY, &[1, 2, 3, 4, 5], true, Some([9, 8, 7, 6]), &mut out);
        let frames = decode_all(&out, true).unwrap();
        assert_eq!(&frames[0].payload[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn extended_lengths() {
        let payload = vec![0x5au8; 300];
        let mut out = BytesMut::new();
        encode_frame(OP_BINARY, &payload, true, None, &mut out);
        // 2 header + 2 extended length
        assert_eq!(out.len(), 4 + 300);
        let frames = decode_all(&out, false).unwrap();
        assert_eq!(frames[0].payload.len(), 300);

        let payload = vec![0xa5u8; 70000];
        let mut out = BytesMut::new();
        encode_frame(OP_BINARY, &payload, true, None, &mut out);
        assert_eq!(out.len(), 10 + 70000);
        let frames = decode_all(&out, false).unwrap();
        assert_eq!(frames[0].payload.len(), 70000);
    }

    #[test]
    fn partial_frame_needs_more() {
        let mut out = BytesMut::new();
        encode_frame(OP_TEXT, b"hello world", true, None, &mut out);
        let mut partial = BytesMut::from(&out[..5]);
        assert!(decode_frame(&mut partial, false, 1 << 20).unwrap().is_none());
    }

    #[test]
    fn direction_contract() {
        let mut out = BytesMut::new();
        encode_frame(OP_TEXT, b"x", true, None, &mut out);
        // Server requires masked input
        assert!(decode_all(&out, true).is_err());

        let mut out = BytesMut::new();
        encode_frame(OP_TEXT, b"x", true, Some([1, 2, 3, 4]), &mut out);
        // Client forbids masked input
        assert!(decode_all(&out, false).is_err());
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut buf = BytesMut::from(&[0xF1u8, 0x00][..]);
        assert!(decode_frame(&mut buf, false, 1 << 20).is_err());
    }

    #[test]
    fn rejects_fragmented_control() {
        // Ping with FIN clear
        let mut buf = BytesMut::from(&[0x09u8, 0x00][..]);
        assert!(decode_frame(&mut buf, false, 1 << 20).is_err());
    }

    #[test]
    fn rejects_oversize_control() {
        let mut out = BytesMut::new();
        encode_frame(OP_PING, &vec![0u8; 126], true, None, &mut out);
        assert!(decode_all(&out, false).is_err());
    }
}
