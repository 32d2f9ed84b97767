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

//! Wire machinery shared by the server engine and the URL client: header
//! block parsing, pattern-bounded buffered reads, and the body framing
//! state machine (Content-Length and chunked transfer decoding).

pub mod body;
pub mod buffer;
pub mod headers;

pub use self::body::{BodyState, ChunkState, UNLIMITED};
pub use self::buffer::{buffer_until, fill_some, find_pattern, BUFSIZE};
pub use self::headers::{HeaderBlock, HeaderMap};
