/*
 * error.rs
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

//! Crate error type. Protocol internals stay on `io::Result` (push parsers,
//! socket pipelines); `WebError` is the seam exposed to applications: the
//! server maps kinds onto wire behavior (status response vs silent close),
//! the client surfaces them from `Url` operations.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebError {
    /// Malformed request line or headers. The connection is compromised.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// URL failed decode, validation or normalization.
    #[error("bad url: {0}")]
    BadUrl(String),

    /// Header or body exceeded a configured limit.
    #[error("too big: {0}")]
    TooBig(String),

    /// No route or document matched the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// Route matched but the method is outside its allowed set.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Authentication required or failed, or insufficient role.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed multipart body or rejected client filename.
    #[error("upload rejected: {0}")]
    UploadRejected(String),

    /// Uploaded part exceeded the upload limit.
    #[error("upload too big: {0}")]
    UploadTooBig(String),

    /// Socket closed, TLS failure or write failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A request deadline expired.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The client received a malformed server reply.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// The client could not resolve, connect or negotiate TLS.
    #[error("cannot connect: {0}")]
    CantConnect(String),

    /// Configuration value could not be interpreted.
    #[error("bad config: {0}")]
    Config(String),
}

impl WebError {
    /// HTTP status the server surface reports for this kind. Zero means the
    /// connection is closed without any response.
    pub fn status(&self) -> u16 {
        match self {
            WebError::BadRequest(_) | WebError::BadUrl(_) => 0,
            WebError::TooBig(_) => 413,
            WebError::NotFound(_) => 404,
            WebError::MethodNotAllowed(_) => 405,
            WebError::Unauthorized(_) => 401,
            WebError::UploadRejected(_) => 400,
            WebError::UploadTooBig(_) => 414,
            WebError::Io(_) | WebError::Timeout(_) => 0,
            WebError::BadResponse(_) | WebError::CantConnect(_) | WebError::Config(_) => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
