/*
 * status.rs
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

//! HTTP status reason phrases. Closed table; anything else is "Unknown".

pub fn status_text(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        301 => "Redirect",
        302 => "Redirect",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Unsupported Method",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        413 => "Request too large",
        414 => "Request URI too large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        550 => "Comms error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(550), "Comms error");
        assert_eq!(status_text(299), "Unknown");
        assert_eq!(status_text(999), "Unknown");
    }
}
