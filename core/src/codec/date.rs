/*
 * date.rs
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

//! RFC 1123 HTTP dates, always GMT.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an RFC 1123 GMT string, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(when: SystemTime) -> String {
    let secs = when
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let dt: DateTime<Utc> = Utc.timestamp_opt(secs, 0).single().unwrap_or_default();
    dt.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an RFC 1123 date (`If-Modified-Since` and friends). Returns `None`
/// for anything that does not match.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S"))
        .ok()?;
    let secs = naive.and_utc().timestamp();
    if secs < 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let t = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let s = format_http_date(t);
        assert_eq!(s, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&s), Some(t));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(parse_http_date(""), None);
    }
}
