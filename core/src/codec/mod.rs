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

//! Pure wire codecs: percent escaping, path normalization, HTTP dates,
//! mime-by-extension, status phrases and URL splitting. No I/O, predictable
//! allocation.

pub mod date;
pub mod escape;
pub mod mime;
pub mod path;
pub mod status;
pub mod url;

pub use self::date::{format_http_date, parse_http_date};
pub use self::escape::{decode, encode_uri, escape_html, validate_uri_chars};
pub use self::mime::mime_for_ext;
pub use self::path::normalize_path;
pub use self::status::status_text;
pub use self::url::ParsedUrl;
