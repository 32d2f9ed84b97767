/*
 * path.rs
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

//! Request path normalization.

/// Normalize a path: collapse repeated separators, remove `.` segments and
/// resolve `..` by popping the previously kept segment, clamped at the root.
/// The input must begin with `/` (returns `None` otherwise). A trailing `/`
/// is preserved. Case is untouched and percent sequences are not decoded.
pub fn normalize_path(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = String::with_capacity(path.len());
    out.push('/');
    out.push_str(&segments.join("/"));
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    Some(out)
}
