/*
 * headers.rs
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

//! Header parsing and assembly. The rx side tokenizes a raw CRLF-separated
//! block into name/value entries searched case-insensitively (the slice
//! rendition of the source's in-place NUL tokenization); the tx side is an
//! ordered map with case-insensitive replacement.

use std::io;

/// Parsed request or response headers. Order is preserved; lookup is
/// case-insensitive; repeated names are all kept.
#[derive(Debug, Default, Clone)]
pub struct HeaderBlock {
    entries: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Parse a block of `Name: value\r\n` lines. The block must not include
    /// the terminating blank line. Every line requires a colon and a CRLF;
    /// value leading spaces are trimmed.
    pub fn parse(block: &[u8]) -> io::Result<HeaderBlock> {
        let mut entries = Vec::new();
        let mut rest = block;
        while !rest.is_empty() {
            let eol = match rest.windows(2).position(|w| w == b"\r\n") {
                Some(i) => i,
                None => return Err(bad_headers()),
            };
            let line = &rest[..eol];
            rest = &rest[eol + 2..];
            if line.is_empty() {
                break;
            }
            let colon = line
                .iter()
                .position(|&c| c == b':')
                .ok_or_else(bad_headers)?;
            let name = std::str::from_utf8(&line[..colon])
                .map_err(|_| bad_headers())?
                .trim();
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| bad_headers())?
                .trim_start();
            if name.is_empty() {
                return Err(bad_headers());
            }
            entries.push((name.to_string(), value.trim_end().to_string()));
        }
        Ok(HeaderBlock { entries })
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, case-insensitive.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn bad_headers() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "bad headers")
}

/// Response headers held until the first body write. Insertion order is the
/// emission order; setting an existing name (case-insensitive) replaces it.
#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Add a header without replacing; used for repeatable names such as
    /// `Set-Cookie`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_block() {
        let h = HeaderBlock::parse(b"Host: example.com\r\nContent-Length:  42\r\n").unwrap();
        assert_eq!(h.get("host"), Some("example.com"));
        assert_eq!(h.get("CONTENT-LENGTH"), Some("42"));
        assert_eq!(h.get("missing"), None);
    }

    #[test]
    fn parse_repeated() {
        let h = HeaderBlock::parse(b"Cookie: a=1\r\nCookie: b=2\r\n").unwrap();
        let all: Vec<&str> = h.get_all("cookie").collect();
        assert_eq!(all, vec!["a=1", "b=2"]);
    }

    #[test]
    fn parse_rejects_missing_colon() {
        assert!(HeaderBlock::parse(b"NoColonHere\r\n").is_err());
    }

    #[test]
    fn parse_rejects_missing_crlf() {
        assert!(HeaderBlock::parse(b"Host: x").is_err());
    }

    #[test]
    fn map_replaces_case_insensitive() {
        let mut m = HeaderMap::new();
        m.set("Content-Type", "text/plain");
        m.set("content-type", "text/html");
        assert_eq!(m.get("Content-Type"), Some("text/html"));
        assert_eq!(m.iter().count(), 1);
        m.add("Set-Cookie", "a=1");
        m.add("Set-Cookie", "b=2");
        assert_eq!(m.iter().count(), 3);
    }
}
