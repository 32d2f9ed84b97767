/*
 * url.rs
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

//! URL splitting into scheme, host, port, path, query and hash. Any
//! component may be absent; the path carries no leading `/`, and the query
//! and hash carry no `?` or `#`. IPv6 hosts use bracket literals.

/// Parsed URL components. Absent components are `None`; `port` is 0 when
/// not given (the https scheme implies 443). `explicit_port` records that
/// the authority spelled a port out, which matters for `:0` (ephemeral
/// bind) in listen endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub explicit_port: bool,
    pub path: Option<String>,
    pub query: Option<String>,
    pub hash: Option<String>,
}

impl ParsedUrl {
    /// Split a URL or URL fragment. Accepts full URLs
    /// (`http://host:port/path?query#hash`), bare authorities, and bare
    /// paths. Returns `None` only for an unparseable port.
    pub fn parse(uri: &str) -> Option<ParsedUrl> {
        let mut out = ParsedUrl::default();
        let mut rest = uri;

        // The hash comes after the query
        if let Some(i) = rest.find('#') {
            out.hash = Some(rest[i + 1..].to_string());
            rest = &rest[..i];
        }
        if let Some(i) = rest.find('?') {
            out.query = Some(rest[i + 1..].to_string());
            rest = &rest[..i];
        }

        if !rest.contains('/') && (rest == "http" || rest == "https") {
            // Scheme alone, no hostname or path
            out.scheme = Some(rest.to_string());
            return Some(out);
        }
        if let Some(i) = rest.find("://") {
            let scheme = &rest[..i];
            out.scheme = Some(scheme.to_string());
            if scheme == "https" || scheme == "wss" {
                out.port = 443;
            }
            rest = &rest[i + 3..];
        } else if rest.starts_with('/') {
            // Bare path
            out.path = Some(rest[1..].to_string());
            return Some(out);
        }

        // Authority
        if let Some(stripped) = rest.strip_prefix('[') {
            // IPv6 literal [::1]:port/path
            let end = stripped.find(']')?;
            out.host = Some(stripped[..end].to_string());
            rest = &stripped[end + 1..];
            if let Some(after) = rest.strip_prefix(':') {
                let port_end = after.find('/').unwrap_or(after.len());
                out.port = after[..port_end].parse().ok()?;
                out.explicit_port = true;
                rest = &after[port_end..];
            }
        } else if !rest.is_empty() && !rest.starts_with('/') {
            let end = rest.find(['/', ':']).unwrap_or(rest.len());
            let host = &rest[..end];
            if !host.is_empty() {
                out.host = Some(host.to_string());
            }
            rest = &rest[end..];
            if let Some(after) = rest.strip_prefix(':') {
                let port_end = after.find('/').unwrap_or(after.len());
                out.port = after[..port_end].parse().ok()?;
                out.explicit_port = true;
                rest = &after[port_end..];
            }
        }

        if !rest.is_empty() {
            let path = rest.strip_prefix('/').unwrap_or(rest);
            out.path = Some(path.to_string());
        }
        Some(out)
    }

    /// Effective port: explicit, or derived from the scheme, or 80.
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        match self.scheme.as_deref() {
            Some("https") | Some("wss") => 443,
            _ => 80,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_deref(), Some("https") | Some("wss"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url() {
        let u = ParsedUrl::parse("http://www.example.com:1234/index.html?query=true#frag").unwrap();
        assert_eq!(u.scheme.as_deref(), Some("http"));
        assert_eq!(u.host.as_deref(), Some("www.example.com"));
        assert_eq!(u.port, 1234);
        assert_eq!(u.path.as_deref(), Some("index.html"));
        assert_eq!(u.query.as_deref(), Some("query=true"));
        assert_eq!(u.hash.as_deref(), Some("frag"));
    }

    #[test]
    fn https_default_port() {
        let u = ParsedUrl::parse("https://example.com/a/b").unwrap();
        assert_eq!(u.port, 443);
        assert_eq!(u.path.as_deref(), Some("a/b"));
        assert!(u.is_secure());
    }

    #[test]
    fn bare_path() {
        let u = ParsedUrl::parse("/docs/readme.txt").unwrap();
        assert_eq!(u.scheme, None);
        assert_eq!(u.host, None);
        assert_eq!(u.path.as_deref(), Some("docs/readme.txt"));
    }

    #[test]
    fn authority_only() {
        let u = ParsedUrl::parse("http://example.com").unwrap();
        assert_eq!(u.host.as_deref(), Some("example.com"));
        assert_eq!(u.path, None);
        assert_eq!(u.effective_port(), 80);
    }

    #[test]
    fn ipv6_literal() {
        let u = ParsedUrl::parse("http://[::1]:8080/x").unwrap();
        assert_eq!(u.host.as_deref(), Some("::1"));
        assert_eq!(u.port, 8080);
        assert_eq!(u.path.as_deref(), Some("x"));
    }

    #[test]
    fn explicit_zero_port() {
        let u = ParsedUrl::parse("http://127.0.0.1:0").unwrap();
        assert_eq!(u.port, 0);
        assert!(u.explicit_port);
        let u = ParsedUrl::parse("http://example.com/").unwrap();
        assert!(!u.explicit_port);
    }

    #[test]
    fn bad_port() {
        assert_eq!(ParsedUrl::parse("http://h:70000/"), None);
        assert_eq!(ParsedUrl::parse("http://h:abc/"), None);
    }
}
