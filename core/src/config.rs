/*
 * config.rs
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

//! Typed host configuration. File loading and format are the embedding
//! application's concern; it hands the host a deserialized `WebConfig`
//! (serde, so JSON or anything serde-compatible works). Durations and sizes
//! accept the human-readable forms used in config files: `5secs`, `2mins`,
//! `1hr`, `10K`, `2MB`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::WebError;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Listening endpoints as `scheme://host:port` URIs.
    pub listen: Vec<String>,
    /// Document root served by the file handler.
    pub documents: String,
    /// Directory index filename.
    pub index: String,
    /// Canonical host name used for redirects and CORS, if set.
    pub name: Option<String>,
    pub timeouts: Timeouts,
    pub limits: Limits,
    pub sessions: Sessions,
    pub upload: UploadConfig,
    pub auth: Auth,
    /// Response headers always added.
    pub headers: BTreeMap<String, String>,
    /// Extension to mime-type overrides, merged over the built-in table.
    pub mime: BTreeMap<String, String>,
    pub routes: Vec<RouteConfig>,
    pub redirect: Vec<RedirectConfig>,
    pub tls: Option<TlsConfig>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: vec!["http://127.0.0.1:80".to_string()],
            documents: ".".to_string(),
            index: "index.html".to_string(),
            name: None,
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            sessions: Sessions::default(),
            upload: UploadConfig::default(),
            auth: Auth::default(),
            headers: BTreeMap::new(),
            mime: BTreeMap::new(),
            routes: Vec::new(),
            redirect: Vec::new(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Deadline for reading the request headers.
    pub parse: String,
    /// Per-I/O inactivity deadline after the headers.
    pub inactivity: String,
    /// Total time allowed for one request.
    pub request: String,
    /// Session lifespan.
    pub session: String,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            parse: "15secs".to_string(),
            inactivity: "5mins".to_string(),
            request: "10mins".to_string(),
            session: "30mins".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub header: String,
    pub connections: u64,
    pub body: String,
    pub sessions: u64,
    pub upload: String,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            header: "10K".to_string(),
            connections: 100,
            body: "100K".to_string(),
            sessions: 20,
            upload: "20MB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Sessions {
    #[serde(rename = "sameSite")]
    pub same_site: String,
    #[serde(rename = "httpOnly")]
    pub http_only: bool,
}

impl Default for Sessions {
    fn default() -> Self {
        Self {
            same_site: "Lax".to_string(),
            http_only: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory receiving upload temp files.
    pub dir: String,
    /// Remove temp files when the request context is dropped.
    pub remove: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().to_string_lossy().into_owned(),
            remove: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Role names ordered by ascending privilege.
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// URL prefix, or the exact path when `exact` is set.
    #[serde(rename = "match")]
    pub pattern: String,
    pub exact: bool,
    /// Role required to access this route.
    pub role: Option<String>,
    /// External redirect target; the route responds 302 when set.
    pub redirect: Option<String>,
    /// Prefix stripped from the path before the handler runs.
    pub trim: Option<String>,
    /// Handler tag: `file` or `action`.
    pub handler: String,
    /// Handler reads the body itself instead of it being pre-buffered.
    pub stream: bool,
    /// Allowed methods. Empty means any method.
    pub methods: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            pattern: "/".to_string(),
            exact: false,
            role: None,
            redirect: None,
            trim: None,
            handler: "file".to_string(),
            stream: false,
            methods: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    /// Match spec `scheme://host:port/path?query#hash`; absent components
    /// match anything.
    pub from: String,
    pub to: String,
    #[serde(default = "default_redirect_status")]
    pub status: u16,
}

fn default_redirect_status() -> u16 {
    301
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub certificate: String,
    pub key: String,
    /// Client verification policy; consumed by the embedding application.
    pub verify: Option<TlsVerify>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsVerify {
    #[serde(default = "default_true")]
    pub client: bool,
    #[serde(default = "default_true")]
    pub issuer: bool,
}

/// Parse a human-readable duration: bare seconds, or a number followed by
/// `ms`, `sec(s)`, `min(s)`, `hr(s)`, `day(s)`. `0` and `infinite` mean no
/// timeout.
pub fn parse_duration(value: &str) -> Result<Option<Duration>, WebError> {
    let value = value.trim();
    if value.is_empty() || value == "0" || value.eq_ignore_ascii_case("infinite") {
        return Ok(None);
    }
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = value[digits.len()..].trim();
    let n: u64 = digits
        .parse()
        .map_err(|_| WebError::Config(format!("bad duration: {}", value)))?;
    let dur = match unit.to_ascii_lowercase().as_str() {
        "" | "sec" | "secs" | "second" | "seconds" | "s" => Duration::from_secs(n),
        "ms" | "millisecond" | "milliseconds" => Duration::from_millis(n),
        "min" | "mins" | "minute" | "minutes" | "m" => Duration::from_secs(n * 60),
        "hr" | "hrs" | "hour" | "hours" | "h" => Duration::from_secs(n * 3600),
        "day" | "days" | "d" => Duration::from_secs(n * 86400),
        _ => return Err(WebError::Config(format!("bad duration unit: {}", value))),
    };
    Ok(Some(dur))
}

/// Parse a human-readable size: bare bytes, or a number followed by `K`,
/// `KB`, `M`, `MB`, `G`, `GB` (binary multiples). `unlimited` yields
/// `u64::MAX`.
pub fn parse_size(value: &str) -> Result<u64, WebError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("unlimited") || value.eq_ignore_ascii_case("infinite") {
        return Ok(u64::MAX);
    }
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = value[digits.len()..].trim();
    let n: u64 = digits
        .parse()
        .map_err(|_| WebError::Config(format!("bad size: {}", value)))?;
    let mult = match unit.to_ascii_lowercase().as_str() {
        "" | "b" | "bytes" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return Err(WebError::Config(format!("bad size unit: {}", value))),
    };
    Ok(n.saturating_mul(mult))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30").unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5secs").unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2mins").unwrap(), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1hr").unwrap(), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("0").unwrap(), None);
        assert_eq!(parse_duration("infinite").unwrap(), None);
        assert!(parse_duration("5 parsecs").is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("10K").unwrap(), 10 * 1024);
        assert_eq!(parse_size("2MB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("unlimited").unwrap(), u64::MAX);
        assert!(parse_size("10Q").is_err());
    }

    #[test]
    fn config_from_json() {
        let cfg: WebConfig = serde_json::from_str(
            r#"{
                "listen": ["http://127.0.0.1:8080"],
                "documents": "/var/www",
                "timeouts": { "parse": "10secs" },
                "limits": { "body": "1MB" },
                "auth": { "roles": ["user", "admin"] },
                "routes": [
                    { "match": "/api/", "handler": "action", "methods": ["GET", "POST"] },
                    { "match": "/", "handler": "file" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.documents, "/var/www");
        assert_eq!(cfg.index, "index.html");
        assert_eq!(cfg.routes.len(), 2);
        assert_eq!(cfg.routes[0].methods, vec!["GET", "POST"]);
        assert_eq!(cfg.auth.roles[1], "admin");
    }
}
