/*
 * route.rs
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

//! Route and redirect tables. Both are declared in config, compiled at host
//! construction and immutable after start; requests scan them in declared
//! order and the first match wins.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use crate::codec::url::ParsedUrl;
use crate::config::{RedirectConfig, RouteConfig};
use crate::error::WebError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteHandler {
    File,
    Action,
}

/// One compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    pub exact: bool,
    pub role: Option<String>,
    pub redirect: Option<String>,
    pub trim: Option<String>,
    pub handler: RouteHandler,
    pub stream: bool,
    /// Allowed methods; `None` admits any method.
    pub methods: Option<BTreeSet<String>>,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Result<Route, WebError> {
        let handler = match config.handler.as_str() {
            "file" => RouteHandler::File,
            "action" => RouteHandler::Action,
            other => {
                return Err(WebError::Config(format!("unknown route handler: {}", other)));
            }
        };
        let methods = if config.methods.is_empty() {
            None
        } else {
            Some(
                config
                    .methods
                    .iter()
                    .map(|m| m.to_ascii_uppercase())
                    .collect(),
            )
        };
        Ok(Route {
            pattern: config.pattern.clone(),
            exact: config.exact,
            role: config.role.clone(),
            redirect: config.redirect.clone(),
            trim: config.trim.clone(),
            handler,
            stream: config.stream,
            methods,
        })
    }

    /// Prefix match, or equality when the route is exact.
    pub fn matches(&self, path: &str) -> bool {
        if self.exact {
            path == self.pattern
        } else {
            path.starts_with(&self.pattern)
        }
    }

    pub fn allows_method(&self, method: &str) -> bool {
        match &self.methods {
            None => true,
            Some(set) => set.contains(method),
        }
    }

    /// Sorted, comma-separated method list for `Access-Control-Allow-Methods`.
    pub fn methods_header(&self) -> Option<String> {
        self.methods.as_ref().map(|set| {
            set.iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

/// One compiled host-level redirect rule. Any component absent from the
/// `from` spec matches anything.
#[derive(Debug, Clone)]
pub struct Redirect {
    pub from: ParsedUrl,
    pub to: String,
    pub status: u16,
}

impl Redirect {
    pub fn from_config(config: &RedirectConfig) -> Result<Redirect, WebError> {
        let from = ParsedUrl::parse(&config.from)
            .ok_or_else(|| WebError::Config(format!("bad redirect from: {}", config.from)))?;
        Ok(Redirect {
            from,
            to: config.to.clone(),
            status: if config.status == 0 { 301 } else { config.status },
        })
    }

    /// Match the rule against a request. `path` is the normalized request
    /// path with its leading slash; the rule's path carries none.
    pub fn matches(
        &self,
        scheme: &str,
        host_name: Option<&str>,
        local: SocketAddr,
        path: &str,
        query: Option<&str>,
        hash: Option<&str>,
    ) -> bool {
        if let Some(from_scheme) = self.from.scheme.as_deref() {
            if from_scheme != scheme {
                return false;
            }
        }
        if let Some(from_host) = self.from.host.as_deref() {
            let ip = local.ip().to_string();
            let name_match = host_name.map(|n| n == from_host).unwrap_or(false);
            if !name_match && ip != from_host {
                return false;
            }
        }
        if self.from.port != 0 && self.from.port != local.port() {
            return false;
        }
        if let Some(from_path) = self.from.path.as_deref() {
            if path.strip_prefix('/').unwrap_or(path) != from_path {
                return false;
            }
        }
        if let Some(from_query) = self.from.query.as_deref() {
            if query != Some(from_query) {
                return false;
            }
        }
        if let Some(from_hash) = self.from.hash.as_deref() {
            if hash != Some(from_hash) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str, exact: bool, methods: &[&str]) -> Route {
        Route::from_config(&RouteConfig {
            pattern: pattern.to_string(),
            exact,
            methods: methods.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn prefix_and_exact() {
        let r = route("/api/", false, &[]);
        assert!(r.matches("/api/users"));
        assert!(!r.matches("/apiary"));
        let r = route("/login", true, &[]);
        assert!(r.matches("/login"));
        assert!(!r.matches("/login/extra"));
    }

    #[test]
    fn method_set() {
        let r = route("/", false, &["get", "POST"]);
        assert!(r.allows_method("GET"));
        assert!(r.allows_method("POST"));
        assert!(!r.allows_method("DELETE"));
        assert_eq!(r.methods_header().unwrap(), "GET,POST");
        let any = route("/", false, &[]);
        assert!(any.allows_method("DELETE"));
        assert_eq!(any.methods_header(), None);
    }

    #[test]
    fn first_match_wins_ordering() {
        let routes = vec![route("/api/", false, &[]), route("/", false, &[])];
        let hit = routes.iter().position(|r| r.matches("/api/x")).unwrap();
        assert_eq!(hit, 0);
        let hit = routes.iter().position(|r| r.matches("/other")).unwrap();
        assert_eq!(hit, 1);
    }

    #[test]
    fn redirect_matching() {
        let r = Redirect::from_config(&RedirectConfig {
            from: "http://".to_string(),
            to: "https://example.com".to_string(),
            status: 301,
        })
        .unwrap();
        let local: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert!(r.matches("http", None, local, "/any", None, None));
        assert!(!r.matches("https", None, local, "/any", None, None));
    }

    #[test]
    fn redirect_path_component() {
        let r = Redirect::from_config(&RedirectConfig {
            from: "/old".to_string(),
            to: "/new".to_string(),
            status: 301,
        })
        .unwrap();
        let local: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert!(r.matches("http", None, local, "/old", None, None));
        assert!(!r.matches("http", None, local, "/other", None, None));
    }
}
