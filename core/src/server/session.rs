/*
 * session.rs
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

//! Server-side session state keyed by an opaque cookie id. Sessions hold a
//! string map and an expiry renewed on every touch; a periodic sweep prunes
//! expired entries. The store enforces the host's session ceiling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "-web-session-";

/// Session variables reserved for authentication state.
pub(crate) const SESSION_USERNAME: &str = "_:username:_";
pub(crate) const SESSION_ROLE: &str = "_:role:_";

/// Sweep interval for expired sessions.
pub const SESSION_PRUNE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Session {
    expires: Instant,
    lifespan: Duration,
    cache: HashMap<String, String>,
}

/// Session table. All access renews the entry's expiry.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_sessions: u64,
    next_id: AtomicU64,
}

impl SessionStore {
    pub fn new(max_sessions: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            next_id: AtomicU64::new(0),
        }
    }

    /// Create a session; `None` when the ceiling is reached.
    pub fn create(&self, lifespan: Duration) -> Option<String> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.len() as u64 >= self.max_sessions {
            tracing::error!(
                target: "web",
                count = sessions.len(),
                max = self.max_sessions,
                "too many sessions"
            );
            return None;
        }
        let id = self.make_id();
        sessions.insert(
            id.clone(),
            Session {
                expires: Instant::now() + lifespan,
                lifespan,
                cache: HashMap::new(),
            },
        );
        Some(id)
    }

    /// True when the session exists; renews its expiry.
    pub fn touch(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some(session) => {
                session.expires = Instant::now() + session.lifespan;
                true
            }
            None => false,
        }
    }

    pub fn destroy(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }

    pub fn get_var(&self, id: &str, key: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id)?;
        session.expires = Instant::now() + session.lifespan;
        session.cache.get(key).cloned()
    }

    /// Set a variable; false when the session does not exist.
    pub fn set_var(&self, id: &str, key: &str, value: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some(session) => {
                session.expires = Instant::now() + session.lifespan;
                session.cache.insert(key.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove_var(&self, id: &str, key: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.cache.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired sessions; returns (pruned, remaining).
    pub fn prune(&self) -> (usize, usize) {
        let mut sessions = self.sessions.lock().unwrap();
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires > now);
        let after = sessions.len();
        (before - after, after)
    }

    /// SHA-256 hex id from random bytes and a monotonic counter.
    fn make_id(&self) -> String {
        let counter = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut seed = [0u8; 32];
        let _ = getrandom::getrandom(&mut seed);
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        let mut id = String::with_capacity(64);
        for b in digest {
            id.push_str(&format!("{:02x}", b));
        }
        id
    }
}

/// Extract a named cookie from a concatenated `Cookie` header value. Values
/// are trimmed of spaces and one layer of surrounding double quotes; spaces
/// inside quotes survive.
pub fn parse_cookie(header: &str, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    for cookie in header.split(';') {
        let cookie = cookie.trim_start();
        let (key, value) = match cookie.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        if key == name {
            let value = value.trim().trim_matches('"');
            return Some(value.to_string());
        }
    }
    None
}

/// Assemble a `Set-Cookie` value for a session id.
pub fn session_cookie_value(id: &str, secure: bool, http_only: bool, same_site: &str) -> String {
    format!(
        "{}={}; path=/; {}{}SameSite={}",
        SESSION_COOKIE,
        id,
        if secure { "Secure; " } else { "" },
        if http_only { "HttpOnly; " } else { "" },
        same_site
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_vars() {
        let store = SessionStore::new(10);
        let id = store.create(Duration::from_secs(60)).unwrap();
        assert_eq!(id.len(), 64);
        assert!(store.set_var(&id, "username", "alice"));
        assert_eq!(store.get_var(&id, "username").as_deref(), Some("alice"));
        store.remove_var(&id, "username");
        assert_eq!(store.get_var(&id, "username"), None);
        store.destroy(&id);
        assert!(!store.touch(&id));
    }

    #[test]
    fn ids_are_unique() {
        let store = SessionStore::new(10);
        let a = store.create(Duration::from_secs(60)).unwrap();
        let b = store.create(Duration::from_secs(60)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ceiling() {
        let store = SessionStore::new(2);
        assert!(store.create(Duration::from_secs(60)).is_some());
        assert!(store.create(Duration::from_secs(60)).is_some());
        assert!(store.create(Duration::from_secs(60)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_prune() {
        let store = SessionStore::new(10);
        let id = store.create(Duration::from_secs(5)).unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        // A touch renews the lifespan
        assert!(store.touch(&id));
        tokio::time::advance(Duration::from_secs(4)).await;
        let (pruned, remaining) = store.prune();
        assert_eq!((pruned, remaining), (0, 1));
        tokio::time::advance(Duration::from_secs(6)).await;
        let (pruned, remaining) = store.prune();
        assert_eq!((pruned, remaining), (1, 0));
    }

    #[test]
    fn cookie_parsing() {
        let header = "a=1; -web-session-=\"abc def\"; b=2";
        assert_eq!(parse_cookie(header, SESSION_COOKIE).as_deref(), Some("abc def"));
        assert_eq!(parse_cookie(header, "b").as_deref(), Some("2"));
        assert_eq!(parse_cookie(header, "missing"), None);
        assert_eq!(parse_cookie(header, ""), None);
    }

    #[test]
    fn cookie_assembly() {
        let v = session_cookie_value("abc", true, true, "Strict");
        assert_eq!(v, "-web-session-=abc; path=/; Secure; HttpOnly; SameSite=Strict");
        let v = session_cookie_value("abc", false, false, "Lax");
        assert_eq!(v, "-web-session-=abc; path=/; SameSite=Lax");
    }
}
