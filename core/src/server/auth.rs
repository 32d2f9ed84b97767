/*
 * auth.rs
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

//! Session-backed authentication and linear-role authorization. The
//! authenticated username and role live in session variables; roles map to
//! numeric ids by their position in the host's role list (ascending
//! privilege), so `can` is an integer comparison.

use std::io;

use crate::server::session::{
    parse_cookie, session_cookie_value, SESSION_COOKIE, SESSION_ROLE, SESSION_USERNAME,
};
use crate::server::web::Web;

impl Web {
    /// Resolve the session referenced by the request cookie, if any.
    /// Renews the session expiry when found.
    pub fn get_session(&mut self) -> Option<String> {
        if let Some(id) = &self.session_id {
            return Some(id.clone());
        }
        let cookie = self.cookie.as_deref()?;
        let id = parse_cookie(cookie, SESSION_COOKIE)?;
        if self.host.sessions.touch(&id) {
            self.session_id = Some(id.clone());
            Some(id)
        } else {
            None
        }
    }

    /// Create a fresh session, destroying any current one, and emit the
    /// session `Set-Cookie`. `None` when the session ceiling is reached.
    pub fn create_session(&mut self) -> Option<String> {
        self.destroy_session();
        let id = self.host.sessions.create(self.host.session_timeout)?;
        let cookie = session_cookie_value(
            &id,
            self.is_secure(),
            self.host.http_only,
            &self.host.same_site,
        );
        self.append_header("Set-Cookie", &cookie);
        self.session_id = Some(id.clone());
        Some(id)
    }

    /// Destroy the request's session, if it resolves to one.
    pub fn destroy_session(&mut self) {
        if let Some(id) = self.get_session() {
            self.host.sessions.destroy(&id);
        }
        self.session_id = None;
    }

    /// Read a session variable.
    pub fn session_var(&mut self, key: &str) -> Option<String> {
        let id = self.get_session()?;
        self.host.sessions.get_var(&id, key)
    }

    /// Write a session variable, creating the session if needed. False when
    /// no session could be created.
    pub fn set_session_var(&mut self, key: &str, value: &str) -> bool {
        let id = match self.get_session() {
            Some(id) => id,
            None => match self.create_session() {
                Some(id) => id,
                None => return false,
            },
        };
        self.host.sessions.set_var(&id, key, value)
    }

    pub fn remove_session_var(&mut self, key: &str) {
        if let Some(id) = self.get_session() {
            self.host.sessions.remove_var(&id, key);
        }
    }

    /// Authenticate from the session cookie. The result is cached for the
    /// request; on success the username, role and role id are populated.
    pub fn authenticate(&mut self) -> bool {
        if self.auth_checked {
            return self.authenticated;
        }
        self.auth_checked = true;

        if self.cookie.is_none() || self.get_session().is_none() {
            return false;
        }
        let username = match self.session_var(SESSION_USERNAME) {
            Some(u) => u,
            None => return false,
        };
        let role = match self.session_var(SESSION_ROLE) {
            Some(r) => r,
            None => return false,
        };
        match self.host.role_id(&role) {
            Some(role_id) => {
                self.username = Some(username);
                self.role = Some(role);
                self.role_id = Some(role_id);
                self.authenticated = true;
                true
            }
            None => {
                tracing::error!(target: "web", role = %role, "unknown role in session");
                false
            }
        }
    }

    pub fn is_authenticated(&mut self) -> bool {
        if !self.auth_checked {
            return self.authenticate();
        }
        self.authenticated
    }

    /// Check the authenticated user's role against a required role. An
    /// empty requirement always passes. Failure responds 401 and returns
    /// false.
    pub async fn can(&mut self, required_role: &str) -> io::Result<bool> {
        if required_role.is_empty() {
            return Ok(true);
        }
        if !self.authenticated && !self.authenticate() {
            self.error(401, "Access Denied. User not logged in.").await?;
            return Ok(false);
        }
        let required = self.host.role_id(required_role);
        if required.is_none() {
            tracing::error!(target: "web", role = required_role, "unknown role");
        }
        match (required, self.role_id) {
            (Some(required), Some(mine)) if mine >= required => Ok(true),
            _ => {
                self.error(401, "Authorization Denied.").await?;
                Ok(false)
            }
        }
    }

    /// Log a user in with a role, creating the login session and cookie.
    /// The caller is responsible for having verified credentials.
    pub fn login(&mut self, username: &str, role: &str) -> bool {
        self.username = None;
        self.role = None;
        self.role_id = None;
        self.remove_session_var(SESSION_USERNAME);

        let role_id = match self.host.role_id(role) {
            Some(id) => id,
            None => {
                tracing::error!(target: "web", role, "unknown role");
                return false;
            }
        };
        if self.create_session().is_none() {
            return false;
        }
        self.set_session_var(SESSION_USERNAME, username);
        self.set_session_var(SESSION_ROLE, role);
        self.username = Some(username.to_string());
        self.role = Some(role.to_string());
        self.role_id = Some(role_id);
        self.authenticated = true;
        self.auth_checked = true;
        tracing::trace!(target: "web", username, role, "login");
        true
    }

    /// Log the user out and destroy the session.
    pub fn logout(&mut self) {
        self.username = None;
        self.role = None;
        self.role_id = None;
        self.authenticated = false;
        self.remove_session_var(SESSION_USERNAME);
        self.destroy_session();
    }
}
