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

//! The request server: host, listeners, the per-connection engine, routing,
//! sessions, authentication, uploads and the file handler.

pub mod action;
pub mod auth;
pub mod file;
pub mod host;
pub mod listener;
pub mod route;
pub mod session;
pub mod upload;
pub mod web;

pub use self::action::{action_fn, Action, ActionFn};
pub use self::host::{HookEvent, HookFn, WebHost};
pub use self::route::{Redirect, Route, RouteHandler};
pub use self::session::{SessionStore, SESSION_COOKIE};
pub use self::upload::Upload;
pub use self::web::Web;
