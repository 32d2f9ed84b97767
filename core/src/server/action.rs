/*
 * action.rs
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

//! Action registry: URL prefix to async callback with an optional required
//! role. Scanned in registration order after routing; the first prefix
//! match with a satisfied role runs.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use crate::server::web::Web;

/// Boxed async request callback. Wrap an async closure with [`action_fn`].
pub type ActionFn = Arc<
    dyn for<'a> Fn(&'a mut Web) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>
        + Send
        + Sync,
>;

/// One registered action.
#[derive(Clone)]
pub struct Action {
    pub prefix: String,
    pub role: Option<String>,
    pub func: ActionFn,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("prefix", &self.prefix)
            .field("role", &self.role)
            .finish()
    }
}

/// Wrap a `|web| Box::pin(async move { .. })` closure as an [`ActionFn`].
pub fn action_fn<F>(f: F) -> ActionFn
where
    F: for<'a> Fn(&'a mut Web) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}
