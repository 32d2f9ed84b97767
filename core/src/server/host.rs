/*
 * host.rs
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

//! The host: configuration snapshot, listeners, route/redirect tables,
//! action registry, mime table, role list and the session store. Routes and
//! redirects are immutable once `start` runs; actions and the hook are
//! registered before start. Each listener accepts sockets and spawns one
//! connection task per socket.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::mime::build_mime_table;
use crate::codec::url::ParsedUrl;
use crate::config::{parse_duration, parse_size, TlsConfig, WebConfig};
use crate::error::WebError;
use crate::net::server_tls_acceptor;
use crate::server::action::{Action, ActionFn};
use crate::server::listener::run_listener;
use crate::server::route::{Redirect, Route};
use crate::server::session::{SessionStore, SESSION_PRUNE_PERIOD};
use crate::server::web::Web;

/// Request lifecycle events observable through the host hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// New socket connection.
    Connect,
    /// Connection finished.
    Disconnect,
    /// Request headers parsed.
    Start,
    /// Request ready to run; the hook may complete it.
    Run,
    /// An action is about to run.
    Action,
    /// No route or document matched.
    NotFound,
    /// A request error was issued.
    Error,
    /// Request finished.
    End,
}

/// Host lifecycle hook. Set one with [`WebHost::set_hook`]; it may write a
/// response and mark the request complete to short-circuit handling.
pub type HookFn = Arc<
    dyn for<'a> Fn(&'a mut Web, HookEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>
        + Send
        + Sync,
>;

/// Process-wide (or per-server-instance) web host.
pub struct WebHost {
    pub(crate) docs: PathBuf,
    pub(crate) index: String,
    pub(crate) name: Option<String>,

    pub(crate) parse_timeout: Option<Duration>,
    pub(crate) inactivity_timeout: Option<Duration>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) session_timeout: Duration,

    pub(crate) max_header: usize,
    pub(crate) max_body: u64,
    pub(crate) max_upload: u64,
    pub(crate) max_connections: u64,

    pub(crate) same_site: String,
    pub(crate) http_only: bool,
    pub(crate) upload_dir: PathBuf,
    pub(crate) upload_remove: bool,

    pub(crate) roles: Vec<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) mime_table: HashMap<String, String>,
    pub(crate) routes: Vec<Route>,
    pub(crate) redirects: Vec<Redirect>,
    pub(crate) actions: RwLock<Vec<Action>>,
    pub(crate) sessions: SessionStore,
    pub(crate) hook: RwLock<Option<HookFn>>,

    pub(crate) connections: AtomicI64,
    conn_seq: AtomicI64,

    listen: Vec<String>,
    tls: Option<TlsConfig>,
    shutdown: watch::Sender<bool>,
    bound: Mutex<Vec<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebHost {
    /// Build a host from configuration. Routes, redirects and the mime
    /// table compile here; nothing listens until `start`.
    pub fn new(config: WebConfig) -> Result<Arc<WebHost>, WebError> {
        let mut routes = Vec::with_capacity(config.routes.len());
        for rc in &config.routes {
            routes.push(Route::from_config(rc)?);
        }
        if routes.is_empty() {
            routes.push(Route::from_config(&Default::default())?);
        }
        let mut redirects = Vec::with_capacity(config.redirect.len());
        for rc in &config.redirect {
            redirects.push(Redirect::from_config(rc)?);
        }
        let session_timeout = parse_duration(&config.timeouts.session)?
            .unwrap_or_else(|| Duration::from_secs(30 * 60));
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(WebHost {
            docs: PathBuf::from(&config.documents),
            index: config.index.clone(),
            name: config.name.clone(),
            parse_timeout: parse_duration(&config.timeouts.parse)?,
            inactivity_timeout: parse_duration(&config.timeouts.inactivity)?,
            request_timeout: parse_duration(&config.timeouts.request)?,
            session_timeout,
            max_header: parse_size(&config.limits.header)? as usize,
            max_body: parse_size(&config.limits.body)?,
            max_upload: parse_size(&config.limits.upload)?,
            max_connections: config.limits.connections,
            same_site: config.sessions.same_site.clone(),
            http_only: config.sessions.http_only,
            upload_dir: PathBuf::from(&config.upload.dir),
            upload_remove: config.upload.remove,
            roles: config.auth.roles.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            mime_table: build_mime_table(&config.mime),
            routes,
            redirects,
            actions: RwLock::new(Vec::new()),
            sessions: SessionStore::new(config.limits.sessions),
            hook: RwLock::new(None),
            connections: AtomicI64::new(0),
            conn_seq: AtomicI64::new(0),
            listen: config.listen.clone(),
            tls: config.tls.clone(),
            shutdown,
            bound: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Bind an in-process callback to a URL prefix, optionally requiring a
    /// role. Actions are matched in registration order.
    pub fn add_action(&self, prefix: &str, role: Option<&str>, func: ActionFn) {
        self.actions.write().unwrap().push(Action {
            prefix: prefix.to_string(),
            role: role.map(|r| r.to_string()),
            func,
        });
    }

    /// Install the lifecycle hook.
    pub fn set_hook(&self, hook: HookFn) {
        *self.hook.write().unwrap() = Some(hook);
    }

    /// Numeric privilege of a role; roles are declared in ascending order.
    pub(crate) fn role_id(&self, role: &str) -> Option<usize> {
        self.roles.iter().position(|r| r == role)
    }

    pub(crate) fn next_conn(&self) -> i64 {
        self.conn_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind every configured listener and start serving. Returns the bound
    /// addresses (useful with port zero).
    pub async fn start(self: &Arc<Self>) -> Result<Vec<SocketAddr>, WebError> {
        let mut bound = Vec::new();
        let mut tasks = Vec::new();

        for endpoint in &self.listen {
            let parsed = ParsedUrl::parse(endpoint)
                .ok_or_else(|| WebError::Config(format!("bad listen endpoint: {}", endpoint)))?;
            let scheme = parsed.scheme.as_deref().unwrap_or("http");
            let secure = scheme == "https";
            let host = parsed.host.clone().unwrap_or_else(|| "0.0.0.0".to_string());
            // An explicit :0 asks the OS for an ephemeral port
            let port = if parsed.explicit_port {
                parsed.port
            } else {
                parsed.effective_port()
            };

            let listener = tokio::net::TcpListener::bind((host.as_str(), port))
                .await
                .map_err(WebError::Io)?;
            let addr = listener.local_addr().map_err(WebError::Io)?;
            bound.push(addr);

            let acceptor = if secure {
                let tls = self
                    .tls
                    .as_ref()
                    .ok_or_else(|| WebError::Config("https listener without tls config".into()))?;
                Some(server_tls_acceptor(&tls.certificate, &tls.key).map_err(WebError::Io)?)
            } else {
                None
            };
            tracing::info!(target: "web", %addr, scheme, "listening");
            tasks.push(tokio::spawn(run_listener(
                self.clone(),
                listener,
                acceptor,
                self.shutdown.subscribe(),
            )));
        }

        // Session sweeper
        let host = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SESSION_PRUNE_PERIOD) => {
                        let (pruned, remaining) = host.sessions.prune();
                        if pruned > 0 || remaining > 0 {
                            tracing::debug!(target: "web", pruned, remaining, "session sweep");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));

        *self.bound.lock().unwrap() = bound.clone();
        *self.tasks.lock().unwrap() = tasks;
        Ok(bound)
    }

    /// Addresses bound by `start`.
    pub fn bound_addrs(&self) -> Vec<SocketAddr> {
        self.bound.lock().unwrap().clone()
    }

    /// Stop accepting connections and the session sweeper. In-flight
    /// connections finish their current request loop on their own.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Live connection count.
    pub fn connection_count(&self) -> i64 {
        self.connections.load(Ordering::Relaxed)
    }
}

impl Drop for WebHost {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
