/*
 * file.rs
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

//! File handler: GET/HEAD serve documents under the document root with
//! conditional-GET validators, PUT stores, DELETE unlinks. Directories
//! redirect to their trailing-slash form and then serve the index. POST is
//! served as GET.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::http::buffer::BUFSIZE;
use crate::server::host::HookEvent;
use crate::server::web::Web;

pub(crate) async fn file_handler(web: &mut Web) -> io::Result<()> {
    let rel = web.path.trim_start_matches('/').to_string();
    let path = web.host.docs.join(rel);
    let meta = tokio::fs::metadata(&path).await.ok();
    web.exists = meta.is_some();

    match web.method.as_str() {
        "GET" | "HEAD" | "POST" => get_file(web, path, meta).await,
        "PUT" => put_file(web, path).await,
        "DELETE" => delete_file(web, path).await,
        _ => web.error(405, "Unsupported method").await,
    }
}

async fn get_file(
    web: &mut Web,
    mut path: PathBuf,
    mut meta: Option<std::fs::Metadata>,
) -> io::Result<()> {
    if !web.exists {
        web.run_hook(HookEvent::NotFound).await;
        if !web.complete {
            return web.error(404, "Cannot locate document").await;
        }
        return Ok(());
    }
    if meta.as_ref().map(|m| m.is_dir()).unwrap_or(false) {
        if !web.path.ends_with('/') {
            // External redirect preserving query and hash
            return redirect_to_dir(web).await;
        }
        // Internal rewrite to the directory index
        path = path.join(&web.host.index);
        meta = tokio::fs::metadata(&path).await.ok();
        web.exists = meta.is_some();
        if !web.exists {
            return web.error(404, "Cannot locate document").await;
        }
    }
    set_ext_from_path(web, &path);

    let meta = match meta {
        Some(m) => m,
        None => return web.error(404, "Cannot locate document").await,
    };
    let mtime = meta.modified().ok();
    let size = meta.len();

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return web.error(404, "Cannot open document").await,
    };

    let not_modified = match (web.since, mtime) {
        (Some(since), Some(mtime)) => mtime <= since,
        _ => false,
    };
    if not_modified {
        web.tx_len = 0;
        web.status = 304;
    } else {
        web.status = 200;
        web.tx_len = size as i64;
    }
    if let Some(mtime) = mtime {
        web.add_header("Last-Modified", &crate::codec::date::format_http_date(mtime));
    }
    let mtime_secs = mtime
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let ino = inode_of(&meta).unwrap_or_else(|| sum_path(&path));
    web.add_header("ETag", &format!("{}", ino + size as i64 + mtime_secs));

    if web.method == "HEAD" {
        web.write_headers().await?;
        web.complete = true;
        return Ok(());
    }
    if not_modified {
        return web.finalize().await;
    }
    send_file(web, &mut file).await
}

/// Stream the document in fixed-size chunks through the tx pipeline.
async fn send_file(web: &mut Web, file: &mut tokio::fs::File) -> io::Result<()> {
    let mut written: i64 = 0;
    let mut buf = [0u8; BUFSIZE];
    while written < web.tx_len {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => return web.error(404, "Cannot read document").await,
        };
        if web.write(&buf[..n]).await.is_err() {
            return Err(web.net_error("cannot send file").await);
        }
        written += n as i64;
    }
    Ok(())
}

/// External 301 to the trailing-slash form of a directory URL.
async fn redirect_to_dir(web: &mut Web) -> io::Result<()> {
    let mut target = format!("{}/", web.path);
    if let Some(query) = &web.query {
        target.push('?');
        target.push_str(query);
    }
    if let Some(hash) = &web.hash {
        target.push('#');
        target.push_str(hash);
    }
    web.redirect(301, &target).await
}

async fn put_file(web: &mut Web, path: PathBuf) -> io::Result<()> {
    let existed = web.exists;
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .await
    {
        Ok(f) => f,
        Err(_) => return web.error(404, "Cannot open document").await,
    };
    // Non-streaming routes pre-buffer the body; write that, then any rest
    let buffered = web.body.split();
    if !buffered.is_empty() && file.write_all(&buffered).await.is_err() {
        return web.error(500, "Cannot put document").await;
    }
    let mut buf = [0u8; BUFSIZE];
    loop {
        let n = web.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if file.write_all(&buf[..n]).await.is_err() {
            return web.error(500, "Cannot put document").await;
        }
    }
    let _ = file.flush().await;
    let status = if existed { 204 } else { 201 };
    web.write_response(status, "Document successfully updated").await
}

async fn delete_file(web: &mut Web, path: PathBuf) -> io::Result<()> {
    if !web.exists {
        return web.error(404, "Cannot locate document").await;
    }
    let _ = tokio::fs::remove_file(&path).await;
    web.write_response(204, "Document successfully deleted").await
}

fn set_ext_from_path(web: &mut Web, path: &Path) {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        web.ext = Some(format!(".{}", ext));
        web.mime = None;
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> Option<i64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino() as i64)
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> Option<i64> {
    None
}

/// Deterministic stand-in for the inode where one is unavailable.
fn sum_path(path: &Path) -> i64 {
    path.to_string_lossy().bytes().map(|b| b as i64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_sum_is_deterministic() {
        let a = sum_path(Path::new("/docs/a.html"));
        let b = sum_path(Path::new("/docs/a.html"));
        assert_eq!(a, b);
        assert_ne!(a, sum_path(Path::new("/docs/b.html")));
    }

}
