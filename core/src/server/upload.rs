/*
 * upload.rs
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

//! Streaming multipart/form-data parser. Parts stream to temp files as the
//! boundary scanner advances, holding back two bytes in case they are the
//! CRLF before the next boundary; form fields without a filename accumulate
//! as request variables. Temp files are created mode 0600 with a random
//! suffix and removed when the request context is dropped, unless the host
//! retains them.

use std::io;
use std::path::PathBuf;

use bytes::Buf;
use tokio::io::AsyncWriteExt;

use crate::codec::escape::{decode, validate_uri_chars};
use crate::codec::path::normalize_path;
use crate::http::buffer::buffer_until;
use crate::server::web::Web;

/// Bytes a client filename may not contain.
const FORBIDDEN_FILENAME_CHARS: &[char] = &[
    '\\', '/', ':', '*', '?', '<', '>', '|', '~', '"', '\'', '%', '`', '^', '\n', '\r', '\t',
    '\x0c',
];

/// One uploaded part: metadata plus the temp file receiving its bytes.
#[derive(Debug)]
pub struct Upload {
    /// Form field name.
    pub name: String,
    /// Client-supplied filename, sanitized.
    pub client_filename: String,
    /// Part content type, when given.
    pub content_type: Option<String>,
    /// Temp file path holding the part body.
    pub path: PathBuf,
    pub(crate) file: Option<tokio::fs::File>,
    /// Bytes written to the temp file.
    pub size: u64,
}

impl Upload {
    /// Close and unlink the temp file.
    pub(crate) async fn discard(&mut self) {
        self.file.take();
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

/// Part metadata parsed from the part's mime headers.
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl Web {
    /// Prime the upload subsystem from a `multipart/form-data` content
    /// type. Responds 400 and fails when the boundary is missing.
    pub(crate) async fn init_upload(&mut self, content_type: &str) -> io::Result<()> {
        let boundary = content_type
            .split(';')
            .map(str::trim)
            .find_map(|p| p.strip_prefix("boundary="))
            .map(|b| b.trim_matches('"'))
            .filter(|b| !b.is_empty());
        match boundary {
            Some(b) => {
                self.boundary = Some(format!("--{}", b).into_bytes());
                Ok(())
            }
            None => {
                self.error(400, "Bad boundary").await?;
                Err(io::Error::new(io::ErrorKind::InvalidData, "bad boundary"))
            }
        }
    }

    /// Parse the multipart body: per part, scan to the boundary, parse the
    /// part headers, then stream the part body to its temp file or collect
    /// it as a form variable. Failures that produce a response leave
    /// `complete` set and return Ok; wire-level failures compromise the
    /// connection.
    pub(crate) async fn process_upload(&mut self) -> io::Result<()> {
        let boundary = match self.boundary.clone() {
            Some(b) => b,
            None => return Ok(()),
        };
        loop {
            // Scan past the next boundary
            let n = match buffer_until(
                &mut self.stream,
                &mut self.rx,
                &boundary,
                self.host.max_header,
                false,
                self.deadline,
            )
            .await
            {
                Ok(n) => n,
                Err(_) => return Err(self.net_error("bad upload request boundary").await),
            };
            self.rx.advance(n);

            // A CRLF means another part; "--" is the terminator
            let mut suffix = [0u8; 2];
            self.read_body_exact(&mut suffix).await?;
            if &suffix != b"\r\n" {
                if &suffix == b"--" {
                    let mut last = [0u8; 2];
                    self.read_body_exact(&mut last).await?;
                    if &last != b"\r\n" {
                        return Err(self.net_error("bad upload request trailer").await);
                    }
                    break;
                }
                return Err(self.net_error("bad upload request trailer").await);
            }

            let part = match self.process_part_headers().await? {
                Some(part) => part,
                None => return Ok(()),
            };
            if !self.process_part_body(&boundary, part).await? {
                return Ok(());
            }
        }
        self.body_state.remaining = 0;
        self.body_state.chunk_remaining = 0;
        Ok(())
    }

    /// Parse one part's mime headers. Only Content-Disposition and
    /// Content-Type are accepted. Returns None when a response was issued.
    async fn process_part_headers(&mut self) -> io::Result<Option<PartHeaders>> {
        let n = match buffer_until(
            &mut self.stream,
            &mut self.rx,
            b"\r\n\r\n",
            self.host.max_header,
            false,
            self.deadline,
        )
        .await
        {
            Ok(n) => n,
            Err(_) => return Err(self.net_error("bad upload headers").await),
        };
        let head = self.rx.split_to(n);
        let block = match crate::http::headers::HeaderBlock::parse(&head[..n - 2]) {
            Ok(b) => b,
            Err(_) => return Err(self.net_error("bad upload headers").await),
        };

        let mut part = PartHeaders {
            name: None,
            filename: None,
            content_type: None,
        };
        for (key, value) in block.iter() {
            if key.eq_ignore_ascii_case("content-disposition") {
                for field in value.split(';') {
                    let field = field.trim();
                    if let Some((fname, fvalue)) = field.split_once('=') {
                        let fvalue = fvalue.trim().trim_matches('"');
                        if fname.eq_ignore_ascii_case("name") {
                            part.name = Some(fvalue.to_string());
                        } else if fname.eq_ignore_ascii_case("filename") {
                            part.filename = Some(fvalue.to_string());
                        }
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                part.content_type = Some(value.trim().to_string());
            } else {
                return Err(self.net_error("bad upload headers").await);
            }
        }
        if part.name.is_none() && part.filename.is_none() {
            return Err(self.net_error("bad multipart mime headers").await);
        }
        if let Some(filename) = &part.filename {
            match sanitize_filename(filename) {
                Some(clean) => part.filename = Some(clean),
                None => {
                    self.error(400, "Bad upload client filename").await?;
                    return Ok(None);
                }
            }
        }
        Ok(Some(part))
    }

    /// Stream one part body. True to continue with the next part; false
    /// when a response was issued.
    async fn process_part_body(&mut self, boundary: &[u8], part: PartHeaders) -> io::Result<bool> {
        let field_name = part.name.clone().unwrap_or_default();
        let mut upload = if let Some(client_filename) = part.filename.clone() {
            let path = self.host.upload_dir.join(temp_name());
            let file = match open_upload_file(&path).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!(target: "web", error = %e, path = %path.display(), "cannot create upload temp file");
                    self.error(500, "Cannot create upload temp file").await?;
                    return Ok(false);
                }
            };
            tracing::trace!(
                target: "web",
                client = %client_filename,
                stored = %path.display(),
                "file upload"
            );
            Some(Upload {
                name: field_name.clone(),
                client_filename,
                content_type: part.content_type.clone(),
                path,
                file: Some(file),
                size: 0,
            })
        } else {
            None
        };
        let mut field_value: Vec<u8> = Vec::new();

        loop {
            let n = match buffer_until(
                &mut self.stream,
                &mut self.rx,
                boundary,
                self.host.max_body as usize,
                true,
                self.deadline,
            )
            .await
            {
                Ok(n) => n,
                Err(_) => return Err(self.net_error("bad upload request boundary").await),
            };
            match &mut upload {
                Some(upload) => {
                    // Hold back two bytes; they may be the CRLF before the
                    // boundary. With the boundary in view, exclude it and
                    // the CRLF outright but leave both buffered.
                    let avail = if n > 0 { n - boundary.len() } else { self.rx.len() };
                    let len = avail.saturating_sub(2);
                    if len > 0 {
                        if upload.size + len as u64 > self.host.max_upload {
                            upload.discard().await;
                            self.error(414, "Uploaded file exceeds maximum").await?;
                            return Ok(false);
                        }
                        let data = self.rx.split_to(len);
                        let write_failed = match upload.file.as_mut() {
                            Some(file) => file.write_all(&data).await.is_err(),
                            None => true,
                        };
                        if write_failed {
                            upload.discard().await;
                            self.error(500, "Cannot write uploaded file").await?;
                            return Ok(false);
                        }
                        upload.size += len as u64;
                    }
                }
                None => {
                    if n == 0 {
                        self.error(414, "Uploaded form field is too big").await?;
                        return Ok(false);
                    }
                    let datalen = match (n - boundary.len()).checked_sub(2) {
                        Some(d) => d,
                        None => return Err(self.net_error("bad upload part").await),
                    };
                    field_value.extend_from_slice(&self.rx[..datalen]);
                    // Consume up to the boundary, leaving it for the scanner
                    self.rx.advance(n - boundary.len());
                }
            }
            if n > 0 {
                break;
            }
        }

        if let Some(mut upload) = upload {
            if let Some(file) = upload.file.as_mut() {
                let _ = file.flush().await;
            }
            upload.file.take();
            self.uploads.insert(upload.name.clone(), upload);
        } else {
            let text = String::from_utf8_lossy(&field_value).into_owned();
            let decoded = decode(&text);
            self.set_var(&field_name, &decoded);
        }
        Ok(true)
    }

    /// Read exactly `buf.len()` body bytes.
    pub(crate) async fn read_body_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(self.net_error("short upload body").await);
            }
            filled += n;
        }
        Ok(())
    }
}

/// Validate and normalize a client filename: no leading dot, URI-legal
/// bytes only, none of the forbidden separator/quote characters.
fn sanitize_filename(filename: &str) -> Option<String> {
    let normalized = normalize_path(&format!("/{}", filename))?;
    let clean = normalized.trim_start_matches('/').to_string();
    if clean.is_empty() || clean.starts_with('.') {
        return None;
    }
    if !validate_uri_chars(&clean) {
        return None;
    }
    if clean.contains(FORBIDDEN_FILENAME_CHARS) {
        return None;
    }
    Some(clean)
}

fn temp_name() -> String {
    format!("web-{:016x}.tmp", rand::random::<u64>())
}

#[cfg(unix)]
async fn open_upload_file(path: &std::path::Path) -> io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await
}

#[cfg(not(unix))]
async fn open_upload_file(path: &std::path::Path) -> io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_sanitized() {
        assert_eq!(sanitize_filename("photo.png").as_deref(), Some("photo.png"));
        assert_eq!(sanitize_filename("a+b.txt").as_deref(), Some("a+b.txt"));
        // Leading dot, traversal and separators rejected
        assert_eq!(sanitize_filename(".hidden"), None);
        assert_eq!(sanitize_filename("../../etc/passwd"), None);
        assert_eq!(sanitize_filename("dir/file.txt"), None);
        assert_eq!(sanitize_filename("a\\b"), None);
        assert_eq!(sanitize_filename("a:b"), None);
        assert_eq!(sanitize_filename("a*b"), None);
        assert_eq!(sanitize_filename("name%00"), None);
        assert_eq!(sanitize_filename("sp ace.txt"), None);
        assert_eq!(sanitize_filename(""), None);
    }
}
