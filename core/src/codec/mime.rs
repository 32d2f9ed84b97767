/*
 * mime.rs
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

//! Mime type by file extension: built-in defaults overlaid by the host's
//! configured mappings.

use std::collections::BTreeMap;
use std::collections::HashMap;

/// Built-in extension to mime-type pairs. Extensions include the dot.
const MIME_TYPES: &[(&str, &str)] = &[
    (".avi", "video/x-msvideo"),
    (".bin", "application/octet-stream"),
    (".class", "application/java"),
    (".css", "text/css"),
    (".eps", "application/postscript"),
    (".gif", "image/gif"),
    (".gz", "application/gzip"),
    (".htm", "text/html"),
    (".html", "text/html"),
    (".ico", "image/vnd.microsoft.icon"),
    (".jar", "application/java"),
    (".jpeg", "image/jpeg"),
    (".jpg", "image/jpeg"),
    (".js", "application/x-javascript"),
    (".json", "application/json"),
    (".mov", "video/quicktime"),
    (".mp4", "video/mp4"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".patch", "application/x-patch"),
    (".pdf", "application/pdf"),
    (".png", "image/png"),
    (".ps", "application/postscript"),
    (".qt", "video/quicktime"),
    (".rtf", "application/rtf"),
    (".svg", "image/svg+xml"),
    (".tgz", "application/x-tgz"),
    (".tif", "image/tiff"),
    (".tiff", "image/tiff"),
    (".txt", "text/plain"),
    (".wav", "audio/x-wav"),
    (".xml", "text/xml"),
    (".z", "application/compress"),
    (".zip", "application/zip"),
];

/// Build the effective mime table: defaults overlaid with config entries.
/// Overlay keys may be given with or without the leading dot.
pub fn build_mime_table(overlay: &BTreeMap<String, String>) -> HashMap<String, String> {
    let mut table: HashMap<String, String> = MIME_TYPES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (ext, mime) in overlay {
        let key = if ext.starts_with('.') {
            ext.clone()
        } else {
            format!(".{}", ext)
        };
        table.insert(key, mime.clone());
    }
    table
}

/// Look up the mime type for an extension (with or without leading dot).
pub fn mime_for_ext<'a>(table: &'a HashMap<String, String>, ext: &str) -> Option<&'a str> {
    let key = if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    };
    table.get(&key).map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overlay() {
        let mut overlay = BTreeMap::new();
        overlay.insert("js".to_string(), "text/javascript".to_string());
        overlay.insert(".wasm".to_string(), "application/wasm".to_string());
        let table = build_mime_table(&overlay);
        assert_eq!(mime_for_ext(&table, "html"), Some("text/html"));
        assert_eq!(mime_for_ext(&table, ".json"), Some("application/json"));
        assert_eq!(mime_for_ext(&table, "js"), Some("text/javascript"));
        assert_eq!(mime_for_ext(&table, "wasm"), Some("application/wasm"));
        assert_eq!(mime_for_ext(&table, "nope"), None);
    }
}
