/*
 * server_integration.rs
 * Copyright (C) 2026 Emberweb contributors
 *
 * Integration tests driving a real listener on loopback with the crate's
 * own URL client: static files with validators, keep-alive reuse, sessions
 * and roles, chunked bodies, multipart upload with temp-file cleanup, SSE
 * and WebSocket echo, and path traversal rejection.
 */

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use emberweb_core::client::url::Url;
use emberweb_core::config::WebConfig;
use emberweb_core::server::action_fn;
use emberweb_core::server::host::WebHost;
use emberweb_core::ws::MessageKind;

struct TestServer {
    host: Arc<WebHost>,
    port: u16,
    #[allow(dead_code)]
    docs: tempfile::TempDir,
    #[allow(dead_code)]
    uploads: tempfile::TempDir,
}

impl TestServer {
    fn uri(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.host.stop();
    }
}

async fn start_server() -> TestServer {
    let docs = tempfile::tempdir().unwrap();
    let uploads = tempfile::tempdir().unwrap();
    std::fs::write(docs.path().join("index.html"), "Hello /index.html").unwrap();

    let config: WebConfig = serde_json::from_value(serde_json::json!({
        "listen": ["http://127.0.0.1:0"],
        "documents": docs.path().to_str().unwrap(),
        "index": "index.html",
        "timeouts": { "parse": "10secs", "inactivity": "30secs", "request": "1min" },
        "limits": { "header": "10K", "body": "200K", "upload": "64K", "sessions": 10 },
        "upload": { "dir": uploads.path().to_str().unwrap() },
        "auth": { "roles": ["user", "admin"] },
        "routes": [
            { "match": "/test/stream", "handler": "action", "stream": true },
            { "match": "/test/", "handler": "action" },
            { "match": "/admin/", "handler": "action", "role": "admin" },
            { "match": "/closed", "handler": "action", "methods": ["GET"] },
            { "match": "/", "handler": "file" }
        ]
    }))
    .unwrap();

    let host = WebHost::new(config).unwrap();
    register_actions(&host);
    let bound = host.start().await.unwrap();
    TestServer {
        host,
        port: bound[0].port(),
        docs,
        uploads,
    }
}

fn register_actions(host: &Arc<WebHost>) {
    host.add_action(
        "/test/show",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let body = format!("conn={} reuse={}", web.conn, web.reuse);
                web.write_response(200, &body).await
            })
        }),
    );
    host.add_action(
        "/test/success",
        None,
        action_fn(|web| Box::pin(async move { web.write_response(200, "success\n").await })),
    );
    host.add_action(
        "/test/login",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let role = web.qvar("role").unwrap_or("user").to_string();
                if web.login("alice", &role) {
                    web.write_response(200, "logged-in").await
                } else {
                    web.error(400, "bad role").await
                }
            })
        }),
    );
    host.add_action(
        "/test/session/create",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let token = format!("token-{}", web.conn);
                web.set_session_var("token", &token);
                web.write_response(200, &token).await
            })
        }),
    );
    host.add_action(
        "/test/session/check",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let expected = web.qvar("token").map(str::to_string);
                let stored = web.session_var("token");
                if stored.is_some() && stored == expected {
                    web.write_response(200, "success").await
                } else {
                    web.write_response(200, "failure").await
                }
            })
        }),
    );
    host.add_action(
        "/test/event",
        None,
        action_fn(|web| {
            Box::pin(async move {
                web.set_content_type("text/event-stream");
                for i in 0..100u64 {
                    web.write_sse_event(Some(i), None, &format!("event {}", i)).await?;
                }
                web.finalize().await
            })
        }),
    );
    host.add_action(
        "/test/stream",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let mut total = 0usize;
                let mut buf = [0u8; 4096];
                loop {
                    let n = web.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
                web.write_response(200, &format!("{{\"length\": {}}}", total)).await
            })
        }),
    );
    host.add_action(
        "/test/upload/",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let mut parts: Vec<serde_json::Value> = Vec::new();
                for upload in web.uploads.values() {
                    let on_disk = tokio::fs::read(&upload.path).await.unwrap_or_default();
                    parts.push(serde_json::json!({
                        "name": upload.name,
                        "filename": upload.client_filename,
                        "size": upload.size,
                        "path": upload.path.to_str(),
                        "disk_len": on_disk.len(),
                    }));
                }
                parts.sort_by_key(|p| p["name"].as_str().unwrap_or("").to_string());
                let body = serde_json::json!({
                    "description": web.var("description"),
                    "uploads": parts,
                })
                .to_string();
                web.set_content_type("application/json");
                web.write_response(200, &body).await
            })
        }),
    );
    host.add_action(
        "/test/ws/",
        None,
        action_fn(|web| {
            Box::pin(async move {
                let mut ws = web.upgrade_web_socket().await?;
                while let Some((kind, data)) = ws.recv().await? {
                    match kind {
                        MessageKind::Text => {
                            ws.send(std::str::from_utf8(&data).unwrap_or("")).await?
                        }
                        MessageKind::Binary => ws.send_binary(&data).await?,
                    }
                }
                Ok(())
            })
        }),
    );
    host.add_action(
        "/admin/check",
        None,
        action_fn(|web| Box::pin(async move { web.write_response(200, "admin-ok").await })),
    );
    host.add_action(
        "/closed",
        None,
        action_fn(|web| Box::pin(async move { web.write_response(200, "closed-route").await })),
    );
}

fn cookie_header(set_cookie: &str) -> String {
    // Reflect only the name=value pair back, like a browser
    let pair = set_cookie.split(';').next().unwrap_or("");
    format!("Cookie: {}\r\n", pair)
}

#[tokio::test]
async fn static_get_with_validators() {
    let server = start_server().await;
    let mut url = Url::new();
    let status = url
        .fetch("GET", &server.uri("/index.html"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.response_header("Content-Length"), Some("17"));
    assert!(url.response_header("ETag").is_some());
    assert!(url.response_header("Last-Modified").is_some());
    assert_eq!(url.response_header("Content-Type"), Some("text/html"));
    let body = url.get_response().await.unwrap();
    assert!(body.contains("Hello /index.html"));
}

#[tokio::test]
async fn directory_redirect_and_index() {
    let server = start_server().await;
    // "/" serves the directory index directly
    let body = Url::get(&server.uri("/"), None).await.unwrap();
    assert!(body.contains("Hello /index.html"));
}

#[tokio::test]
async fn conditional_get_not_modified() {
    let server = start_server().await;
    let mut url = Url::new();
    let status = url
        .fetch(
            "GET",
            &server.uri("/index.html"),
            b"",
            Some("If-Modified-Since: Fri, 01 Jan 2100 00:00:00 GMT\r\n"),
        )
        .await
        .unwrap();
    assert_eq!(status, 304);
    let body = url.get_response().await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn head_has_length_but_no_body() {
    let server = start_server().await;
    let mut url = Url::new();
    let status = url
        .fetch("HEAD", &server.uri("/index.html"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.response_header("Content-Length"), Some("17"));
    assert_eq!(url.get_response().await.unwrap(), "");
}

#[tokio::test]
async fn put_delete_lifecycle() {
    let server = start_server().await;
    let mut url = Url::new();
    let status = url
        .fetch("PUT", &server.uri("/note.txt"), b"first version", None)
        .await
        .unwrap();
    assert_eq!(status, 201);
    url.get_response().await.unwrap();

    let status = url
        .fetch("PUT", &server.uri("/note.txt"), b"second version", None)
        .await
        .unwrap();
    assert_eq!(status, 204);
    url.get_response().await.unwrap();

    let body = Url::get(&server.uri("/note.txt"), None).await.unwrap();
    assert_eq!(body, "second version");

    let status = url
        .fetch("DELETE", &server.uri("/note.txt"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 204);
    url.get_response().await.unwrap();

    let status = url
        .fetch("GET", &server.uri("/note.txt"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 404);
}

#[tokio::test]
async fn keep_alive_reuses_connection() {
    let server = start_server().await;
    let mut url = Url::new();

    url.fetch("GET", &server.uri("/test/show"), b"", None).await.unwrap();
    let first = url.get_response().await.unwrap();

    url.fetch("GET", &server.uri("/test/show"), b"", None).await.unwrap();
    let second = url.get_response().await.unwrap();

    let parse = |s: &str| -> (i64, u64) {
        let mut conn = 0;
        let mut reuse = 0;
        for token in s.split_whitespace() {
            if let Some(v) = token.strip_prefix("conn=") {
                conn = v.parse().unwrap();
            } else if let Some(v) = token.strip_prefix("reuse=") {
                reuse = v.parse().unwrap();
            }
        }
        (conn, reuse)
    };
    let (conn1, reuse1) = parse(&first);
    let (conn2, reuse2) = parse(&second);
    assert_eq!(conn1, conn2, "same connection id across keep-alive requests");
    assert_eq!(reuse2, reuse1 + 1, "reuse counter increments by one");
}

#[tokio::test]
async fn session_round_trip() {
    let server = start_server().await;
    let mut url = Url::new();
    let status = url
        .fetch("GET", &server.uri("/test/session/create"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 200);
    let set_cookie = url
        .response_header("Set-Cookie")
        .expect("session cookie issued")
        .to_string();
    assert!(set_cookie.starts_with("-web-session-="));
    assert!(set_cookie.contains("SameSite="));
    let token = url.get_response().await.unwrap();

    let headers = cookie_header(&set_cookie);
    let status = url
        .fetch(
            "GET",
            &format!("{}?token={}", server.uri("/test/session/check"), token),
            b"",
            Some(&headers),
        )
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.get_response().await.unwrap(), "success");

    // Without the cookie the check fails
    let status = url
        .fetch(
            "GET",
            &format!("{}?token={}", server.uri("/test/session/check"), token),
            b"",
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.get_response().await.unwrap(), "failure");
}

#[tokio::test]
async fn roles_enforced_and_monotonic() {
    let server = start_server().await;
    let mut url = Url::new();

    // No login: denied
    let status = url
        .fetch("GET", &server.uri("/admin/check"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 401);
    url.get_response().await.unwrap();

    // Login with the lesser role: still denied
    url.fetch("GET", &server.uri("/test/login?role=user"), b"", None)
        .await
        .unwrap();
    let user_cookie = url.response_header("Set-Cookie").unwrap().to_string();
    url.get_response().await.unwrap();
    let headers = cookie_header(&user_cookie);
    let status = url
        .fetch("GET", &server.uri("/admin/check"), b"", Some(&headers))
        .await
        .unwrap();
    assert_eq!(status, 401);
    url.get_response().await.unwrap();

    // Login as admin: allowed
    url.fetch("GET", &server.uri("/test/login?role=admin"), b"", None)
        .await
        .unwrap();
    let admin_cookie = url.response_header("Set-Cookie").unwrap().to_string();
    url.get_response().await.unwrap();
    let headers = cookie_header(&admin_cookie);
    let status = url
        .fetch("GET", &server.uri("/admin/check"), b"", Some(&headers))
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.get_response().await.unwrap(), "admin-ok");
}

#[tokio::test]
async fn method_set_and_options() {
    let server = start_server().await;
    let mut url = Url::new();

    let status = url
        .fetch("POST", &server.uri("/closed"), b"x", None)
        .await
        .unwrap();
    assert_eq!(status, 405);
    url.get_response().await.unwrap();

    let status = url
        .fetch("OPTIONS", &server.uri("/closed"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.response_header("Access-Control-Allow-Methods"), Some("GET"));
    assert_eq!(url.get_response().await.unwrap(), "");
}

#[tokio::test]
async fn chunked_request_round_trip() {
    let server = start_server().await;
    let mut url = Url::new();
    // Content length -1 selects chunked transfer on the request
    url.start("POST", &server.uri("/test/stream"), -1).await.unwrap();
    url.write_headers(None).await.unwrap();
    let mut sent = 0usize;
    for chunk in [500usize, 1, 4096, 77] {
        let data = vec![b'x'; chunk];
        url.write(&data).await.unwrap();
        sent += chunk;
    }
    url.finalize().await.unwrap();
    assert_eq!(url.status, 200);
    let body = url.get_response().await.unwrap();
    assert_eq!(body, format!("{{\"length\": {}}}", sent));
}

#[tokio::test]
async fn form_body_parsed_into_vars() {
    let server = start_server().await;
    let mut url = Url::new();
    // The check action reads qvars; exercise form parsing via session var echo
    let status = url
        .fetch(
            "POST",
            &server.uri("/test/success"),
            b"name=hello+world&x=%41",
            Some("Content-Type: application/x-www-form-urlencoded\r\n"),
        )
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.get_response().await.unwrap(), "success\n");
}

#[tokio::test]
async fn sse_stream_delivers_all_events() {
    let server = start_server().await;
    let mut url = Url::new();
    let mut count = 0;
    url.get_events(&server.uri("/test/event"), None, |event| {
        assert_eq!(event.data, format!("event {}", count));
        count += 1;
        true
    })
    .await
    .unwrap();
    assert_eq!(count, 100);

    // The connection survives for another request (keep-alive)
    let status = url
        .fetch("GET", &server.uri("/index.html"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 200);
}

#[tokio::test]
async fn websocket_echo() {
    let server = start_server().await;
    let mut url = Url::new();
    let mut ws = url
        .web_socket(&format!("ws://127.0.0.1:{}/test/ws/", server.port), None)
        .await
        .unwrap();
    for i in 0..10 {
        let message = format!("Message {}", i);
        ws.send(&message).await.unwrap();
        let (kind, data) = ws.recv().await.unwrap().expect("echo frame");
        assert_eq!(kind, MessageKind::Text);
        assert_eq!(std::str::from_utf8(&data).unwrap(), message);
    }
    ws.send_close(1000, "done").await.unwrap();
    assert_eq!(ws.recv().await.unwrap(), None);
    assert!(ws.orderly_closed());
    assert_eq!(ws.close_status(), 1000);
}

#[tokio::test]
async fn websocket_binary_echo() {
    let server = start_server().await;
    let mut url = Url::new();
    let mut ws = url
        .web_socket(&format!("ws://127.0.0.1:{}/test/ws/", server.port), None)
        .await
        .unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    ws.send_binary(&payload).await.unwrap();
    let (kind, data) = ws.recv().await.unwrap().expect("echo frame");
    assert_eq!(kind, MessageKind::Binary);
    assert_eq!(data, payload);
    ws.send_close(1000, "").await.unwrap();
}

#[tokio::test]
async fn multipart_upload_and_cleanup() {
    let server = start_server().await;
    let staging = tempfile::tempdir().unwrap();
    let small = staging.path().join("small.bin");
    let large = staging.path().join("large.bin");
    let small_data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let large_data: Vec<u8> = (0..10 * 1024u32).map(|i| (i % 241) as u8).collect();
    std::fs::write(&small, &small_data).unwrap();
    std::fs::write(&large, &large_data).unwrap();

    let mut url = Url::new();
    url.start("POST", &server.uri("/test/upload/"), -1).await.unwrap();
    let status = url
        .upload(
            &[small.as_path(), large.as_path()],
            &[("description", "three part test")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, 200);
    let reply = url.get_json_response().await.unwrap();
    assert_eq!(reply["description"], "three part test");
    let uploads = reply["uploads"].as_array().unwrap();
    assert_eq!(uploads.len(), 2, "two file parts recorded");
    assert_eq!(uploads[0]["size"], 1024);
    assert_eq!(uploads[0]["disk_len"], 1024);
    assert_eq!(uploads[0]["filename"], "small.bin");
    assert_eq!(uploads[1]["size"], 10 * 1024);
    assert_eq!(uploads[1]["disk_len"], 10 * 1024);

    // A follow-up request guarantees the first finished its reset, which
    // removes the temp files
    url.fetch("GET", &server.uri("/test/success"), b"", None).await.unwrap();
    url.get_response().await.unwrap();
    for part in uploads {
        let path = PathBuf::from(part["path"].as_str().unwrap());
        assert!(!path.exists(), "temp file removed after request: {:?}", path);
    }
}

#[tokio::test]
async fn oversize_upload_rejected() {
    let server = start_server().await;
    let staging = tempfile::tempdir().unwrap();
    let big = staging.path().join("big.bin");
    // Over the 64K upload limit
    std::fs::write(&big, vec![0u8; 100 * 1024]).unwrap();

    let mut url = Url::new();
    url.set_retries(0);
    url.start("POST", &server.uri("/test/upload/"), -1).await.unwrap();
    let result = url.upload(&[big.as_path()], &[], None).await;
    match result {
        Ok(status) => assert_eq!(status, 414),
        // The server may drop the connection while the client still writes
        Err(_) => {}
    }
}

#[tokio::test]
async fn path_traversal_rejected() {
    let server = start_server().await;
    let mut tcp = tokio::net::TcpStream::connect(("127.0.0.1", server.port))
        .await
        .unwrap();
    tcp.write_all(b"GET /../../etc/passwd HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tcp.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(!text.contains("root:x:0:0"), "must not leak /etc/passwd");
    let status = text.split_whitespace().nth(1).unwrap_or("");
    assert!(
        ["400", "403", "404"].contains(&status),
        "traversal yields an error status, got: {}",
        status
    );
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() {
    let server = start_server().await;
    let mut tcp = tokio::net::TcpStream::connect(("127.0.0.1", server.port))
        .await
        .unwrap();
    // Two requests in one write; responses must come back serially
    tcp.write_all(
        b"GET /test/success HTTP/1.1\r\nHost: localhost\r\n\r\n\
          GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();
    let mut response = Vec::new();
    tcp.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    let first = text.find("success").expect("first response body");
    let second = text.find("Hello /index.html").expect("second response body");
    assert!(first < second, "responses in request order");
}

#[tokio::test]
async fn http10_forces_close() {
    let server = start_server().await;
    let mut tcp = tokio::net::TcpStream::connect(("127.0.0.1", server.port))
        .await
        .unwrap();
    tcp.write_all(b"GET /index.html HTTP/1.0\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    // read_to_end only returns if the server closes the connection
    tcp.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.0 200"));
    assert!(text.to_lowercase().contains("connection: close"));
}

#[tokio::test]
async fn not_found_hook_short_circuits() {
    use emberweb_core::server::host::HookEvent;
    use emberweb_core::server::web::Web;

    let docs = tempfile::tempdir().unwrap();
    let config: WebConfig = serde_json::from_value(serde_json::json!({
        "listen": ["http://127.0.0.1:0"],
        "documents": docs.path().to_str().unwrap(),
        "routes": [{ "match": "/", "handler": "file" }]
    }))
    .unwrap();
    let host = WebHost::new(config).unwrap();
    host.set_hook(Arc::new(|web: &mut Web, event| {
        Box::pin(async move {
            if event == HookEvent::NotFound {
                let _ = web.write_response(200, "custom not found").await;
            }
        })
    }));
    let bound = host.start().await.unwrap();

    let uri = format!("http://127.0.0.1:{}/missing.txt", bound[0].port());
    let mut url = Url::new();
    let status = url.fetch("GET", &uri, b"", None).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.get_response().await.unwrap(), "custom not found");
    host.stop();
}

#[tokio::test]
async fn unknown_route_is_404() {
    let server = start_server().await;
    let mut url = Url::new();
    let status = url
        .fetch("GET", &server.uri("/test/definitely-not-registered"), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 404);
}

