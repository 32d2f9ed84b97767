/*
 * url_client.rs
 * Copyright (C) 2026 Emberweb contributors
 *
 * URL client tests against canned responders: chunked decoding,
 * read-until-close bodies, redirects and bad replies.
 */

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use emberweb_core::client::url::Url;
use emberweb_core::error::WebError;

/// Serve one connection with a canned response, draining the request
/// headers first. `close` drops the socket after writing.
async fn canned_server(responses: Vec<&'static str>) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        for response in responses {
            // Read until the request's blank line
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            while !buf.ends_with(b"\r\n\r\n") {
                if sock.read_exact(&mut byte).await.is_err() {
                    return;
                }
                buf.push(byte[0]);
            }
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.flush().await.unwrap();
        }
    });
    port
}

#[tokio::test]
async fn chunked_response_decoded() {
    let port = canned_server(vec![
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
         5\r\nhello\r\n1\r\n \r\n6\r\nworld!\r\n0\r\n\r\n",
    ])
    .await;
    let mut url = Url::new();
    url.set_retries(0);
    let status = url
        .fetch("GET", &format!("http://127.0.0.1:{}/x", port), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(url.get_response().await.unwrap(), "hello world!");
}

#[tokio::test]
async fn content_length_body() {
    let port = canned_server(vec![
        "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nabcde",
    ])
    .await;
    let mut url = Url::new();
    url.set_retries(0);
    url.fetch("GET", &format!("http://127.0.0.1:{}/", port), b"", None)
        .await
        .unwrap();
    assert_eq!(url.get_response().await.unwrap(), "abcde");
}

#[tokio::test]
async fn read_until_close_body() {
    let port = canned_server(vec![
        "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nuntil the end",
    ])
    .await;
    let mut url = Url::new();
    url.set_retries(0);
    url.fetch("GET", &format!("http://127.0.0.1:{}/", port), b"", None)
        .await
        .unwrap();
    assert_eq!(url.get_response().await.unwrap(), "until the end");
}

#[tokio::test]
async fn redirect_has_no_body_and_location() {
    let port = canned_server(vec![
        "HTTP/1.1 301 Redirect\r\nLocation: https://example.com/new\r\nContent-Length: 0\r\n\r\n",
    ])
    .await;
    let mut url = Url::new();
    url.set_retries(0);
    let status = url
        .fetch("GET", &format!("http://127.0.0.1:{}/old", port), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 301);
    assert_eq!(url.redirect.as_deref(), Some("https://example.com/new"));
    assert_eq!(url.get_response().await.unwrap(), "");
}

#[tokio::test]
async fn keep_alive_two_requests_one_socket() {
    let port = canned_server(vec![
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none",
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo",
    ])
    .await;
    let mut url = Url::new();
    url.set_retries(0);
    let base = format!("http://127.0.0.1:{}", port);
    url.fetch("GET", &format!("{}/a", base), b"", None).await.unwrap();
    assert_eq!(url.get_response().await.unwrap(), "one");
    // Same origin: the canned server only accepts once, so success here
    // proves the socket was reused
    url.fetch("GET", &format!("{}/b", base), b"", None).await.unwrap();
    assert_eq!(url.get_response().await.unwrap(), "two");
}

#[tokio::test]
async fn garbage_status_line_is_bad_response() {
    let port = canned_server(vec!["BLEEP BLOOP\r\n\r\n"]).await;
    let mut url = Url::new();
    url.set_retries(0);
    let result = url
        .fetch("GET", &format!("http://127.0.0.1:{}/", port), b"", None)
        .await;
    assert!(matches!(result, Err(WebError::BadResponse(_))));
    assert!(url.last_error().is_some());
}

#[tokio::test]
async fn cannot_connect_surfaces() {
    let mut url = Url::new();
    url.set_retries(1);
    // Nothing listens on this port
    let result = url.fetch("GET", "http://127.0.0.1:9/", b"", None).await;
    assert!(matches!(result, Err(WebError::CantConnect(_))));
}

#[tokio::test]
async fn status_is_not_an_error() {
    let port = canned_server(vec![
        "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found",
    ])
    .await;
    let mut url = Url::new();
    url.set_retries(0);
    let status = url
        .fetch("GET", &format!("http://127.0.0.1:{}/missing", port), b"", None)
        .await
        .unwrap();
    assert_eq!(status, 404);
    assert!(url.last_error().is_none());
    assert_eq!(url.get_response().await.unwrap(), "not found");
}
