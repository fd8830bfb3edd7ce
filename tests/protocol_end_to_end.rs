//! Custom scheme requests through the full client request pipeline.

use std::time::Duration;

use bytes::Bytes;
use scheme_loader::http::RequestDescriptor;
use scheme_loader::protocol::channel;
use scheme_loader::{
    LoaderConfig, ProtocolResponse, ProtocolType, RequestEvent, RequestOptions, Responder, Session,
};

mod common;

fn session() -> Session {
    Session::new(LoaderConfig::default())
}

async fn fetch(session: &Session, options: RequestOptions) -> Vec<RequestEvent> {
    let mut request = session.request(options).unwrap();
    request.end(None).unwrap();
    common::collect_events(&mut request).await
}

#[tokio::test]
async fn string_handler_serves_text() {
    let session = session();
    session
        .protocol()
        .register_protocol(
            "myproto",
            ProtocolType::String,
            |_: RequestDescriptor, responder: Responder| {
                let response = ProtocolResponse::new().text("hello").mime_type("text/plain");
                let _ = responder.respond(response);
            },
        )
        .unwrap();

    let events = fetch(&session, RequestOptions::new("myproto://x")).await;

    assert_eq!(common::body_of(&events), b"hello");
    match &events[0] {
        RequestEvent::Response(info) => {
            assert_eq!(info.status.as_u16(), 200);
            assert_eq!(info.headers["content-type"], "text/plain");
            assert_eq!(info.content_length, Some(5));
        }
        other => panic!("expected response, got {:?}", other),
    }
    assert_eq!(
        common::event_names(&events).last().copied(),
        Some("close")
    );
}

#[tokio::test]
async fn buffer_handler_serves_bytes_and_headers() {
    let session = session();
    session
        .protocol()
        .register_protocol(
            "buf",
            ProtocolType::Buffer,
            |_: RequestDescriptor, responder: Responder| {
                let response = ProtocolResponse::new()
                    .status(201)
                    .header("x-served-by", "buffer")
                    .bytes(vec![0u8, 1, 2, 3]);
                let _ = responder.respond(response);
            },
        )
        .unwrap();

    let events = fetch(&session, RequestOptions::new("buf://payload")).await;

    assert_eq!(common::body_of(&events), [0u8, 1, 2, 3]);
    match &events[0] {
        RequestEvent::Response(info) => {
            assert_eq!(info.status.as_u16(), 201);
            assert_eq!(info.headers["x-served-by"], "buffer");
            assert_eq!(info.headers["access-control-allow-origin"], "*");
        }
        other => panic!("expected response, got {:?}", other),
    }
}

#[tokio::test]
async fn stream_handler_delivers_chunks_in_order() {
    let session = session();
    session
        .protocol()
        .register_protocol(
            "live",
            ProtocolType::Stream,
            |_: RequestDescriptor, responder: Responder| {
                let (writer, source) = channel();
                let _ = responder.respond(ProtocolResponse::new().stream(source));
                tokio::spawn(async move {
                    for chunk in ["one,", "two,", "three"] {
                        writer.push(Bytes::from(chunk));
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    writer.end();
                });
            },
        )
        .unwrap();

    let events = fetch(&session, RequestOptions::new("live://feed")).await;

    assert_eq!(common::body_of(&events), b"one,two,three");
    assert!(common::event_names(&events).ends_with(&["complete", "close"]));
}

#[tokio::test]
async fn file_handler_serves_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    std::fs::write(&path, "<p>local</p>").unwrap();

    let session = session();
    session
        .protocol()
        .register_protocol(
            "app",
            ProtocolType::File,
            move |_: RequestDescriptor, responder: Responder| {
                let _ = responder.respond(ProtocolResponse::new().path(path.clone()));
            },
        )
        .unwrap();

    let events = fetch(&session, RequestOptions::new("app://bundle/page.html")).await;

    assert_eq!(common::body_of(&events), b"<p>local</p>");
    match &events[0] {
        RequestEvent::Response(info) => {
            assert_eq!(info.mime_type, "text/html");
            assert_eq!(info.headers["access-control-allow-origin"], "*");
        }
        other => panic!("expected response, got {:?}", other),
    }
}

#[tokio::test]
async fn http_handler_proxies_with_original_headers() {
    let (addr, mut captured) = common::start_capturing_backend().await;
    let target = format!("http://{}/proxied?q=1", addr);

    let session = session();
    session
        .protocol()
        .register_protocol(
            "myproto",
            ProtocolType::Http,
            move |_: RequestDescriptor, responder: Responder| {
                let _ = responder.respond(ProtocolResponse::new().url(target.clone()));
            },
        )
        .unwrap();

    let options = RequestOptions::new("myproto://x").header("x-custom", "kept");
    let events = fetch(&session, options).await;

    assert_eq!(common::body_of(&events), b"captured");
    let request = captured.recv().await.unwrap();
    assert_eq!(request.method, http::Method::GET);
    assert_eq!(request.path, "/proxied?q=1");
    assert_eq!(request.headers["x-custom"], "kept");
}

#[tokio::test]
async fn interceptor_answers_or_continues() {
    let addr = common::start_canned_backend(|_| common::ok_response("from network")).await;

    let session = session();
    session
        .protocol()
        .intercept_protocol(
            "http",
            ProtocolType::String,
            |request: RequestDescriptor, responder: Responder| {
                if request.url.path() == "/intercepted" {
                    let _ = responder.respond("from handler");
                } else {
                    let _ = responder.continue_request();
                }
            },
        )
        .unwrap();

    let events = fetch(
        &session,
        RequestOptions::new(format!("http://{}/intercepted", addr)),
    )
    .await;
    assert_eq!(common::body_of(&events), b"from handler");

    let events = fetch(&session, RequestOptions::new(format!("http://{}/other", addr))).await;
    assert_eq!(common::body_of(&events), b"from network");

    let mut bypass = RequestOptions::new(format!("http://{}/intercepted", addr));
    bypass.bypass_custom_protocol_handlers = true;
    let events = fetch(&session, bypass).await;
    assert_eq!(common::body_of(&events), b"from network");
}
