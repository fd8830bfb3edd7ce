//! Redirect handling across transports.

use scheme_loader::config::LoaderConfig;
use scheme_loader::http::RequestDescriptor;
use scheme_loader::request::RequestError;
use scheme_loader::{
    NetError, ProtocolResponse, ProtocolType, RedirectMode, RequestEvent, RequestOptions,
    Responder, Session,
};

mod common;

async fn redirecting_backend() -> std::net::SocketAddr {
    common::start_canned_backend(|path| match path {
        "/start" => common::redirect_response(302, "/end"),
        "/loop" => common::redirect_response(302, "/loop"),
        _ => common::ok_response("done"),
    })
    .await
}

#[tokio::test]
async fn network_redirect_is_followed() {
    let addr = redirecting_backend().await;
    let session = Session::new(LoaderConfig::default());

    let mut request = session
        .request(RequestOptions::new(format!("http://{}/start", addr)))
        .unwrap();
    request.end(None).unwrap();
    let events = common::collect_events(&mut request).await;

    let names = common::event_names(&events);
    assert_eq!(names[..2], ["redirect", "response"]);
    match &events[0] {
        RequestEvent::Redirect { status, url, .. } => {
            assert_eq!(status.as_u16(), 302);
            assert_eq!(url.path(), "/end");
        }
        other => panic!("expected redirect, got {:?}", other),
    }
    match &events[1] {
        RequestEvent::Response(info) => assert_eq!(info.url.path(), "/end"),
        other => panic!("expected response, got {:?}", other),
    }
    assert_eq!(common::body_of(&events), b"done");
}

#[tokio::test]
async fn error_mode_rejects_redirects() {
    let addr = redirecting_backend().await;
    let session = Session::new(LoaderConfig::default());

    let options = RequestOptions::new(format!("http://{}/start", addr)).redirect(RedirectMode::Error);
    let mut request = session.request(options).unwrap();
    request.end(None).unwrap();
    let events = common::collect_events(&mut request).await;

    assert_eq!(common::event_names(&events), ["error", "close"]);
    match &events[0] {
        RequestEvent::Error(error) => {
            assert_eq!(*error, RequestError::RedirectMode);
            assert_eq!(
                error.to_string(),
                "Request cannot follow redirect with the current redirect mode"
            );
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn manual_mode_waits_for_follow() {
    let addr = redirecting_backend().await;
    let session = Session::new(LoaderConfig::default());

    let options =
        RequestOptions::new(format!("http://{}/start", addr)).redirect(RedirectMode::Manual);
    let mut request = session.request(options).unwrap();
    request.end(None).unwrap();

    let first = request.next_event().await.unwrap();
    assert_eq!(first.name(), "redirect");
    request.follow_redirect().unwrap();

    let events = common::collect_events(&mut request).await;
    assert_eq!(common::event_names(&events)[0], "response");
    assert_eq!(common::body_of(&events), b"done");
}

#[tokio::test]
async fn manual_mode_abort_during_redirect() {
    let addr = redirecting_backend().await;
    let session = Session::new(LoaderConfig::default());

    let options =
        RequestOptions::new(format!("http://{}/start", addr)).redirect(RedirectMode::Manual);
    let mut request = session.request(options).unwrap();
    request.end(None).unwrap();

    assert_eq!(request.next_event().await.unwrap().name(), "redirect");
    request.abort();

    let events = common::collect_events(&mut request).await;
    assert_eq!(common::event_names(&events), ["abort", "close"]);
}

#[tokio::test]
async fn protocol_redirect_restarts_on_network() {
    let addr = redirecting_backend().await;
    let target = format!("http://{}/end", addr);

    let session = Session::new(LoaderConfig::default());
    session
        .protocol()
        .register_protocol(
            "myproto",
            ProtocolType::String,
            move |_: RequestDescriptor, responder: Responder| {
                let response = ProtocolResponse::new()
                    .status(302)
                    .header("location", target.clone());
                let _ = responder.respond(response);
            },
        )
        .unwrap();

    let mut request = session.request(RequestOptions::new("myproto://x")).unwrap();
    request.end(None).unwrap();
    let events = common::collect_events(&mut request).await;

    assert_eq!(common::event_names(&events)[..2], ["redirect", "response"]);
    assert_eq!(common::body_of(&events), b"done");
}

#[tokio::test]
async fn network_redirect_restarts_on_protocol() {
    let session = Session::new(LoaderConfig::default());
    session
        .protocol()
        .register_protocol(
            "app",
            ProtocolType::String,
            |_: RequestDescriptor, responder: Responder| {
                let _ = responder.respond("from app");
            },
        )
        .unwrap();
    let addr = common::start_canned_backend(|_| common::redirect_response(302, "app://bundle/")).await;

    let mut request = session
        .request(RequestOptions::new(format!("http://{}/", addr)))
        .unwrap();
    request.end(None).unwrap();
    let events = common::collect_events(&mut request).await;

    assert_eq!(common::body_of(&events), b"from app");
}

#[tokio::test]
async fn redirect_loops_are_capped() {
    let addr = redirecting_backend().await;
    let mut config = LoaderConfig::default();
    config.redirects.max_redirects = 3;
    let session = Session::new(config);

    let mut request = session
        .request(RequestOptions::new(format!("http://{}/loop", addr)))
        .unwrap();
    request.end(None).unwrap();
    let events = common::collect_events(&mut request).await;

    let names = common::event_names(&events);
    assert_eq!(names.iter().filter(|name| **name == "redirect").count(), 3);
    assert_eq!(names[names.len() - 2..], ["error", "close"]);
    assert!(events.iter().any(|event| matches!(
        event,
        RequestEvent::Error(RequestError::Net(NetError::TooManyRedirects))
    )));
}

#[tokio::test]
async fn websocket_redirect_fails_as_unknown_scheme() {
    let addr = common::start_canned_backend(|_| common::redirect_response(302, "ws://127.0.0.1/socket")).await;
    let session = Session::new(LoaderConfig::default());

    let mut request = session
        .request(RequestOptions::new(format!("http://{}/", addr)))
        .unwrap();
    request.end(None).unwrap();
    let events = common::collect_events(&mut request).await;

    assert_eq!(common::event_names(&events), ["redirect", "error", "close"]);
    assert!(matches!(
        &events[1],
        RequestEvent::Error(RequestError::Net(NetError::UnknownUrlScheme))
    ));
}
