//! Custom protocol responder.
//!
//! # Responsibilities
//! - Invoke a scheme handler for a request and wait for its answer
//! - Drive the request to completion according to the answer's kind
//!
//! # Data Flow
//! ```text
//! Dispatched
//!     → handler(request, Responder) ... respond / continue / drop
//!     → build_response
//!         Buffer | String → pipe via WriteQueue → Complete(ok)
//!         File            → file transport (ACAO: *)
//!         ProxiedHttp     → network transport of this or an ephemeral session
//!         Stream          → pull stream adapter
//!         Redirect        → ReceiveRedirect → FollowRedirect → re-dispatch
//!         Passthrough     → wrapped transport
//!         Err(code)       → Complete(code)
//! ```
//!
//! # Design Decisions
//! - Redirects are re-dispatched on the same endpoint so the consumer keeps
//!   one handle across the hop
//! - Proxied requests carry the original headers but never the original
//!   body; only `uploadData` is sent, and only for methods that take a body

use bytes::Bytes;
use http::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, CONTENT_TYPE};
use url::Url;

use crate::error::NetError;
use crate::http::headers::merge_headers;
use crate::http::{RedirectInfo, RequestDescriptor, ResponseHead};
use crate::loader::{
    spawn_loader, CommandReceiver, CompletionStatus, LoaderClient, LoaderEndpoint,
    SharedLoaderFactory, UrlLoaderFactory,
};
use crate::net::{pipe, WriteQueue};
use crate::observability::{metrics, span::request_span};
use crate::protocol::descriptor::{build_response, ProxyTarget, ResponseKind};
use crate::protocol::handler::{Responder, SessionChoice};
use crate::protocol::registry::HandlerEntry;
use crate::protocol::stream::{stream_body, PullSource};
use crate::session::Session;
use crate::upload::RequestBody;

/// Serves one registered scheme.
#[derive(Debug, Clone)]
pub struct ProtocolLoaderFactory {
    session: Session,
    entry: HandlerEntry,
}

impl ProtocolLoaderFactory {
    pub fn new(session: Session, entry: HandlerEntry) -> Self {
        Self { session, entry }
    }
}

impl UrlLoaderFactory for ProtocolLoaderFactory {
    fn create_loader_and_start(&self, request: RequestDescriptor, endpoint: LoaderEndpoint) {
        Dispatch {
            session: self.session.clone(),
            entry: self.entry.clone(),
            interceptable: false,
            redirect_target: None,
            passthrough: None,
        }
        .start(request, endpoint, ());
    }
}

/// One handler invocation and everything needed to finish it.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub session: Session,
    pub entry: HandlerEntry,
    /// Whether the handler may `continue_request()`.
    pub interceptable: bool,
    /// Factory for followed redirects; the session router when `None`.
    pub redirect_target: Option<SharedLoaderFactory>,
    /// Factory for requests the handler lets through.
    pub passthrough: Option<SharedLoaderFactory>,
}

impl Dispatch {
    /// Spawn the load. `hold` is kept alive until the load finishes.
    pub(crate) fn start<H>(self, request: RequestDescriptor, endpoint: LoaderEndpoint, hold: H)
    where
        H: Send + 'static,
    {
        let (client, commands) = endpoint.into_parts();
        let span = request_span(request.id, "protocol", &request.url);
        metrics::record_request_started("protocol");

        let task_client = client.clone();
        spawn_loader(&client, span, async move {
            let _hold = hold;
            self.run(request, task_client, commands).await;
        });
    }

    async fn run(self, request: RequestDescriptor, client: LoaderClient, commands: CommandReceiver) {
        let (responder, answer) = Responder::new(self.interceptable);
        tracing::debug!(scheme = %request.scheme(), ptype = %self.entry.ptype, "Invoking protocol handler");
        self.entry.handler.handle(request.clone(), responder);
        let outcome = answer.await.ok();
        if outcome.is_none() {
            tracing::warn!(scheme = %request.scheme(), "Protocol handler dropped the request unanswered");
        }

        let descriptor = match build_response(self.entry.ptype, outcome, &request) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                metrics::record_protocol_response("error");
                complete(&client, CompletionStatus::failed(error));
                return;
            }
        };
        metrics::record_protocol_response(descriptor.kind.name());
        tracing::debug!(kind = descriptor.kind.name(), status = %descriptor.head.status, "Handler answered");

        let head = descriptor.head;
        match descriptor.kind {
            ResponseKind::Buffer(data) | ResponseKind::String(data) => {
                let status = self.send_contents(head, data, &client).await;
                complete(&client, status);
            }
            ResponseKind::File {
                path,
                method,
                referrer,
            } => {
                let path = std::path::absolute(&path).unwrap_or(path);
                let Ok(url) = Url::from_file_path(&path) else {
                    complete(&client, CompletionStatus::failed(NetError::FileNotFound));
                    return;
                };
                let mut request = request;
                request.url = url;
                if let Some(method) = method {
                    request.method = method;
                }
                if referrer.is_some() {
                    request.referrer = referrer;
                }

                let mut extra = head.headers;
                extra.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
                self.session.file().start_with_headers(
                    request,
                    LoaderEndpoint::from_parts(client, commands),
                    extra,
                );
            }
            ResponseKind::ProxiedHttp(target) => {
                let network = match target.session {
                    SessionChoice::Inherit => self.session.network(),
                    SessionChoice::Ephemeral => {
                        Session::ephemeral(self.session.config().clone()).network()
                    }
                };
                let request = proxied_request(request, target);
                tracing::debug!(url = %request.url, "Proxying protocol request over the network");
                network.create_loader_and_start(request, LoaderEndpoint::from_parts(client, commands));
            }
            ResponseKind::Stream(source) => {
                let status = self.send_stream(head, source, &client).await;
                complete(&client, status);
            }
            ResponseKind::Redirect(info) => {
                self.redirect(request, head, info, client, commands).await;
            }
            ResponseKind::Passthrough => match &self.passthrough {
                Some(target) => {
                    tracing::debug!("Interceptor continued, passing request through");
                    target.create_loader_and_start(request, LoaderEndpoint::from_parts(client, commands));
                }
                None => complete(&client, CompletionStatus::failed(NetError::Failed)),
            },
        }
    }

    async fn send_contents(&self, mut head: ResponseHead, data: Bytes, client: &LoaderClient) -> CompletionStatus {
        let capacity = self.session.config().pipe.capacity_bytes;
        head.headers
            .append(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        head.content_length = Some(data.len() as u64);

        let (mut producer, consumer) = match pipe::create(capacity) {
            Ok(pair) => pair,
            Err(e) => return CompletionStatus::failed(e),
        };
        client.on_receive_response(head, consumer);

        let mut queue = WriteQueue::new();
        queue.push_chunked(data, capacity);
        tracing::trace!(bytes = queue.queued_bytes(), chunks = queue.len(), "Writing protocol response");
        match queue.flush(&mut producer).await {
            Ok(written) => CompletionStatus::ok(written),
            Err(e) => {
                tracing::debug!(error = %e, "Protocol response write failed");
                CompletionStatus::failed(NetError::Failed)
            }
        }
    }

    async fn send_stream(
        &self,
        head: ResponseHead,
        source: Option<Box<dyn PullSource>>,
        client: &LoaderClient,
    ) -> CompletionStatus {
        let capacity = self.session.config().pipe.capacity_bytes;
        match source {
            Some(source) => stream_body(source, head, client, capacity).await,
            None => match pipe::create(capacity) {
                Ok((producer, consumer)) => {
                    client.on_receive_response(head, consumer);
                    drop(producer);
                    CompletionStatus::ok(0)
                }
                Err(e) => CompletionStatus::failed(e),
            },
        }
    }

    async fn redirect(
        self,
        mut request: RequestDescriptor,
        head: ResponseHead,
        info: RedirectInfo,
        client: LoaderClient,
        mut commands: CommandReceiver,
    ) {
        let max_redirects = self.session.config().redirects.max_redirects as usize;
        if request.redirect_count() >= max_redirects {
            complete(&client, CompletionStatus::failed(NetError::TooManyRedirects));
            return;
        }

        client.on_receive_redirect(info.clone(), head);
        let Some(params) = commands.wait_for_follow().await else {
            tracing::debug!("Redirect abandoned by consumer");
            return;
        };

        request.apply_redirect(&info, &params);
        metrics::record_redirect("follow");
        tracing::debug!(to = %request.url, "Following protocol redirect");

        let target = self
            .redirect_target
            .unwrap_or_else(|| self.session.router());
        target.create_loader_and_start(request, LoaderEndpoint::from_parts(client, commands));
    }
}

fn complete(client: &LoaderClient, status: CompletionStatus) {
    metrics::record_request_completed("protocol", status.error);
    if let Some(error) = status.error {
        tracing::info!(%error, "Protocol request failed");
    }
    client.on_complete(status);
}

/// The request a `ProxiedHttp` answer reissues.
fn proxied_request(mut request: RequestDescriptor, target: ProxyTarget) -> RequestDescriptor {
    request.url = target.url;
    if let Some(method) = target.method {
        request.method = method;
    }
    request.referrer = target.referrer;
    merge_headers(&mut request.headers, &target.headers);

    request.body = None;
    if !request.is_bodyless_method() {
        if let Some(upload) = target.upload_data {
            request.headers.remove(CONTENT_LENGTH);
            if let Some(content_type) = upload
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
            {
                request.headers.insert(CONTENT_TYPE, content_type);
            }
            request.body = Some(RequestBody::from_bytes(upload.data));
        }
    }
    request
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("entry", &self.entry)
            .field("interceptable", &self.interceptable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handler::{ProtocolResponse, UploadOverride};
    use http::Method;

    #[test]
    fn proxied_request_keeps_headers_and_drops_body_for_get() {
        let mut request = RequestDescriptor::get(Url::parse("myproto://x").unwrap())
            .with_header("x-original", "1")
            .unwrap()
            .with_body(RequestBody::from_bytes(Bytes::from_static(b"orig")));
        request.set_cors_exempt_header(
            http::HeaderName::from_static("x-exempt"),
            HeaderValue::from_static("e"),
        );

        let target = ProxyTarget {
            url: Url::parse("https://example.test/").unwrap(),
            method: None,
            referrer: None,
            headers: Default::default(),
            session: SessionChoice::Inherit,
            upload_data: Some(UploadOverride {
                content_type: Some("text/plain".into()),
                data: Bytes::from_static(b"ignored"),
            }),
        };
        let proxied = proxied_request(request, target);

        assert_eq!(proxied.url.as_str(), "https://example.test/");
        assert_eq!(proxied.headers["x-original"], "1");
        assert_eq!(proxied.cors_exempt_headers["x-exempt"], "e");
        assert!(proxied.body.is_none());
    }

    #[test]
    fn proxied_post_carries_upload_data() {
        let request = RequestDescriptor::get(Url::parse("myproto://x").unwrap());
        let target = ProxyTarget {
            url: Url::parse("https://example.test/submit").unwrap(),
            method: Some(Method::POST),
            referrer: None,
            headers: Default::default(),
            session: SessionChoice::Inherit,
            upload_data: ProtocolResponse::new()
                .upload_data(Some("application/json".into()), "{}")
                .upload_data,
        };
        let proxied = proxied_request(request, target);

        assert_eq!(proxied.method, Method::POST);
        assert_eq!(proxied.headers[CONTENT_TYPE], "application/json");
        assert_eq!(proxied.body.unwrap().in_memory_size(), Some(2));
    }
}
