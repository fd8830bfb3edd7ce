//! Network transport.
//!
//! # Responsibilities
//! - Send a `RequestDescriptor` through a pooled hyper client
//! - Report redirects and wait for the consumer to follow them
//! - Surface auth challenges, upload progress and the response body pipe
//! - Enforce the global outbound connection limit
//!
//! # Data Flow
//! ```text
//! create_loader_and_start
//!     → acquire connection permit (skipped for ignore_limits)
//!     → hyper request (UploadBody streams the request body)
//!     → 3xx with Location? → ReceiveRedirect → wait FollowRedirect → loop
//!     → 401/407 Basic?     → AuthRequired → retry with credentials
//!     → ReceiveResponse(head, pipe) → frames → pipe → Complete
//! ```
//!
//! # Design Decisions
//! - Generic over the connector; `HttpConnector` by default, so `https`
//!   needs a TLS-capable connector passed to `with_connector`
//! - Errors are never retried here; the consumer sees one completion

use std::sync::Arc;
use std::time::Duration;

use http::header::{
    HeaderValue, AUTHORIZATION, COOKIE, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, REFERER,
    USER_AGENT, WWW_AUTHENTICATE,
};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tokio::sync::Semaphore;

use crate::config::LoaderConfig;
use crate::error::NetError;
use crate::http::headers::{basic_credentials, parse_challenge};
use crate::http::{RedirectInfo, RequestDescriptor, ResponseHead};
use crate::loader::{
    spawn_loader, AuthChallenge, AuthCredentials, CommandReceiver, CompletionStatus, LoaderClient,
    LoaderEndpoint, UrlLoaderFactory,
};
use crate::net::pipe;
use crate::observability::{metrics, span::request_span};
use crate::transport::cookies::CookieJar;
use crate::transport::is_network_scheme;
use crate::upload::{BlobStore, UploadBody};

/// Credential prompts answered per request before the response is delivered as-is.
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Factory for network loads.
pub struct NetworkLoaderFactory<C = HttpConnector> {
    client: Client<C, UploadBody>,
    limit: Arc<Semaphore>,
    user_agent: HeaderValue,
    max_redirects: u32,
    pipe_capacity: usize,
    cookies: CookieJar,
    blobs: BlobStore,
}

impl NetworkLoaderFactory<HttpConnector> {
    pub fn new(config: &LoaderConfig, blobs: BlobStore) -> Self {
        Self::with_connector(HttpConnector::new(), config, blobs)
    }
}

impl<C> NetworkLoaderFactory<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    pub fn with_connector(connector: C, config: &LoaderConfig, blobs: BlobStore) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(config.network.pool_idle_timeout_secs))
            .build(connector);

        let user_agent = HeaderValue::from_str(&config.network.user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("scheme-loader"));

        Self {
            client,
            limit: Arc::new(Semaphore::new(config.network.max_connections.max(1))),
            user_agent,
            max_redirects: config.redirects.max_redirects,
            pipe_capacity: config.pipe.capacity_bytes,
            cookies: CookieJar::new(),
            blobs,
        }
    }

    /// Session cookie jar used by requests with `use_session_cookies`.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Connection permits currently free.
    pub fn available_connections(&self) -> usize {
        self.limit.available_permits()
    }
}

impl<C> UrlLoaderFactory for NetworkLoaderFactory<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    fn create_loader_and_start(&self, request: RequestDescriptor, endpoint: LoaderEndpoint) {
        let (client, commands) = endpoint.into_parts();
        let span = request_span(request.id, "network", &request.url);
        metrics::record_request_started("network");

        let load = NetworkLoad {
            http: self.client.clone(),
            limit: Arc::clone(&self.limit),
            user_agent: self.user_agent.clone(),
            max_redirects: self.max_redirects,
            pipe_capacity: self.pipe_capacity,
            cookies: self.cookies.clone(),
            blobs: self.blobs.clone(),
            client: client.clone(),
            commands,
            request,
        };
        spawn_loader(&client, span, load.run());
    }
}

struct NetworkLoad<C> {
    http: Client<C, UploadBody>,
    limit: Arc<Semaphore>,
    user_agent: HeaderValue,
    max_redirects: u32,
    pipe_capacity: usize,
    cookies: CookieJar,
    blobs: BlobStore,
    client: LoaderClient,
    commands: CommandReceiver,
    request: RequestDescriptor,
}

impl<C> NetworkLoad<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        tracing::debug!(method = %self.request.method, "Network load started");
        let Some(status) = self.drive().await else {
            tracing::debug!("Network load abandoned by consumer");
            return;
        };

        metrics::record_request_completed("network", status.error);
        match status.error {
            None => tracing::debug!(bytes = status.decoded_body_length, "Network load complete"),
            Some(error) => tracing::info!(%error, "Network load failed"),
        }
        self.client.on_complete(status);
    }

    /// `None` means the consumer disconnected and nothing should be reported.
    async fn drive(&mut self) -> Option<CompletionStatus> {
        let mut credentials: Option<(AuthCredentials, bool)> = None;
        let mut auth_attempts = 0;

        loop {
            if !is_network_scheme(&self.request.url) {
                return Some(CompletionStatus::failed(NetError::UnknownUrlScheme));
            }

            let permit = if self.request.flags.ignore_limits {
                None
            } else {
                match Arc::clone(&self.limit).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Some(CompletionStatus::failed(NetError::Failed)),
                }
            };

            let request = match self.build_request(credentials.take()) {
                Ok(request) => request,
                Err(e) => return Some(CompletionStatus::failed(e)),
            };

            let response = match self.http.request(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "Network request failed");
                    return Some(CompletionStatus::failed(
                        net_error_in(&e).unwrap_or(NetError::ConnectionFailed),
                    ));
                }
            };

            let (parts, body) = response.into_parts();
            let head = ResponseHead::from_parts(&parts);
            if self.request.flags.use_session_cookies {
                self.cookies.store(&self.request.url, &head.headers);
            }

            if let Some(target) = head.redirect_target(&self.request.url) {
                drop(body);
                drop(permit);
                if self.request.redirect_count() >= self.max_redirects as usize {
                    return Some(CompletionStatus::failed(NetError::TooManyRedirects));
                }

                let info = RedirectInfo::compute(&self.request, &head, target);
                tracing::debug!(status = %head.status, to = %info.new_url, "Redirect received");
                self.client.on_receive_redirect(info.clone(), head);

                let params = self.commands.wait_for_follow().await?;
                self.request.apply_redirect(&info, &params);
                metrics::record_redirect("follow");
                continue;
            }

            if auth_attempts < MAX_AUTH_ATTEMPTS {
                if let Some(challenge) = self.challenge_for(&head) {
                    let is_proxy = challenge.is_proxy;
                    match self.client.on_auth_required(challenge).await {
                        Ok(Some(answer)) => {
                            drop(body);
                            drop(permit);
                            auth_attempts += 1;
                            credentials = Some((answer, is_proxy));
                            continue;
                        }
                        // No credentials: the challenge response itself is delivered.
                        Ok(None) => {}
                        Err(_) => return Some(CompletionStatus::failed(NetError::Canceled)),
                    }
                }
            }

            return Some(self.stream_body(head, body).await);
        }
    }

    fn build_request(
        &self,
        credentials: Option<(AuthCredentials, bool)>,
    ) -> Result<hyper::Request<UploadBody>, NetError> {
        let uri: hyper::Uri = self
            .request
            .url
            .as_str()
            .parse()
            .map_err(|_| NetError::InvalidUrl)?;

        let body = match &self.request.body {
            Some(body) if !body.is_empty() && !self.request.is_bodyless_method() => {
                let client = self.client.clone();
                UploadBody::spawn(
                    body.clone(),
                    self.blobs.clone(),
                    self.pipe_capacity,
                    move |position, total| client.on_upload_progress(position, total),
                )
            }
            _ => UploadBody::empty(),
        };

        let mut request = hyper::Request::new(body);
        *request.method_mut() = self.request.method.clone();
        *request.uri_mut() = uri;

        let headers = request.headers_mut();
        headers.extend(self.request.headers.clone());
        headers.extend(self.request.cors_exempt_headers.clone());

        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }
        if let Some(referrer) = &self.request.referrer {
            if let Ok(value) = HeaderValue::from_str(referrer.as_str()) {
                headers.insert(REFERER, value);
            }
        }
        if self.request.flags.use_session_cookies && !headers.contains_key(COOKIE) {
            if let Some(cookie) = self.cookies.header_for(&self.request.url) {
                headers.insert(COOKIE, cookie);
            }
        }
        if let Some((credentials, is_proxy)) = credentials {
            let value = basic_credentials(&credentials.username, &credentials.password)?;
            let name = if is_proxy { PROXY_AUTHORIZATION } else { AUTHORIZATION };
            headers.insert(name, value);
        }

        Ok(request)
    }

    /// Basic challenge carried by a 401/407, if any.
    fn challenge_for(&self, head: &ResponseHead) -> Option<AuthChallenge> {
        let (is_proxy, header) = match head.status {
            StatusCode::UNAUTHORIZED => (false, WWW_AUTHENTICATE),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => (true, PROXY_AUTHENTICATE),
            _ => return None,
        };
        // A chunked body cannot be replayed for the retry.
        if self.request.body.as_ref().is_some_and(|b| b.is_chunked()) {
            return None;
        }

        head.headers.get_all(header).iter().find_map(|value| {
            let (scheme, realm) = parse_challenge(value.to_str().ok()?);
            (scheme == "basic").then(|| AuthChallenge {
                is_proxy,
                scheme,
                realm,
                host: self.request.url.host_str().unwrap_or_default().to_string(),
                port: self.request.url.port_or_known_default(),
            })
        })
    }

    async fn stream_body(&self, head: ResponseHead, mut body: Incoming) -> CompletionStatus {
        let (mut producer, consumer) = match pipe::create(self.pipe_capacity) {
            Ok(pair) => pair,
            Err(e) => return CompletionStatus::failed(e),
        };
        self.client.on_receive_response(head, consumer);

        let mut received = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, received, "Response body failed");
                    return CompletionStatus::failed(NetError::Failed);
                }
            };
            let Ok(data) = frame.into_data() else {
                continue;
            };
            let len = data.len() as u64;
            if producer.write(data).await.is_err() {
                return CompletionStatus::failed(NetError::Canceled);
            }
            received += len;
        }

        metrics::record_body_bytes("download", received);
        CompletionStatus::ok(received)
    }
}

/// First `NetError` in an error's source chain, e.g. a failed upload body.
fn net_error_in(error: &(dyn std::error::Error + 'static)) -> Option<NetError> {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(net) = e.downcast_ref::<NetError>() {
            return Some(*net);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_error_found_in_source_chain() {
        #[derive(Debug)]
        struct Wrapper(NetError);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "wrapped")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let err = Wrapper(NetError::UploadFileChanged);
        assert_eq!(net_error_in(&err), Some(NetError::UploadFileChanged));
    }

    #[tokio::test]
    async fn unknown_scheme_fails_without_network() {
        let factory = NetworkLoaderFactory::new(&LoaderConfig::default(), BlobStore::new());
        let request = RequestDescriptor::get(url::Url::parse("myproto://x").unwrap());
        let mut handle = factory.start(request);

        match handle.next_event().await {
            Some(crate::loader::LoaderEvent::Complete(status)) => {
                assert_eq!(status.error, Some(NetError::UnknownUrlScheme));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
