//! Streaming request controller.
//!
//! # Responsibilities
//! - Pick a transport for the held request and start it
//! - Follow redirects in place on the network transport, or restart the
//!   request on whichever transport serves the new URL
//! - Translate loader events and body chunks into `RequestEvent`s
//!
//! # Design Decisions
//! - One task per request owns the descriptor and the loader handle; the
//!   `ClientRequest` talks to it through a command channel
//! - `Complete` is held back until the body pipe reaches EOF so `Data`
//!   never follows `Complete`
//! - Once a terminal flag is set the task emits `Close` and exits; dropping
//!   the loader handle cancels whatever transport was running

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::Instrument;
use url::Url;

use crate::error::NetError;
use crate::http::{FollowRedirectParams, RedirectInfo, RequestDescriptor, RequestPriority, ResponseHead};
use crate::loader::{CompletionStatus, LoaderEvent, LoaderHandle, SharedLoaderFactory};
use crate::net::pipe::PipeConsumer;
use crate::observability::metrics;
use crate::observability::span::request_span;
use crate::protocol::ProtocolLoaderFactory;
use crate::request::events::{RequestError, RequestEvent, ResponseInfo};
use crate::request::options::RedirectMode;
use crate::request::state::{RequestState, SharedState};
use crate::session::Session;
use crate::transport::is_network_scheme;

type Flow = ControlFlow<()>;

/// `ClientRequest` → controller commands.
#[derive(Debug)]
pub(crate) enum Command {
    Abort,
    FollowRedirect,
    SetPriority(RequestPriority),
}

pub(crate) struct Controller {
    session: Session,
    request: RequestDescriptor,
    redirect_mode: RedirectMode,
    max_redirects: usize,
    state: SharedState,
    response_state: SharedState,
    events: mpsc::UnboundedSender<RequestEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    loader: Option<LoaderHandle>,
    body: Option<PipeConsumer>,
    received: u64,
    total: Option<u64>,
    pending_complete: Option<CompletionStatus>,
    pending_redirect: Option<RedirectInfo>,
}

impl Controller {
    pub(crate) fn new(
        session: Session,
        request: RequestDescriptor,
        redirect_mode: RedirectMode,
        state: SharedState,
        response_state: SharedState,
        events: mpsc::UnboundedSender<RequestEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let max_redirects = session.config().redirects.max_redirects as usize;
        Self {
            session,
            request,
            redirect_mode,
            max_redirects,
            state,
            response_state,
            events,
            commands,
            loader: None,
            body: None,
            received: 0,
            total: None,
            pending_complete: None,
            pending_redirect: None,
        }
    }

    pub(crate) fn spawn(self) {
        let span = request_span(self.request.id, "request", &self.request.url);
        tokio::spawn(self.run().instrument(span));
    }

    async fn run(mut self) {
        self.start();

        loop {
            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        tracing::debug!("Client request dropped, cancelling");
                        ControlFlow::Break(())
                    }
                },
                event = next_loader_event(&mut self.loader) => match event {
                    Some(event) => self.on_loader_event(event),
                    None => {
                        tracing::warn!("Transport went away without completing");
                        self.fail(NetError::Failed.into())
                    }
                },
                chunk = next_chunk(&mut self.body) => self.on_body_chunk(chunk),
            };

            if flow.is_break() {
                return;
            }
        }
    }

    /// Select a transport for the current URL and start it.
    fn start(&mut self) {
        let (transport, factory) = self.select_factory();
        tracing::debug!(
            request_id = %self.request.id,
            url = %self.request.url,
            transport,
            "Starting request"
        );
        self.loader = Some(factory.start(self.request.clone()));
    }

    fn select_factory(&self) -> (&'static str, SharedLoaderFactory) {
        let registry = self.session.protocol();
        let scheme = self.request.scheme();

        if !self.request.flags.bypass_custom_protocol_handlers {
            if registry.is_protocol_intercepted(scheme) {
                return ("intercept", Arc::new(self.session.intercepting_factory()));
            }
            if let Some(entry) = registry.registered(scheme) {
                return (
                    "protocol",
                    Arc::new(ProtocolLoaderFactory::new(self.session.clone(), entry)),
                );
            }
        }

        if scheme == "file" {
            ("file", Arc::new(self.session.file().clone()))
        } else {
            // The intercepting factory flags allowlisted hosts before the
            // router hands them to the network transport.
            ("network", Arc::new(self.session.intercepting_factory()))
        }
    }

    /// True when `url` would be served by the plain network transport.
    fn served_by_network(&self, url: &Url) -> bool {
        if !is_network_scheme(url) {
            return false;
        }
        if self.request.flags.bypass_custom_protocol_handlers {
            return true;
        }
        let registry = self.session.protocol();
        !registry.is_protocol_intercepted(url.scheme())
            && !registry.is_protocol_registered(url.scheme())
    }

    fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Abort => self.abort(),
            Command::FollowRedirect => match self.pending_redirect.take() {
                Some(info) => self.follow(info),
                None => {
                    tracing::debug!("follow_redirect() without a pending redirect");
                    ControlFlow::Continue(())
                }
            },
            Command::SetPriority(priority) => {
                self.request.priority = priority;
                if let Some(loader) = &self.loader {
                    loader.set_priority(priority);
                }
                ControlFlow::Continue(())
            }
        }
    }

    fn on_loader_event(&mut self, event: LoaderEvent) -> Flow {
        match event {
            LoaderEvent::ReceiveRedirect { info, head } => self.on_redirect(info, head),
            LoaderEvent::ReceiveResponse { head, body } => {
                self.response_state.insert(RequestState::STARTED);
                self.total = head.content_length;
                self.emit(RequestEvent::Response(ResponseInfo::new(&head, &self.request.url)));
                self.body = Some(body);
                ControlFlow::Continue(())
            }
            LoaderEvent::UploadProgress { position, total } => {
                self.emit(RequestEvent::UploadProgress { position, total });
                ControlFlow::Continue(())
            }
            LoaderEvent::AuthRequired {
                challenge,
                responder,
            } => {
                self.emit(RequestEvent::Login {
                    challenge,
                    callback: responder,
                });
                ControlFlow::Continue(())
            }
            LoaderEvent::Complete(status) => {
                self.loader = None;
                match status.error {
                    Some(NetError::Canceled) => self.abort(),
                    Some(error) => self.fail(error.into()),
                    None if self.body.is_some() => {
                        self.pending_complete = Some(status);
                        ControlFlow::Continue(())
                    }
                    None => self.finish(status),
                }
            }
        }
    }

    fn on_body_chunk(&mut self, chunk: Option<Bytes>) -> Flow {
        match chunk {
            Some(chunk) => {
                self.received += chunk.len() as u64;
                self.emit(RequestEvent::Data(chunk));
                self.emit(RequestEvent::DownloadProgress {
                    received: self.received,
                    total: self.total,
                });
                ControlFlow::Continue(())
            }
            None => {
                self.body = None;
                match self.pending_complete.take() {
                    Some(status) => self.finish(status),
                    None => ControlFlow::Continue(()),
                }
            }
        }
    }

    fn on_redirect(&mut self, info: RedirectInfo, head: ResponseHead) -> Flow {
        if self.request.redirect_count() >= self.max_redirects {
            return self.fail(NetError::TooManyRedirects.into());
        }

        match self.redirect_mode {
            RedirectMode::Error => self.fail(RequestError::RedirectMode),
            RedirectMode::Follow => {
                self.emit_redirect(&info, head);
                self.follow(info)
            }
            RedirectMode::Manual => {
                self.emit_redirect(&info, head);
                self.pending_redirect = Some(info);
                ControlFlow::Continue(())
            }
        }
    }

    fn emit_redirect(&self, info: &RedirectInfo, head: ResponseHead) {
        self.emit(RequestEvent::Redirect {
            status: info.status_code,
            method: info.new_method.clone(),
            url: info.new_url.clone(),
            headers: head.headers,
        });
    }

    /// Follow on the running network transport when it serves both ends,
    /// otherwise restart on the transport for the new URL.
    fn follow(&mut self, info: RedirectInfo) -> Flow {
        let in_place = self.loader.is_some()
            && self.served_by_network(&self.request.url)
            && self.served_by_network(&info.new_url);
        let params = FollowRedirectParams::default();

        self.request.apply_redirect(&info, &params);
        if in_place {
            tracing::debug!(url = %self.request.url, "Following redirect on the network transport");
            if let Some(loader) = &self.loader {
                loader.follow_redirect(params);
            }
        } else {
            tracing::debug!(url = %self.request.url, "Restarting request for redirect");
            metrics::record_redirect("restart");
            self.loader = None;
            self.start();
        }
        ControlFlow::Continue(())
    }

    fn finish(&mut self, status: CompletionStatus) -> Flow {
        tracing::debug!(
            request_id = %self.request.id,
            body_bytes = status.decoded_body_length,
            "Request complete"
        );
        self.response_state.insert(RequestState::FINISHED);
        self.emit(RequestEvent::Complete);
        self.close()
    }

    fn fail(&mut self, error: RequestError) -> Flow {
        if self.state.enter_terminal(RequestState::FAILED) {
            tracing::debug!(request_id = %self.request.id, %error, "Request failed");
            if self.response_state.get().contains(RequestState::STARTED) {
                self.response_state.insert(RequestState::FAILED);
            }
            self.emit(RequestEvent::Error(error));
        }
        self.close()
    }

    fn abort(&mut self) -> Flow {
        if self.state.enter_terminal(RequestState::CANCELED) {
            tracing::debug!(request_id = %self.request.id, "Request aborted");
            self.emit(RequestEvent::Abort);
            let response = self.response_state.get();
            if response.contains(RequestState::STARTED)
                && !response.contains(RequestState::FINISHED)
            {
                self.response_state.insert(RequestState::CANCELED);
                self.emit(RequestEvent::ResponseAborted);
            }
        }
        self.close()
    }

    fn close(&mut self) -> Flow {
        self.loader = None;
        self.body = None;
        self.state.insert(RequestState::CLOSED);
        self.emit(RequestEvent::Close);
        ControlFlow::Break(())
    }

    fn emit(&self, event: RequestEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Request event receiver gone");
        }
    }
}

async fn next_loader_event(loader: &mut Option<LoaderHandle>) -> Option<LoaderEvent> {
    match loader {
        Some(loader) => loader.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_chunk(body: &mut Option<PipeConsumer>) -> Option<Bytes> {
    match body {
        Some(body) => body.read().await,
        None => std::future::pending().await,
    }
}
