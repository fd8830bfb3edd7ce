//! Caller-facing request handle.

use bytes::Bytes;
use http::header::HeaderValue;
use tokio::sync::{mpsc, oneshot};

use crate::http::headers::parse_header;
use crate::http::{RequestDescriptor, RequestPriority};
use crate::request::controller::{Command, Controller};
use crate::request::events::{RequestError, RequestEvent};
use crate::request::options::{RedirectMode, RequestOptions};
use crate::request::state::{RequestState, SharedState};
use crate::session::Session;
use crate::upload::{ChunkedBodyWriter, ChunkedUpload, RequestBody};

#[derive(Debug)]
enum UploadItem {
    Chunk(Bytes),
    Done,
}

/// An outbound request built from [`RequestOptions`].
///
/// Nothing is sent until the first `write` (chunked body) or `end`. Events
/// are read with [`next_event`](Self::next_event); dropping the handle
/// cancels the request without further events.
pub struct ClientRequest {
    session: Session,
    request: Option<RequestDescriptor>,
    redirect_mode: RedirectMode,
    state: SharedState,
    response_state: SharedState,
    event_tx: Option<mpsc::UnboundedSender<RequestEvent>>,
    event_rx: mpsc::UnboundedReceiver<RequestEvent>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    upload: Option<mpsc::UnboundedSender<UploadItem>>,
    ended: bool,
}

impl ClientRequest {
    pub(crate) fn new(session: Session, options: RequestOptions) -> Result<Self, RequestError> {
        let request = options.to_descriptor()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session,
            request: Some(request),
            redirect_mode: options.redirect,
            state: SharedState::default(),
            response_state: SharedState::default(),
            event_tx: Some(event_tx),
            event_rx,
            commands: None,
            upload: None,
            ended: false,
        })
    }

    fn pending_request(&mut self) -> Result<&mut RequestDescriptor, RequestError> {
        self.request.as_mut().ok_or(RequestError::HeadersSent)
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), RequestError> {
        let request = self.pending_request()?;
        let (name, value) = parse_header(name, value)?;
        request.headers.insert(name, value);
        Ok(())
    }

    /// Header value as set before start, if any.
    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.request.as_ref()?.headers.get(name)
    }

    pub fn remove_header(&mut self, name: &str) -> Result<(), RequestError> {
        self.pending_request()?.headers.remove(name);
        Ok(())
    }

    /// Write a body chunk. The first write starts the request with a
    /// chunked body; later chunks are queued and sent in order.
    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), RequestError> {
        if self.ended || self.state.get().is_error() {
            return Err(RequestError::WriteAfterEnd);
        }
        if self.upload.is_none() {
            if self.request.is_none() {
                return Err(RequestError::WriteAfterEnd);
            }
            self.start_chunked();
        }
        self.send_upload(UploadItem::Chunk(chunk.into()));
        Ok(())
    }

    /// Finish the body. Before any `write` this sends `chunk` as a
    /// fixed-size body; afterwards it is the last chunk.
    pub fn end(&mut self, chunk: Option<Bytes>) -> Result<(), RequestError> {
        if self.ended || self.state.get().is_error() {
            return Err(RequestError::WriteAfterEnd);
        }
        self.ended = true;

        if self.upload.is_some() {
            if let Some(chunk) = chunk {
                self.send_upload(UploadItem::Chunk(chunk));
            }
            self.send_upload(UploadItem::Done);
            self.state.insert(RequestState::FINISHED);
            return Ok(());
        }

        let mut request = self.request.take().ok_or(RequestError::WriteAfterEnd)?;
        if let Some(chunk) = chunk.filter(|c| !c.is_empty()) {
            request.body = Some(RequestBody::from_bytes(chunk));
        }
        self.state.insert(RequestState::FINISHED);
        self.start(request);
        Ok(())
    }

    /// Cancel the request. A no-op once it has failed, been cancelled or
    /// closed.
    pub fn abort(&mut self) {
        if self.state.get().is_error() {
            return;
        }

        match &self.commands {
            Some(commands) => {
                let _ = commands.send(Command::Abort);
            }
            None => {
                if self.state.enter_terminal(RequestState::CANCELED) {
                    self.request = None;
                    if let Some(events) = self.event_tx.take() {
                        let _ = events.send(RequestEvent::Abort);
                        let _ = events.send(RequestEvent::Close);
                    }
                    self.state.insert(RequestState::CLOSED);
                }
            }
        }
    }

    /// Continue past a redirect reported in manual mode.
    pub fn follow_redirect(&self) -> Result<(), RequestError> {
        if self.redirect_mode != RedirectMode::Manual {
            return Err(RequestError::RedirectMode);
        }
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::FollowRedirect);
        }
        Ok(())
    }

    pub fn set_priority(&mut self, priority: RequestPriority) {
        match (&mut self.request, &self.commands) {
            (Some(request), _) => request.priority = priority,
            (None, Some(commands)) => {
                let _ = commands.send(Command::SetPriority(priority));
            }
            (None, None) => {}
        }
    }

    /// Next lifecycle event; `None` after `Close` has been read.
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        self.event_rx.recv().await
    }

    pub fn state(&self) -> RequestState {
        self.state.get()
    }

    pub fn response_state(&self) -> RequestState {
        self.response_state.get()
    }

    fn start_chunked(&mut self) {
        let Some(mut request) = self.request.take() else {
            return;
        };
        let (writer_tx, writer_rx) = oneshot::channel();
        let upload = ChunkedUpload::new(move |writer| {
            let _ = writer_tx.send(writer);
        });
        request.body = Some(RequestBody::chunked(upload));

        let (item_tx, item_rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_upload(writer_rx, item_rx));
        self.upload = Some(item_tx);
        self.start(request);
    }

    fn start(&mut self, request: RequestDescriptor) {
        let Some(events) = self.event_tx.take() else {
            return;
        };
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.commands = Some(command_tx);
        self.state.insert(RequestState::STARTED);

        Controller::new(
            self.session.clone(),
            request,
            self.redirect_mode,
            self.state.clone(),
            self.response_state.clone(),
            events,
            command_rx,
        )
        .spawn();
    }

    fn send_upload(&self, item: UploadItem) {
        if let Some(upload) = &self.upload {
            if upload.send(item).is_err() {
                tracing::debug!("Chunked upload already finished");
            }
        }
    }
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRequest")
            .field("state", &self.state.get())
            .field("redirect_mode", &self.redirect_mode)
            .field("ended", &self.ended)
            .finish()
    }
}

/// Feed queued chunks to the transport's writer one at a time.
async fn drain_upload(
    writer: oneshot::Receiver<ChunkedBodyWriter>,
    mut items: mpsc::UnboundedReceiver<UploadItem>,
) {
    let Ok(writer) = writer.await else {
        tracing::debug!("Transport never read the chunked body");
        return;
    };

    while let Some(item) = items.recv().await {
        match item {
            UploadItem::Chunk(chunk) => {
                if let Err(error) = writer.write(chunk).await {
                    tracing::debug!(%error, "Chunked upload stopped");
                    return;
                }
            }
            UploadItem::Done => {
                if let Err(error) = writer.done() {
                    tracing::debug!(%error, "Chunked upload done() rejected");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::error::NetError;
    use crate::http::RequestDescriptor;
    use crate::protocol::{ProtocolResponse, ProtocolType, Responder};

    fn session() -> Session {
        Session::new(LoaderConfig::default())
    }

    async fn collect(request: &mut ClientRequest) -> Vec<RequestEvent> {
        let mut events = Vec::new();
        while let Some(event) = request.next_event().await {
            events.push(event);
        }
        events
    }

    fn names(events: &[RequestEvent]) -> Vec<&'static str> {
        events.iter().map(RequestEvent::name).collect()
    }

    #[tokio::test]
    async fn string_protocol_delivers_body() {
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

        let mut request = session.request(RequestOptions::new("myproto://x")).unwrap();
        request.end(None).unwrap();
        let events = collect(&mut request).await;

        assert_eq!(names(&events), ["response", "data", "download-progress", "complete", "close"]);
        match &events[0] {
            RequestEvent::Response(info) => {
                assert_eq!(info.status.as_u16(), 200);
                assert_eq!(info.mime_type, "text/plain");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &events[1] {
            RequestEvent::Data(data) => assert_eq!(&data[..], b"hello"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(request.response_state().contains(RequestState::FINISHED));
        assert!(request.state().contains(RequestState::CLOSED));
    }

    #[tokio::test]
    async fn abort_before_start_emits_abort_then_close() {
        let mut request = session().request(RequestOptions::new("http://a.test/")).unwrap();
        request.abort();
        request.abort();

        let events = collect(&mut request).await;
        assert_eq!(names(&events), ["abort", "close"]);
        assert!(request.state().contains(RequestState::CANCELED));
        assert_eq!(request.end(None), Err(RequestError::WriteAfterEnd));
    }

    #[tokio::test]
    async fn handler_error_is_reported_once() {
        let session = session();
        session
            .protocol()
            .register_protocol(
                "broken",
                ProtocolType::Buffer,
                |_: RequestDescriptor, responder: Responder| {
                    let _ = responder.fail(NetError::FileNotFound);
                },
            )
            .unwrap();

        let mut request = session.request(RequestOptions::new("broken://x")).unwrap();
        request.end(None).unwrap();
        let events = collect(&mut request).await;

        assert_eq!(names(&events), ["error", "close"]);
        match &events[0] {
            RequestEvent::Error(error) => {
                assert_eq!(*error, RequestError::Net(NetError::FileNotFound));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(request.state().contains(RequestState::FAILED));
    }

    #[tokio::test]
    async fn headers_are_locked_after_start() {
        let session = session();
        session
            .protocol()
            .register_protocol(
                "app",
                ProtocolType::String,
                |_: RequestDescriptor, responder: Responder| {
                    let _ = responder.respond("ok");
                },
            )
            .unwrap();

        let mut request = session.request(RequestOptions::new("app://x")).unwrap();
        request.set_header("x-one", "1").unwrap();
        assert_eq!(request.get_header("x-one").unwrap(), "1");
        request.remove_header("x-one").unwrap();
        assert!(request.get_header("x-one").is_none());
        assert_eq!(
            request.set_header("bad name", "1"),
            Err(RequestError::Net(NetError::InvalidArgument))
        );

        request.end(None).unwrap();
        assert_eq!(request.set_header("x-two", "2"), Err(RequestError::HeadersSent));
        assert_eq!(request.write(Bytes::from_static(b"x")), Err(RequestError::WriteAfterEnd));
        assert_eq!(request.end(None), Err(RequestError::WriteAfterEnd));
    }

    #[tokio::test]
    async fn follow_redirect_requires_manual_mode() {
        let request = session().request(RequestOptions::new("http://a.test/")).unwrap();
        assert_eq!(request.follow_redirect(), Err(RequestError::RedirectMode));

        let manual = session()
            .request(RequestOptions::new("http://a.test/").redirect(RedirectMode::Manual))
            .unwrap();
        assert!(manual.follow_redirect().is_ok());
    }

    #[tokio::test]
    async fn late_answer_after_drop_is_ignored() {
        let session = session();
        let (tx, rx) = oneshot::channel::<Responder>();
        let tx = std::sync::Mutex::new(Some(tx));
        session
            .protocol()
            .register_protocol(
                "slow",
                ProtocolType::String,
                move |_: RequestDescriptor, responder: Responder| {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(responder);
                    }
                },
            )
            .unwrap();

        let mut request = session.request(RequestOptions::new("slow://x")).unwrap();
        request.end(None).unwrap();
        let responder = rx.await.unwrap();
        drop(request);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(responder.respond("late").is_ok());
        assert!(responder.is_handled());
    }
}
