//! Handler contract.
//!
//! # Responsibilities
//! - Define what a scheme handler receives and how it answers
//! - Model handler results: bare text, bare bytes, bare stream, or a
//!   structured `ProtocolResponse`
//! - Parse the JSON shape of a structured response
//!
//! # Design Decisions
//! - `Responder` is cloneable so handlers can move it into spawned tasks;
//!   the first `respond`/`continue_request` wins and later calls fail with
//!   `AlreadyHandled`
//! - Dropping every clone without answering is observable by the loader,
//!   which completes the request with `NotImplemented`

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Deserializer};
use tokio::sync::oneshot;

use crate::error::NetError;
use crate::http::RequestDescriptor;
use crate::protocol::registry::ProtocolError;
use crate::protocol::stream::PullSource;

/// How a handler's result is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    Buffer,
    String,
    File,
    Http,
    Stream,
    /// Inferred from the shape of the result.
    Free,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Buffer => "buffer",
            ProtocolType::String => "string",
            ProtocolType::File => "file",
            ProtocolType::Http => "http",
            ProtocolType::Stream => "stream",
            ProtocolType::Free => "free",
        }
    }

    /// Types that accept a bare text result.
    pub fn accepts_bare_text(&self) -> bool {
        matches!(self, ProtocolType::String | ProtocolType::File | ProtocolType::Free)
    }
}

impl FromStr for ProtocolType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buffer" => Ok(ProtocolType::Buffer),
            "string" => Ok(ProtocolType::String),
            "file" => Ok(ProtocolType::File),
            "http" => Ok(ProtocolType::Http),
            "stream" => Ok(ProtocolType::Stream),
            "free" => Ok(ProtocolType::Free),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers requests for a scheme.
pub trait ProtocolHandler: Send + Sync + 'static {
    fn handle(&self, request: RequestDescriptor, responder: Responder);
}

impl<F> ProtocolHandler for F
where
    F: Fn(RequestDescriptor, Responder) + Send + Sync + 'static,
{
    fn handle(&self, request: RequestDescriptor, responder: Responder) {
        self(request, responder)
    }
}

pub type SharedHandler = Arc<dyn ProtocolHandler>;

/// What a handler decided.
#[derive(Debug)]
pub enum HandlerOutcome {
    Respond(HandlerResult),
    /// Interceptors only: hand the request to the wrapped transport.
    Continue,
}

/// One-shot answer slot for a handler invocation.
#[derive(Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<HandlerOutcome>>>>,
    interceptable: bool,
}

impl Responder {
    pub(crate) fn new(interceptable: bool) -> (Self, oneshot::Receiver<HandlerOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
                interceptable,
            },
            rx,
        )
    }

    pub fn respond(&self, result: impl Into<HandlerResult>) -> Result<(), ProtocolError> {
        self.finish(HandlerOutcome::Respond(result.into()))
    }

    /// Complete with a net error code.
    pub fn fail(&self, error: NetError) -> Result<(), ProtocolError> {
        self.respond(ProtocolResponse::error(error))
    }

    /// Let the request through to the normal transport.
    pub fn continue_request(&self) -> Result<(), ProtocolError> {
        if !self.interceptable {
            return Err(ProtocolError::ContinueNotAllowed);
        }
        self.finish(HandlerOutcome::Continue)
    }

    pub fn is_handled(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    fn finish(&self, outcome: HandlerOutcome) -> Result<(), ProtocolError> {
        let tx = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ProtocolError::AlreadyHandled)?;
        if tx.send(outcome).is_err() {
            tracing::debug!("Handler answered a request that was already cancelled");
        }
        Ok(())
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("handled", &self.is_handled())
            .field("interceptable", &self.interceptable)
            .finish()
    }
}

/// A handler's answer.
pub enum HandlerResult {
    Object(ProtocolResponse),
    Text(String),
    Bytes(Bytes),
    Stream(Box<dyn PullSource>),
}

impl HandlerResult {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerResult::Object(_) => "object",
            HandlerResult::Text(_) => "text",
            HandlerResult::Bytes(_) => "bytes",
            HandlerResult::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for HandlerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerResult::Object(response) => f.debug_tuple("Object").field(response).finish(),
            HandlerResult::Text(text) => f.debug_tuple("Text").field(text).finish(),
            HandlerResult::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            HandlerResult::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<ProtocolResponse> for HandlerResult {
    fn from(response: ProtocolResponse) -> Self {
        HandlerResult::Object(response)
    }
}

impl From<String> for HandlerResult {
    fn from(text: String) -> Self {
        HandlerResult::Text(text)
    }
}

impl From<&str> for HandlerResult {
    fn from(text: &str) -> Self {
        HandlerResult::Text(text.to_string())
    }
}

impl From<Bytes> for HandlerResult {
    fn from(bytes: Bytes) -> Self {
        HandlerResult::Bytes(bytes)
    }
}

impl From<Vec<u8>> for HandlerResult {
    fn from(bytes: Vec<u8>) -> Self {
        HandlerResult::Bytes(bytes.into())
    }
}

impl From<Box<dyn PullSource>> for HandlerResult {
    fn from(source: Box<dyn PullSource>) -> Self {
        HandlerResult::Stream(source)
    }
}

/// The `data` member of a structured response.
#[derive(Default)]
pub enum ResponseData {
    #[default]
    Null,
    Bytes(Bytes),
    Text(String),
    Stream(Box<dyn PullSource>),
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseData::Null => f.write_str("Null"),
            ResponseData::Bytes(bytes) => write!(f, "Bytes({})", bytes.len()),
            ResponseData::Text(text) => write!(f, "Text({})", text.len()),
            ResponseData::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Which session a proxied request runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionChoice {
    #[default]
    Inherit,
    /// `session: null`: a fresh, throwaway session.
    Ephemeral,
}

/// Body attached to a proxied non-GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOverride {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Structured handler result.
#[derive(Debug, Default)]
pub struct ProtocolResponse {
    pub status_code: Option<u16>,
    pub charset: Option<String>,
    pub mime_type: Option<String>,
    /// Ordered; a header given as a list appears once per value.
    pub headers: Vec<(String, String)>,
    pub data: ResponseData,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub referrer: Option<String>,
    pub session: SessionChoice,
    pub upload_data: Option<UploadOverride>,
    /// Net error code; short-circuits to an error completion.
    pub error: Option<i32>,
}

impl ProtocolResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(error: NetError) -> Self {
        Self {
            error: Some(error.code()),
            ..Self::default()
        }
    }

    pub fn status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bytes(mut self, data: impl Into<Bytes>) -> Self {
        self.data = ResponseData::Bytes(data.into());
        self
    }

    pub fn text(mut self, data: impl Into<String>) -> Self {
        self.data = ResponseData::Text(data.into());
        self
    }

    pub fn stream(mut self, source: impl PullSource) -> Self {
        self.data = ResponseData::Stream(Box::new(source));
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn ephemeral_session(mut self) -> Self {
        self.session = SessionChoice::Ephemeral;
        self
    }

    pub fn upload_data(mut self, content_type: Option<String>, data: impl Into<Bytes>) -> Self {
        self.upload_data = Some(UploadOverride {
            content_type,
            data: data.into(),
        });
        self
    }

    /// Parse the camelCase JSON form, e.g.
    /// `{"statusCode": 200, "mimeType": "text/plain", "data": "hello"}`.
    ///
    /// `data` may be a string or an array of byte values; header values may
    /// be a string or a list of strings.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let wire: WireResponse =
            serde_json::from_str(json).map_err(|e| ProtocolError::InvalidResponse(e.to_string()))?;
        Ok(wire.into())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    status_code: Option<u16>,
    charset: Option<String>,
    mime_type: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, WireHeader>,
    data: Option<WireData>,
    path: Option<PathBuf>,
    url: Option<String>,
    method: Option<String>,
    referrer: Option<String>,
    #[serde(default, deserialize_with = "present")]
    session: Option<Option<serde_json::Value>>,
    upload_data: Option<WireUpload>,
    error: Option<i32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireHeader {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireData {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<WireData> for Bytes {
    fn from(data: WireData) -> Self {
        match data {
            WireData::Text(text) => Bytes::from(text),
            WireData::Bytes(bytes) => Bytes::from(bytes),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUpload {
    content_type: Option<String>,
    data: WireData,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl From<WireResponse> for ProtocolResponse {
    fn from(wire: WireResponse) -> Self {
        let headers = wire
            .headers
            .into_iter()
            .flat_map(|(name, value)| {
                let values = match value {
                    WireHeader::One(v) => vec![v],
                    WireHeader::Many(vs) => vs,
                };
                values.into_iter().map(move |v| (name.clone(), v))
            })
            .collect();

        let data = match wire.data {
            None => ResponseData::Null,
            Some(WireData::Text(text)) => ResponseData::Text(text),
            Some(WireData::Bytes(bytes)) => ResponseData::Bytes(bytes.into()),
        };

        let session = match wire.session {
            Some(None) => SessionChoice::Ephemeral,
            _ => SessionChoice::Inherit,
        };

        Self {
            status_code: wire.status_code,
            charset: wire.charset,
            mime_type: wire.mime_type,
            headers,
            data,
            path: wire.path,
            url: wire.url,
            method: wire.method,
            referrer: wire.referrer,
            session,
            upload_data: wire.upload_data.map(|u| UploadOverride {
                content_type: u.content_type,
                data: u.data.into(),
            }),
            error: wire.error,
        }
    }
}
