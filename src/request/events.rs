//! Events delivered to a `ClientRequest` consumer.

use bytes::Bytes;
use http::header::HeaderMap;
use http::{Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::error::NetError;
use crate::http::ResponseHead;
use crate::loader::{AuthChallenge, AuthResponder};
use crate::upload::UploadError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("Request cannot follow redirect with the current redirect mode")]
    RedirectMode,

    #[error("Cannot change headers after the request has started")]
    HeadersSent,

    #[error("Cannot write after the request body has ended")]
    WriteAfterEnd,

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Response metadata as delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInfo {
    pub url: Url,
    pub status: StatusCode,
    pub status_text: String,
    pub http_version: &'static str,
    pub mime_type: String,
    pub charset: String,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
}

impl ResponseInfo {
    pub(crate) fn new(head: &ResponseHead, url: &Url) -> Self {
        Self {
            url: url.clone(),
            status: head.status,
            status_text: head.status_text.clone(),
            http_version: head.http_version(),
            mime_type: head.mime_type.clone(),
            charset: head.charset.clone(),
            headers: head.headers.clone(),
            content_length: head.content_length,
        }
    }
}

/// Lifecycle of a client request, in delivery order.
///
/// `Response`, `Data`/`DownloadProgress`, `Complete`, `Close`; or `Error`,
/// `Close`; or `Abort` (plus `ResponseAborted` if a response was being
/// read), `Close`. `Redirect`, `Login` and `UploadProgress` may come before
/// `Response`. Nothing follows `Close`.
#[derive(Debug)]
pub enum RequestEvent {
    Response(ResponseInfo),
    Redirect {
        status: StatusCode,
        method: Method,
        url: Url,
        headers: HeaderMap,
    },
    /// Answer with `callback.respond(Some(credentials))`, or `None` to get the
    /// challenge response itself. Dropping the callback cancels the request.
    Login {
        challenge: AuthChallenge,
        callback: AuthResponder,
    },
    UploadProgress {
        position: u64,
        total: u64,
    },
    DownloadProgress {
        received: u64,
        total: Option<u64>,
    },
    Data(Bytes),
    Complete,
    Error(RequestError),
    Abort,
    ResponseAborted,
    Close,
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::Response(_) => "response",
            RequestEvent::Redirect { .. } => "redirect",
            RequestEvent::Login { .. } => "login",
            RequestEvent::UploadProgress { .. } => "upload-progress",
            RequestEvent::DownloadProgress { .. } => "download-progress",
            RequestEvent::Data(_) => "data",
            RequestEvent::Complete => "complete",
            RequestEvent::Error(_) => "error",
            RequestEvent::Abort => "abort",
            RequestEvent::ResponseAborted => "response-aborted",
            RequestEvent::Close => "close",
        }
    }
}
