//! Events and commands exchanged between a consumer and a transport.

use tokio::sync::oneshot;

use crate::error::NetError;
use crate::http::{FollowRedirectParams, RedirectInfo, RequestPriority, ResponseHead};
use crate::net::pipe::PipeConsumer;

/// Final accounting for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionStatus {
    pub error: Option<NetError>,
    pub encoded_data_length: u64,
    pub encoded_body_length: u64,
    pub decoded_body_length: u64,
}

impl CompletionStatus {
    /// Success after `body_length` bytes.
    pub fn ok(body_length: u64) -> Self {
        Self {
            error: None,
            encoded_data_length: body_length,
            encoded_body_length: body_length,
            decoded_body_length: body_length,
        }
    }

    pub fn failed(error: NetError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// An authentication challenge from a server or proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub is_proxy: bool,
    /// Lowercase auth scheme, e.g. `basic`.
    pub scheme: String,
    pub realm: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

/// Answers one auth challenge.
///
/// `None` continues without credentials; dropping the responder cancels
/// the request.
#[derive(Debug)]
pub struct AuthResponder {
    tx: oneshot::Sender<Option<AuthCredentials>>,
}

impl AuthResponder {
    pub fn new() -> (Self, oneshot::Receiver<Option<AuthCredentials>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn respond(self, credentials: Option<AuthCredentials>) {
        let _ = self.tx.send(credentials);
    }

    /// True once the transport waiting on this answer is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport → consumer notifications.
#[derive(Debug)]
pub enum LoaderEvent {
    /// A redirect; the transport waits for `FollowRedirect` before going on.
    ReceiveRedirect {
        info: RedirectInfo,
        head: ResponseHead,
    },
    ReceiveResponse {
        head: ResponseHead,
        body: PipeConsumer,
    },
    UploadProgress {
        position: u64,
        total: u64,
    },
    AuthRequired {
        challenge: AuthChallenge,
        responder: AuthResponder,
    },
    Complete(CompletionStatus),
}

/// Consumer → transport commands.
#[derive(Debug)]
pub enum LoaderCommand {
    FollowRedirect(FollowRedirectParams),
    SetPriority(RequestPriority),
}
