//! Consumer/transport channel pair.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::http::{FollowRedirectParams, RedirectInfo, RequestPriority, ResponseHead};
use crate::loader::events::{
    AuthChallenge, AuthCredentials, AuthResponder, CompletionStatus, LoaderCommand, LoaderEvent,
};
use crate::net::pipe::PipeConsumer;

/// Create a connected handle/endpoint pair.
pub fn pair() -> (LoaderHandle, LoaderEndpoint) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    (
        LoaderHandle {
            events: event_rx,
            commands: command_tx,
        },
        LoaderEndpoint {
            client: LoaderClient { tx: event_tx },
            commands: CommandReceiver { rx: command_rx },
        },
    )
}

/// Consumer side of a load. Dropping it cancels the load.
#[derive(Debug)]
pub struct LoaderHandle {
    events: mpsc::UnboundedReceiver<LoaderEvent>,
    commands: mpsc::UnboundedSender<LoaderCommand>,
}

impl LoaderHandle {
    /// Next event, or `None` once the transport side is gone.
    pub async fn next_event(&mut self) -> Option<LoaderEvent> {
        self.events.recv().await
    }

    pub fn follow_redirect(&self, params: FollowRedirectParams) {
        let _ = self.commands.send(LoaderCommand::FollowRedirect(params));
    }

    pub fn set_priority(&self, priority: RequestPriority) {
        let _ = self.commands.send(LoaderCommand::SetPriority(priority));
    }
}

/// Transport side of a load.
#[derive(Debug)]
pub struct LoaderEndpoint {
    client: LoaderClient,
    commands: CommandReceiver,
}

impl LoaderEndpoint {
    pub fn into_parts(self) -> (LoaderClient, CommandReceiver) {
        (self.client, self.commands)
    }

    pub fn from_parts(client: LoaderClient, commands: CommandReceiver) -> Self {
        Self { client, commands }
    }

    pub fn client(&self) -> &LoaderClient {
        &self.client
    }
}

/// Sends events to the consumer. Sends after disconnect are dropped.
#[derive(Debug, Clone)]
pub struct LoaderClient {
    tx: mpsc::UnboundedSender<LoaderEvent>,
}

impl LoaderClient {
    fn send(&self, event: LoaderEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Loader consumer already disconnected");
        }
    }

    pub fn on_receive_redirect(&self, info: RedirectInfo, head: ResponseHead) {
        self.send(LoaderEvent::ReceiveRedirect { info, head });
    }

    pub fn on_receive_response(&self, head: ResponseHead, body: PipeConsumer) {
        self.send(LoaderEvent::ReceiveResponse { head, body });
    }

    pub fn on_upload_progress(&self, position: u64, total: u64) {
        self.send(LoaderEvent::UploadProgress { position, total });
    }

    /// Ask the consumer for credentials.
    pub fn on_auth_required(
        &self,
        challenge: AuthChallenge,
    ) -> oneshot::Receiver<Option<AuthCredentials>> {
        let (responder, rx) = AuthResponder::new();
        self.send(LoaderEvent::AuthRequired {
            challenge,
            responder,
        });
        rx
    }

    pub fn on_complete(&self, status: CompletionStatus) {
        self.send(LoaderEvent::Complete(status));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has dropped its handle.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Receives consumer commands.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<LoaderCommand>,
}

impl CommandReceiver {
    pub async fn next(&mut self) -> Option<LoaderCommand> {
        self.rx.recv().await
    }

    /// Wait for a follow-redirect, skipping priority changes.
    ///
    /// `None` means the consumer went away instead.
    pub async fn wait_for_follow(&mut self) -> Option<FollowRedirectParams> {
        loop {
            match self.rx.recv().await? {
                LoaderCommand::FollowRedirect(params) => return Some(params),
                LoaderCommand::SetPriority(priority) => {
                    tracing::trace!(?priority, "Priority change while waiting on redirect");
                }
            }
        }
    }
}

/// Run a transport future until it finishes or the consumer disconnects.
pub fn spawn_loader<F>(client: &LoaderClient, span: tracing::Span, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let watcher = client.clone();
    tokio::spawn(
        async move {
            tokio::select! {
                _ = fut => {}
                _ = watcher.closed() => {
                    tracing::debug!("Loader consumer disconnected, aborting transport");
                }
            }
        }
        .instrument(span),
    );
}
