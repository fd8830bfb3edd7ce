//! Pull stream body adapter.
//!
//! # Responsibilities
//! - Bridge a pull-mode byte source (`read()` plus readable/end/error
//!   notifications) into a response pipe
//! - Keep at most one chunk in flight between the source and the pipe
//! - Destroy the source if the consumer goes away before it ends
//!
//! # Data Flow
//! ```text
//! source ──Readable──▶ adapter ──read()──▶ chunk ──write──▶ pipe ──▶ consumer
//!        ──End/Error─▶ latched while a write is in flight, applied after it
//! ```
//!
//! # Design Decisions
//! - The source is only read after a `Readable` notification and until it
//!   returns `None`, so memory stays bounded by one chunk whatever the
//!   stream's total size
//! - `channel()` gives applications an in-memory source; `End` is only
//!   announced once every queued chunk has been read

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{NetError, NetResult};
use crate::http::ResponseHead;
use crate::loader::{CompletionStatus, LoaderClient};
use crate::net::pipe;

/// Notifications from a pull source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Readable,
    End,
    Error(NetError),
}

/// A byte stream read in paused mode.
pub trait PullSource: Send + 'static {
    /// Next buffered chunk, `None` if nothing is buffered right now.
    fn read(&mut self) -> Option<Bytes>;

    /// Start notifications. `None` means this object cannot be streamed.
    fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>>;

    /// Stop notifications.
    fn unsubscribe(&mut self) {}

    /// Abort the stream; called when the consumer leaves before `End`.
    fn destroy(&mut self) {}
}

/// Stream `source` into a new pipe after sending `head`.
pub(crate) async fn stream_body(
    mut source: Box<dyn PullSource>,
    head: ResponseHead,
    client: &LoaderClient,
    capacity: usize,
) -> CompletionStatus {
    let Some(events) = source.subscribe() else {
        tracing::warn!("Stream result is not a readable stream");
        return CompletionStatus::failed(NetError::NotImplemented);
    };
    let mut adapter = StreamAdapter {
        source: SourceGuard { source, ended: false },
        events,
        readable: false,
        has_read_waiting: false,
        result: None,
    };

    let (mut producer, consumer) = match pipe::create(capacity) {
        Ok(pair) => pair,
        Err(e) => return CompletionStatus::failed(e),
    };
    client.on_receive_response(head, consumer);

    let mut sent = 0u64;
    let result = loop {
        if !adapter.readable {
            // Idle: nothing read or written, so end and error apply now.
            match adapter.next_event().await {
                StreamEvent::Readable => adapter.readable = true,
                StreamEvent::End => break Ok(()),
                StreamEvent::Error(e) => break Err(e),
            }
        }

        let Some(chunk) = adapter.source.source.read() else {
            adapter.readable = std::mem::take(&mut adapter.has_read_waiting);
            continue;
        };

        let len = chunk.len() as u64;
        let write = producer.write(chunk);
        tokio::pin!(write);
        let written = loop {
            tokio::select! {
                biased;
                r = &mut write => break r,
                event = adapter.events.recv(), if adapter.result.is_none() => {
                    adapter.record(event.unwrap_or(StreamEvent::Error(NetError::Failed)));
                }
            }
        };
        if written.is_err() {
            tracing::debug!(sent, "Stream consumer disconnected");
            return CompletionStatus::failed(NetError::Canceled);
        }
        sent += len;

        if let Some(result) = adapter.result.take() {
            break result;
        }
    };

    adapter.source.ended = true;
    match result {
        Ok(()) => CompletionStatus::ok(sent),
        Err(e) => CompletionStatus::failed(e),
    }
}

struct StreamAdapter {
    source: SourceGuard,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    readable: bool,
    /// A `Readable` arrived while a chunk was being written.
    has_read_waiting: bool,
    /// End or error latched while a write was in flight.
    result: Option<NetResult<()>>,
}

impl StreamAdapter {
    async fn next_event(&mut self) -> StreamEvent {
        // A source that drops its notifier without ending has failed.
        self.events
            .recv()
            .await
            .unwrap_or(StreamEvent::Error(NetError::Failed))
    }

    fn record(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Readable => self.has_read_waiting = true,
            StreamEvent::End => self.result = Some(Ok(())),
            StreamEvent::Error(e) => self.result = Some(Err(e)),
        }
    }
}

/// Unsubscribes on drop and destroys a source that had not ended.
struct SourceGuard {
    source: Box<dyn PullSource>,
    ended: bool,
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.source.unsubscribe();
        if !self.ended {
            tracing::debug!("Destroying unfinished stream source");
            self.source.destroy();
        }
    }
}

/// Create an in-memory pull source and its writer.
pub fn channel() -> (StreamWriter, ChannelSource) {
    let shared = Arc::new(Mutex::new(ChannelState::default()));
    (
        StreamWriter {
            shared: Arc::clone(&shared),
        },
        ChannelSource { shared },
    )
}

#[derive(Default)]
struct ChannelState {
    queue: VecDeque<Bytes>,
    end: Option<NetResult<()>>,
    end_announced: bool,
    notify: Option<mpsc::UnboundedSender<StreamEvent>>,
    destroyed: bool,
}

impl ChannelState {
    fn announce(&mut self, event: StreamEvent) {
        if let Some(tx) = &self.notify {
            let _ = tx.send(event);
        }
    }

    fn announce_end_if_drained(&mut self) {
        if self.end_announced || !self.queue.is_empty() {
            return;
        }
        if let Some(Ok(())) = self.end {
            if self.notify.is_some() {
                self.end_announced = true;
                self.announce(StreamEvent::End);
            }
        }
    }
}

fn lock(shared: &Mutex<ChannelState>) -> std::sync::MutexGuard<'_, ChannelState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Push side of [`channel`]. Dropping it ends the stream.
pub struct StreamWriter {
    shared: Arc<Mutex<ChannelState>>,
}

impl StreamWriter {
    /// Queue a chunk. Returns `false` once the stream has ended or was destroyed.
    pub fn push(&self, chunk: impl Into<Bytes>) -> bool {
        let mut state = lock(&self.shared);
        if state.destroyed || state.end.is_some() {
            return false;
        }
        let chunk = chunk.into();
        if chunk.is_empty() {
            return true;
        }
        state.queue.push_back(chunk);
        state.announce(StreamEvent::Readable);
        true
    }

    /// Finish the stream once queued chunks are read.
    pub fn end(&self) {
        let mut state = lock(&self.shared);
        if state.end.is_none() {
            state.end = Some(Ok(()));
            state.announce_end_if_drained();
        }
    }

    /// Fail the stream immediately; queued chunks are discarded.
    pub fn error(&self, error: NetError) {
        let mut state = lock(&self.shared);
        if state.end.is_none() {
            state.end = Some(Err(error));
            state.queue.clear();
            state.announce(StreamEvent::Error(error));
        }
    }

    /// True once the reader destroyed the stream.
    pub fn is_destroyed(&self) -> bool {
        lock(&self.shared).destroyed
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared);
        f.debug_struct("StreamWriter")
            .field("queued", &state.queue.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

/// Pull side of [`channel`].
pub struct ChannelSource {
    shared: Arc<Mutex<ChannelState>>,
}

impl PullSource for ChannelSource {
    fn read(&mut self) -> Option<Bytes> {
        let mut state = lock(&self.shared);
        let chunk = state.queue.pop_front();
        state.announce_end_if_drained();
        chunk
    }

    fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.shared);
        state.notify = Some(tx);
        state.end_announced = false;
        if !state.queue.is_empty() {
            state.announce(StreamEvent::Readable);
        }
        match state.end {
            Some(Err(e)) => state.announce(StreamEvent::Error(e)),
            Some(Ok(())) => state.announce_end_if_drained(),
            None => {}
        }
        Some(rx)
    }

    fn unsubscribe(&mut self) {
        lock(&self.shared).notify = None;
    }

    fn destroy(&mut self) {
        let mut state = lock(&self.shared);
        state.destroyed = true;
        state.queue.clear();
    }
}
