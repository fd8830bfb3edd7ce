//! Chunked upload bodies.
//!
//! # Responsibilities
//! - Let an external producer stream a body whose size is unknown up front
//! - Answer the transport's size query only once the producer calls `done()`
//! - Invoke the body callback exactly once, when the transport starts reading
//!
//! # Data Flow
//! ```text
//! transport                         producer
//!   get_size() ─ waits ─────────────── done() → Done(bytes_written)
//!   start_reading(pipe producer)
//!       → callback(ChunkedBodyWriter) → write(a), write(b) → pipe
//! ```
//!
//! # Design Decisions
//! - Byte contiguity is guaranteed by `Bytes`; there is no untyped write
//! - The writer is cloneable so a second concurrent `write` is observable
//!   and rejected instead of being impossible to express
//! - Dropping every writer clone before `done()` fails the size query

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::{NetError, NetResult};
use crate::net::pipe::PipeProducer;

/// Producer-side contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("Only one write can be pending at a time")]
    WritePending,

    #[error("Can't write after calling done()")]
    WriteAfterDone,

    #[error("done() has already been called")]
    AlreadyDone,

    #[error("The upload consumer disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeState {
    Pending,
    Done(u64),
    Failed,
}

type BodyCallback = Box<dyn FnOnce(ChunkedBodyWriter) + Send + 'static>;

/// Transport-side handle to a chunked body.
#[derive(Clone)]
pub struct ChunkedUpload {
    inner: Arc<ChunkedInner>,
}

struct ChunkedInner {
    callback: Mutex<Option<BodyCallback>>,
    size_tx: Mutex<Option<watch::Sender<SizeState>>>,
    size_rx: watch::Receiver<SizeState>,
}

impl ChunkedUpload {
    /// `callback` receives the writer when a transport starts reading.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(ChunkedBodyWriter) + Send + 'static,
    {
        let (size_tx, size_rx) = watch::channel(SizeState::Pending);
        Self {
            inner: Arc::new(ChunkedInner {
                callback: Mutex::new(Some(Box::new(callback))),
                size_tx: Mutex::new(Some(size_tx)),
                size_rx,
            }),
        }
    }

    /// Total body size, available once the producer has called `done()`.
    pub async fn get_size(&self) -> NetResult<u64> {
        let mut rx = self.inner.size_rx.clone();
        let state = rx
            .wait_for(|state| *state != SizeState::Pending)
            .await
            .map(|state| *state);
        match state {
            Ok(SizeState::Done(size)) => Ok(size),
            _ => Err(NetError::Failed),
        }
    }

    /// Hand the pipe to the producer. Only the first call does anything.
    pub fn start_reading(&self, producer: PipeProducer) {
        let callback = self
            .inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let size_tx = self
            .inner
            .size_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match (callback, size_tx) {
            (Some(callback), Some(size_tx)) => {
                tracing::debug!("Chunked upload started reading");
                callback(ChunkedBodyWriter::new(producer, size_tx));
            }
            _ => {
                tracing::error!("Chunked upload body can only be read once");
                drop(producer);
            }
        }
    }
}

impl std::fmt::Debug for ChunkedUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedUpload")
            .field("size", &*self.inner.size_rx.borrow())
            .finish()
    }
}

/// Producer-side handle to a chunked body.
#[derive(Clone)]
pub struct ChunkedBodyWriter {
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    producer: Option<PipeProducer>,
    size_tx: Option<watch::Sender<SizeState>>,
    pending: bool,
    done: bool,
    bytes_written: u64,
}

impl Drop for WriterState {
    fn drop(&mut self) {
        if !self.done {
            if let Some(size_tx) = self.size_tx.take() {
                tracing::debug!(bytes_written = self.bytes_written, "Chunked upload abandoned before done()");
                let _ = size_tx.send(SizeState::Failed);
            }
        }
    }
}

impl ChunkedBodyWriter {
    fn new(producer: PipeProducer, size_tx: watch::Sender<SizeState>) -> Self {
        Self {
            state: Arc::new(Mutex::new(WriterState {
                producer: Some(producer),
                size_tx: Some(size_tx),
                pending: false,
                done: false,
                bytes_written: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one chunk; resolves once the pipe has accepted it.
    pub async fn write(&self, chunk: Bytes) -> Result<(), UploadError> {
        let mut producer = {
            let mut state = self.lock();
            if state.done {
                return Err(UploadError::WriteAfterDone);
            }
            if state.pending {
                return Err(UploadError::WritePending);
            }
            let producer = state.producer.take().ok_or(UploadError::Disconnected)?;
            state.pending = true;
            producer
        };

        let len = chunk.len() as u64;
        let result = producer.write(chunk).await;

        let mut state = self.lock();
        state.pending = false;
        match result {
            Ok(()) => {
                state.bytes_written += len;
                state.producer = Some(producer);
                Ok(())
            }
            Err(_) => Err(UploadError::Disconnected),
        }
    }

    /// Finish the body, publishing its size. Returns the total written.
    pub fn done(&self) -> Result<u64, UploadError> {
        let mut state = self.lock();
        if state.done {
            return Err(UploadError::AlreadyDone);
        }
        if state.pending {
            return Err(UploadError::WritePending);
        }
        state.done = true;
        state.producer = None;

        let size = state.bytes_written;
        if let Some(size_tx) = state.size_tx.take() {
            let _ = size_tx.send(SizeState::Done(size));
        }
        Ok(size)
    }

    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }
}
