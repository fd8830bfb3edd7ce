//! Upload body adapter for the network transport.
//!
//! A spawned producer task walks the body's elements in order and feeds a
//! bounded channel; `UploadBody` exposes that channel as a `hyper` body.

use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

use crate::error::{NetError, NetResult};
use crate::net::pipe;
use crate::observability::metrics;
use crate::upload::blob::BlobStore;
use crate::upload::body::{RequestBody, UploadElement};

/// Chunks buffered between the producer task and hyper.
const CHANNEL_DEPTH: usize = 4;

/// Streaming request body.
#[derive(Debug)]
pub struct UploadBody {
    rx: Option<mpsc::Receiver<NetResult<Bytes>>>,
    size: Option<u64>,
}

impl UploadBody {
    pub fn empty() -> Self {
        Self { rx: None, size: Some(0) }
    }

    /// Start producing `body`. `progress` receives `(position, total)` after
    /// every chunk handed to the transport.
    pub fn spawn<F>(body: RequestBody, blobs: BlobStore, chunk_size: usize, progress: F) -> Self
    where
        F: Fn(u64, u64) + Send + 'static,
    {
        let size = body.in_memory_size();
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(async move {
            let mut sink = ChunkSink {
                tx,
                position: 0,
                total: body.estimated_size(),
                progress,
            };
            let result = produce(body, &blobs, chunk_size.max(1), &mut sink).await;
            metrics::record_body_bytes("upload", sink.position);
            if let Err(e) = result {
                tracing::debug!(error = %e, "Upload body failed");
                let _ = sink.tx.send(Err(e)).await;
            }
        });

        Self { rx: Some(rx), size }
    }
}

impl Body for UploadBody {
    type Data = Bytes;
    type Error = NetError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, NetError>>> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(rx.poll_recv(cx)) {
            Some(Ok(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Some(Err(e)) => {
                self.rx = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.rx = None;
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.size {
            Some(size) => SizeHint::with_exact(size),
            None => SizeHint::default(),
        }
    }
}

struct ChunkSink<F> {
    tx: mpsc::Sender<NetResult<Bytes>>,
    position: u64,
    total: u64,
    progress: F,
}

impl<F: Fn(u64, u64)> ChunkSink<F> {
    async fn send(&mut self, chunk: Bytes) -> NetResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        self.tx.send(Ok(chunk)).await.map_err(|_| NetError::Canceled)?;
        self.position += len;
        self.total = self.total.max(self.position);
        (self.progress)(self.position, self.total);
        Ok(())
    }
}

async fn produce<F: Fn(u64, u64)>(
    body: RequestBody,
    blobs: &BlobStore,
    chunk_size: usize,
    sink: &mut ChunkSink<F>,
) -> NetResult<()> {
    for element in body.into_elements() {
        match element {
            UploadElement::Bytes(data) => sink.send(data).await?,
            UploadElement::FileRange {
                path,
                offset,
                length,
                expected_modification_time,
            } => {
                read_file_range(&path, offset, length, expected_modification_time, chunk_size, sink)
                    .await?
            }
            UploadElement::Blob { uuid } => {
                let data = blobs.get(&uuid).ok_or_else(|| {
                    tracing::warn!(blob = %uuid, "Upload references unknown blob");
                    NetError::Failed
                })?;
                sink.send(data).await?;
            }
            UploadElement::Chunked(upload) => {
                let (producer, mut consumer) = pipe::create(chunk_size)?;
                upload.start_reading(producer);

                let mut read = 0u64;
                while let Some(chunk) = consumer.read().await {
                    read += chunk.len() as u64;
                    sink.send(chunk).await?;
                }

                let size = upload.get_size().await?;
                if size != read {
                    tracing::warn!(reported = size, read, "Chunked upload size mismatch");
                    return Err(NetError::Failed);
                }
            }
        }
    }
    Ok(())
}

async fn read_file_range<F: Fn(u64, u64)>(
    path: &Path,
    offset: u64,
    length: Option<u64>,
    expected_modification_time: Option<SystemTime>,
    chunk_size: usize,
    sink: &mut ChunkSink<F>,
) -> NetResult<()> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => NetError::FileNotFound,
        _ => NetError::Failed,
    })?;

    if let Some(expected) = expected_modification_time {
        let actual = file
            .metadata()
            .await
            .and_then(|m| m.modified())
            .map_err(|_| NetError::Failed)?;
        if millis_since_epoch(actual) != millis_since_epoch(expected) {
            tracing::warn!(path = %path.display(), "Upload file changed since it was attached");
            return Err(NetError::UploadFileChanged);
        }
    }

    file.seek(SeekFrom::Start(offset)).await.map_err(|_| NetError::Failed)?;

    let mut remaining = length.unwrap_or(u64::MAX);
    while remaining > 0 {
        let want = (chunk_size as u64).min(remaining) as usize;
        let mut buf = vec![0u8; want];
        let n = file.read(&mut buf).await.map_err(|_| NetError::Failed)?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        remaining -= n as u64;
        sink.send(Bytes::from(buf)).await?;
    }
    Ok(())
}

fn millis_since_epoch(time: SystemTime) -> Option<u128> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_millis())
}
