//! Bounded single-producer/single-consumer byte pipe.
//!
//! # Responsibilities
//! - Carry body bytes between a producer task and a consumer task
//! - Apply backpressure once `capacity` bytes are unread
//! - Make destruction of either half observable by the other
//!
//! # Design Decisions
//! - Chunks travel over an unbounded channel; the bound is enforced by a
//!   semaphore of byte credits the consumer hands back on every read
//! - Dropping the producer is end-of-body; dropping the consumer closes the
//!   semaphore so a suspended write wakes up with `Disconnected`

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{NetError, NetResult};

/// Default pipe capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Error raised on the producer side of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    /// The consumer half was dropped.
    #[error("pipe consumer disconnected")]
    Disconnected,
}

impl From<PipeError> for NetError {
    fn from(_: PipeError) -> Self {
        NetError::Failed
    }
}

/// Create a pipe able to hold `capacity` unread bytes.
///
/// Fails with `InsufficientResources` when the capacity cannot be honoured.
pub fn create(capacity: usize) -> NetResult<(PipeProducer, PipeConsumer)> {
    if capacity == 0 || capacity > u32::MAX as usize || capacity > Semaphore::MAX_PERMITS {
        tracing::warn!(capacity, "Refusing to create pipe");
        return Err(NetError::InsufficientResources);
    }

    let credit = Arc::new(Semaphore::new(capacity));
    let (tx, rx) = mpsc::unbounded_channel();

    let producer = PipeProducer {
        tx,
        credit: Arc::clone(&credit),
        capacity,
        bytes_written: 0,
    };
    let consumer = PipeConsumer { rx, credit };
    Ok((producer, consumer))
}

/// Writing half of a pipe.
#[derive(Debug)]
pub struct PipeProducer {
    tx: mpsc::UnboundedSender<Bytes>,
    credit: Arc<Semaphore>,
    capacity: usize,
    bytes_written: u64,
}

impl PipeProducer {
    /// Write `data`, suspending while the consumer is behind.
    ///
    /// Data larger than the pipe capacity is split. On error nothing more
    /// can be written; some prefix of `data` may already have been delivered.
    pub async fn write(&mut self, mut data: Bytes) -> Result<(), PipeError> {
        while !data.is_empty() {
            let n = data.len().min(self.capacity);
            let chunk = data.split_to(n);

            let permit = self
                .credit
                .acquire_many(n as u32)
                .await
                .map_err(|_| PipeError::Disconnected)?;
            // Credit comes back through `add_permits` when the chunk is read.
            permit.forget();

            self.tx.send(chunk).map_err(|_| PipeError::Disconnected)?;
            self.bytes_written += n as u64;
        }
        Ok(())
    }

    /// Total bytes accepted by the pipe so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once the consumer half is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer half is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Reading half of a pipe.
#[derive(Debug)]
pub struct PipeConsumer {
    rx: mpsc::UnboundedReceiver<Bytes>,
    credit: Arc<Semaphore>,
}

impl PipeConsumer {
    /// Next chunk in write order, or `None` once the producer is gone and
    /// everything has been read.
    pub async fn read(&mut self) -> Option<Bytes> {
        let chunk = self.rx.recv().await?;
        self.credit.add_permits(chunk.len());
        Some(chunk)
    }

    /// Drain the pipe until the producer finishes.
    pub async fn read_to_end(&mut self) -> Bytes {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.read().await {
            body.extend_from_slice(&chunk);
        }
        body.freeze()
    }
}

impl Stream for PipeConsumer {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                this.credit.add_permits(chunk.len());
                Poll::Ready(Some(chunk))
            }
            other => other,
        }
    }
}

impl Drop for PipeConsumer {
    fn drop(&mut self) {
        self.credit.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_insufficient_resources() {
        assert_eq!(create(0).unwrap_err(), NetError::InsufficientResources);
    }

    #[tokio::test]
    async fn bytes_arrive_in_write_order() {
        let (mut producer, mut consumer) = create(1024).unwrap();
        producer.write(Bytes::from_static(b"hello ")).await.unwrap();
        producer.write(Bytes::from_static(b"world")).await.unwrap();
        drop(producer);

        assert_eq!(consumer.read_to_end().await, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn large_writes_are_split_to_capacity() {
        let (mut producer, mut consumer) = create(4).unwrap();
        let writer = tokio::spawn(async move {
            producer.write(Bytes::from_static(b"abcdefghij")).await.unwrap();
            producer.bytes_written()
        });

        let mut chunks = Vec::new();
        while let Some(chunk) = consumer.read().await {
            assert!(chunk.len() <= 4);
            chunks.push(chunk);
        }
        assert_eq!(chunks.concat(), b"abcdefghij");
        assert_eq!(writer.await.unwrap(), 10);
    }

    #[tokio::test]
    async fn write_suspends_until_consumer_reads() {
        let (mut producer, mut consumer) = create(4).unwrap();
        producer.write(Bytes::from_static(b"1234")).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            producer.write(Bytes::from_static(b"5")),
        )
        .await;
        assert!(blocked.is_err(), "write should wait for credit");

        assert_eq!(consumer.read().await.unwrap(), Bytes::from_static(b"1234"));
        producer.write(Bytes::from_static(b"5")).await.unwrap();
        assert_eq!(consumer.read().await.unwrap(), Bytes::from_static(b"5"));
    }

    #[tokio::test]
    async fn dropping_consumer_wakes_suspended_writer() {
        let (mut producer, consumer) = create(2).unwrap();
        producer.write(Bytes::from_static(b"ab")).await.unwrap();

        let writer = tokio::spawn(async move { producer.write(Bytes::from_static(b"cd")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(consumer);

        assert_eq!(writer.await.unwrap(), Err(PipeError::Disconnected));
    }

    #[tokio::test]
    async fn producer_observes_consumer_drop() {
        let (producer, consumer) = create(8).unwrap();
        assert!(!producer.is_closed());
        drop(consumer);
        producer.closed().await;
        assert!(producer.is_closed());
    }
}
