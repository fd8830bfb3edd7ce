//! Pending writes awaiting a pipe.
//!
//! Chunks are flushed strictly front to back and a chunk leaves the queue
//! only after its write completes, so at most one write is in flight and no
//! byte range is emitted twice or out of order.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::net::pipe::{PipeError, PipeProducer};

/// FIFO of byte ranges waiting to be written.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: VecDeque<Bytes>,
    queued_bytes: u64,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk. Empty chunks are ignored.
    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.queued_bytes += data.len() as u64;
        self.pending.push_back(data);
    }

    /// Queue `data` as pieces of at most `max_chunk` bytes.
    pub fn push_chunked(&mut self, mut data: Bytes, max_chunk: usize) {
        let max_chunk = max_chunk.max(1);
        while data.len() > max_chunk {
            let head = data.split_to(max_chunk);
            self.push(head);
        }
        self.push(data);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes queued and not yet written.
    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes
    }

    /// Write every queued chunk into `producer`, returning the bytes written.
    ///
    /// On error the failed chunk and everything behind it stay queued.
    pub async fn flush(&mut self, producer: &mut PipeProducer) -> Result<u64, PipeError> {
        let mut flushed = 0u64;
        while let Some(front) = self.pending.front() {
            let len = front.len() as u64;
            producer.write(front.clone()).await?;
            self.pending.pop_front();
            self.queued_bytes -= len;
            flushed += len;
        }
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::pipe;

    #[test]
    fn empty_chunks_are_dropped() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::new());
        assert!(queue.is_empty());
    }

    #[test]
    fn push_chunked_splits_payload() {
        let mut queue = WriteQueue::new();
        queue.push_chunked(Bytes::from_static(b"abcdefg"), 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.queued_bytes(), 7);
    }

    #[tokio::test]
    async fn flush_preserves_order() {
        let (mut producer, mut consumer) = pipe::create(64).unwrap();
        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"one "));
        queue.push(Bytes::from_static(b"two "));
        queue.push(Bytes::from_static(b"three"));

        let flushed = queue.flush(&mut producer).await.unwrap();
        drop(producer);

        assert_eq!(flushed, 13);
        assert!(queue.is_empty());
        assert_eq!(consumer.read_to_end().await, Bytes::from_static(b"one two three"));
    }

    #[tokio::test]
    async fn failed_flush_keeps_unwritten_chunks() {
        let (mut producer, consumer) = pipe::create(64).unwrap();
        drop(consumer);

        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"lost"));
        assert!(queue.flush(&mut producer).await.is_err());
        assert_eq!(queue.len(), 1);
    }
}
