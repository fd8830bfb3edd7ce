//! Byte transport primitives.
//!
//! # Data Flow
//! ```text
//! producer side (responder, adapter, upload writer)
//!     → write_queue.rs (FIFO of pending chunks, one write in flight)
//!     → pipe.rs PipeProducer (suspends while credit is exhausted)
//!     → pipe.rs PipeConsumer (returns credit as chunks are read)
//!     → consumer side (controller, network upload body)
//! ```
//!
//! # Design Decisions
//! - Each pipe half is owned by exactly one side; dropping a half is the
//!   disconnect signal, so there is no separate "is connected" bookkeeping
//! - Capacity is counted in bytes, not chunks

pub mod pipe;
pub mod write_queue;

pub use pipe::{PipeConsumer, PipeError, PipeProducer};
pub use write_queue::WriteQueue;
