//! Request body sources.
//!
//! # Data Flow
//! ```text
//! RequestBody = [UploadElement...]
//!     Bytes      ─┐
//!     FileRange  ─┤
//!     Blob       ─┼─▶ stream.rs UploadBody (hyper Body, progress reports)
//!     Chunked    ─┘        ▲
//!        │                 │ pipe consumer
//!        └─ chunked.rs ────┘ start_reading(producer) → user callback → writer
//! ```
//!
//! # Design Decisions
//! - Bytes and file ranges belong to the request; a chunked element is a
//!   shared handle to an external producer that only lives while it writes
//! - A chunked body's size is unknown until `done()`, so it is sent with
//!   chunked transfer encoding and checked against the producer's count

pub mod blob;
pub mod body;
pub mod chunked;
pub mod stream;

pub use blob::BlobStore;
pub use body::{RequestBody, UploadData, UploadElement};
pub use chunked::{ChunkedBodyWriter, ChunkedUpload, UploadError};
pub use stream::UploadBody;
