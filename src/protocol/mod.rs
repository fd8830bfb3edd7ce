//! Custom scheme handling.
//!
//! # Responsibilities
//! - Keep the per-session table of registered and intercepting handlers
//! - Define the handler/responder contract
//! - Turn handler answers into responses on a loader endpoint
//!
//! # Data Flow
//! ```text
//! RequestDescriptor
//!     → registry lookup (session-owned, keyed by scheme)
//!     → responder.rs: handler(request, Responder)
//!     → descriptor.rs: classify the answer
//!     → pipe | file transport | network transport | stream.rs | redirect
//! ```
//!
//! # Design Decisions
//! - The registry belongs to a session and is passed to factories by
//!   value (it is a cheap clone of shared maps), never looked up globally
//! - Handler contract violations end the request with an error completion;
//!   they never propagate out of the dispatch task

pub mod descriptor;
pub mod handler;
pub mod registry;
pub mod responder;
pub mod stream;

pub use descriptor::{build_response, ProxyTarget, ResponseDescriptor, ResponseKind};
pub use handler::{
    HandlerOutcome, HandlerResult, ProtocolHandler, ProtocolResponse, ProtocolType, Responder,
    ResponseData, SessionChoice, SharedHandler, UploadOverride,
};
pub use registry::{HandlerEntry, ProtocolError, ProtocolRegistry};
pub use responder::ProtocolLoaderFactory;
pub use stream::{channel, ChannelSource, PullSource, StreamEvent, StreamWriter};
