//! Client requests.
//!
//! # Data Flow
//! ```text
//! Session::request(options) → ClientRequest
//!     write()/end() ──spawn──▶ Controller task
//!                                ├─ intercepted scheme → InterceptingLoaderFactory
//!                                ├─ registered scheme  → ProtocolLoaderFactory
//!                                ├─ file:              → FileLoaderFactory
//!                                └─ otherwise          → network transport
//!     next_event() ◀── RequestEvent ── loader events + body pipe
//! ```
//!
//! # Design Decisions
//! - A redirect between two network URLs is followed by the running
//!   transport; any other redirect restarts the request so the new URL can
//!   land on a different transport
//! - Request and response lifecycles are separate bitmasks so an abort can
//!   tell whether a response was cut short

pub mod client;
mod controller;
pub mod events;
pub mod options;
pub mod state;

pub use client::ClientRequest;
pub use events::{RequestError, RequestEvent, ResponseInfo};
pub use options::{RedirectMode, RequestOptions};
pub use state::RequestState;
