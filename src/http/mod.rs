//! HTTP request/response model shared by every transport.
//!
//! # Data Flow
//! ```text
//! RequestOptions / handler override
//!     → request.rs (RequestDescriptor, validated headers)
//!     → [transport dispatch]
//!     → response.rs (ResponseHead, redirect detection)
//!     → redirect.rs (RedirectInfo, in-place request rewrite)
//!     → referrer.rs (referrer recomputed for the new URL)
//! ```
//!
//! # Design Decisions
//! - Headers are `http::HeaderMap`: case-insensitive, duplicate-preserving
//! - A descriptor is only mutated by `apply_redirect`; everything else
//!   builds a fresh copy

pub mod headers;
pub mod redirect;
pub mod referrer;
pub mod request;
pub mod response;

pub use redirect::{FollowRedirectParams, RedirectInfo};
pub use referrer::ReferrerPolicy;
pub use request::{LoadFlags, RequestDescriptor, RequestPriority};
pub use response::ResponseHead;
