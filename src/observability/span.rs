//! Per-request spans and identifiers.
//!
//! # Responsibilities
//! - Generate unique request IDs for tracing
//! - Create the span every transport task runs inside

use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

/// Global atomic counter for request IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a request, stable across redirects and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Generate a new unique request ID.
    pub fn new() -> Self {
        Self(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Span for one transport attempt of a request.
pub fn request_span(id: RequestId, transport: &'static str, url: &Url) -> tracing::Span {
    tracing::info_span!("request", request_id = %id, transport, url = %url)
}
