//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters)
//!     → span.rs (per-request spans with request IDs)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every transport a request touches
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod span;

pub use span::RequestId;
