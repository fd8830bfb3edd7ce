//! Interception in front of the normal transports.
//!
//! # Data Flow
//! ```text
//! request ─▶ InterceptingLoaderFactory
//!              ├─ allowlisted host?  → MAXIMUM priority + ignore_limits
//!              ├─ scheme intercepted → handler ─┬─ respond  → protocol responder
//!              │                                └─ continue → wrapped target
//!              └─ otherwise          → wrapped target
//! ```

pub mod factory;

pub use factory::{InterceptingLoaderFactory, TeardownObserver};
