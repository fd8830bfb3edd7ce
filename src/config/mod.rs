//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LoaderConfig (validated, immutable)
//!     → shared via Arc by the session and its transports
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new session picks up a new config
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    FileConfig, LoaderConfig, LogFormat, NetworkConfig, ObservabilityConfig, PipeConfig,
    RedirectConfig,
};
pub use validation::{validate_config, ValidationError};
