//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, redirect cap bounded)
//! - Check addresses and domain lists are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LoaderConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::LoaderConfig;

/// Upper bound on pipe capacity.
pub const MAX_PIPE_CAPACITY: usize = 64 * 1024 * 1024;

/// Upper bound on the redirect cap.
pub const MAX_REDIRECT_LIMIT: u32 = 100;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &LoaderConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.pipe.capacity_bytes == 0 {
        errors.push(ValidationError::new("pipe.capacity_bytes", "must be greater than 0"));
    } else if config.pipe.capacity_bytes > MAX_PIPE_CAPACITY {
        errors.push(ValidationError::new(
            "pipe.capacity_bytes",
            format!("must not exceed {}", MAX_PIPE_CAPACITY),
        ));
    }

    if config.redirects.max_redirects == 0 || config.redirects.max_redirects > MAX_REDIRECT_LIMIT {
        errors.push(ValidationError::new(
            "redirects.max_redirects",
            format!("must be between 1 and {}", MAX_REDIRECT_LIMIT),
        ));
    }

    if config.network.max_connections == 0 {
        errors.push(ValidationError::new("network.max_connections", "must be greater than 0"));
    }

    if config.network.user_agent.is_empty() {
        errors.push(ValidationError::new("network.user_agent", "must not be empty"));
    } else if http::HeaderValue::from_str(&config.network.user_agent).is_err() {
        errors.push(ValidationError::new("network.user_agent", "is not a valid header value"));
    }

    for domain in &config.network.ignore_connections_limit {
        if domain.trim().is_empty() || domain.contains('/') || domain.contains(':') {
            errors.push(ValidationError::new(
                "network.ignore_connections_limit",
                format!("'{}' is not a bare domain", domain),
            ));
        }
    }

    if config.file.read_chunk_bytes == 0 {
        errors.push(ValidationError::new("file.read_chunk_bytes", "must be greater than 0"));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
