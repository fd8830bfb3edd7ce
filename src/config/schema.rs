//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the loader.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a loader session.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoaderConfig {
    /// Byte pipe sizing.
    pub pipe: PipeConfig,

    /// Redirect policy limits.
    pub redirects: RedirectConfig,

    /// Network transport settings.
    pub network: NetworkConfig,

    /// Local file transport settings.
    pub file: FileConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Byte pipe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Bytes a producer may have outstanding before writes suspend.
    pub capacity_bytes: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024,
        }
    }
}

/// Redirect configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Redirects (follows plus restarts) allowed per request.
    pub max_redirects: u32,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self { max_redirects: 20 }
    }
}

/// Network transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Default `User-Agent` when the request carries none.
    pub user_agent: String,

    /// Global outbound connection limit.
    pub max_connections: usize,

    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Domains exempt from the connection limit (suffix match).
    pub ignore_connections_limit: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("scheme-loader/{}", env!("CARGO_PKG_VERSION")),
            max_connections: 256,
            pool_idle_timeout_secs: 90,
            ignore_connections_limit: Vec::new(),
        }
    }
}

/// File transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    /// Size of each read from disk.
    pub read_chunk_bytes: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: 32 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address the exporter listens on.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
