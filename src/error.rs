//! Net error taxonomy shared by every transport.
//!
//! # Responsibilities
//! - Name the terminal error codes a loader can complete with
//! - Map between typed errors and the numeric codes handlers use
//!
//! # Design Decisions
//! - Codes follow the familiar `net::ERR_*` numbering so handler results
//!   carrying `error: -6` mean the same thing everywhere
//! - `NetError` is `Copy`; it travels inside completion records and events

use thiserror::Error;

/// Terminal error carried by a loader completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum NetError {
    /// The request was cancelled by its consumer.
    #[error("net::ERR_ABORTED")]
    Canceled,

    /// Generic transport failure.
    #[error("net::ERR_FAILED")]
    Failed,

    /// Malformed header name/value or other bad argument.
    #[error("net::ERR_INVALID_ARGUMENT")]
    InvalidArgument,

    #[error("net::ERR_FILE_NOT_FOUND")]
    FileNotFound,

    /// Handler contract violation (missing result, bad stream object).
    #[error("net::ERR_NOT_IMPLEMENTED")]
    NotImplemented,

    /// A pipe could not be created.
    #[error("net::ERR_INSUFFICIENT_RESOURCES")]
    InsufficientResources,

    /// A file-range upload element changed on disk since it was attached.
    #[error("net::ERR_UPLOAD_FILE_CHANGED")]
    UploadFileChanged,

    #[error("net::ERR_CONNECTION_FAILED")]
    ConnectionFailed,

    #[error("net::ERR_INVALID_URL")]
    InvalidUrl,

    #[error("net::ERR_UNKNOWN_URL_SCHEME")]
    UnknownUrlScheme,

    #[error("net::ERR_TOO_MANY_REDIRECTS")]
    TooManyRedirects,

    /// Any code without a dedicated variant.
    #[error("net error {0}")]
    Other(i32),
}

impl NetError {
    /// Numeric net error code.
    pub fn code(&self) -> i32 {
        match self {
            NetError::Canceled => -3,
            NetError::Failed => -2,
            NetError::InvalidArgument => -4,
            NetError::FileNotFound => -6,
            NetError::NotImplemented => -11,
            NetError::InsufficientResources => -12,
            NetError::UploadFileChanged => -14,
            NetError::ConnectionFailed => -104,
            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::TooManyRedirects => -310,
            NetError::Other(code) => *code,
        }
    }

    /// Map a numeric code back to a typed error.
    ///
    /// Zero is not an error; it maps to `Failed` because a caller asking for
    /// an error completion with code 0 has violated the handler contract.
    pub fn from_code(code: i32) -> Self {
        match code {
            -3 => NetError::Canceled,
            -2 | 0 => NetError::Failed,
            -4 => NetError::InvalidArgument,
            -6 => NetError::FileNotFound,
            -11 => NetError::NotImplemented,
            -12 => NetError::InsufficientResources,
            -14 => NetError::UploadFileChanged,
            -104 => NetError::ConnectionFailed,
            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -310 => NetError::TooManyRedirects,
            other => NetError::Other(other),
        }
    }
}

/// Result type for loader operations.
pub type NetResult<T> = Result<T, NetError>;
