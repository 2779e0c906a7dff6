//! Error types for guestbox-api.

use thiserror::Error;

/// Result type alias for management-API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors reported by the management API or the transfer transport.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The guest rejected the supplied credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The referenced guest object (file, process) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The management API did not answer in time
    #[error("management API timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Any other fault raised by the management API
    #[error("management API fault: {0}")]
    Fault(String),

    /// Transfer endpoint answered with a non-success status
    #[error("transfer failed with status {status}: {message}")]
    Transfer {
        /// HTTP status code returned by the transfer endpoint
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Whether the error reports a missing guest object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
