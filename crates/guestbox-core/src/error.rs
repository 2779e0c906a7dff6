//! Error types for guestbox-core.

use guestbox_api::{ApiError, GuestOsFamily};
use thiserror::Error;

/// Result type alias for guestbox-core operations.
pub type Result<T> = std::result::Result<T, ToolboxError>;

/// Errors that can occur during guest operations.
///
/// [`ToolboxError::Exit`] means the program ran and failed; every other
/// variant means it could not run or could not be observed.
#[derive(Debug, Error)]
pub enum ToolboxError {
    /// Error from the management API or the transfer transport
    #[error("management API error: {0}")]
    Api(#[from] ApiError),

    /// Remote program finished with a non-zero exit code
    #[error("{program}: exit {code}")]
    Exit {
        /// Program that was run
        program: String,
        /// Exit code reported by the guest
        code: i32,
    },

    /// Operation is not available for the guest's OS family
    #[error("{operation} is not supported on {family} guests")]
    UnsupportedPlatform {
        /// Guest OS family
        family: GuestOsFamily,
        /// Operation that was requested
        operation: &'static str,
    },

    /// Upload length could not be determined
    #[error("cannot determine upload length: {0}")]
    SizeInference(String),

    /// Guest no longer reports the tracked process
    #[error("process {0} not found in guest")]
    ProcessNotFound(i64),

    /// Cancellation was requested
    #[error("operation cancelled")]
    Cancelled,

    /// Local archive packing or unpacking failed
    #[error("archive error: {0}")]
    Archive(String),

    /// Background run task panicked or was aborted
    #[error("run task failed: {0}")]
    Task(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolboxError {
    /// Exit code of a remote program that ran and failed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
