//! Guest-operations manager traits.
//!
//! These traits are the seam between the toolbox and a concrete hypervisor
//! binding. Every call carries the caller's credentials; implementations must
//! tolerate concurrent calls from independent invocations.

use crate::error::Result;
use crate::types::{Credentials, FileAttributes, FileTransferInformation, ProcessInfo, ProcessSpec};
use async_trait::async_trait;

/// Starts guest programs and reports their status.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Start a program inside the guest.
    ///
    /// # Returns
    /// The guest process id.
    ///
    /// # Errors
    /// Returns an error if the guest rejects the spec or the credentials.
    /// Starting is never retried by callers.
    async fn start_program(&self, auth: &Credentials, spec: &ProcessSpec) -> Result<i64>;

    /// List the status of the given processes.
    ///
    /// Processes unknown to the guest are omitted from the result.
    async fn list_processes(&self, auth: &Credentials, pids: &[i64]) -> Result<Vec<ProcessInfo>>;
}

/// Scratch files, moves, deletes and transfer handshakes.
#[async_trait]
pub trait FileManager: Send + Sync {
    /// Create a uniquely named temporary file.
    ///
    /// # Arguments
    /// * `prefix` - Name prefix
    /// * `suffix` - Name suffix, e.g. a script extension
    /// * `directory` - Parent directory, guest temp dir when `None`
    ///
    /// # Returns
    /// The absolute guest path of the new file.
    async fn create_temporary_file(
        &self,
        auth: &Credentials,
        prefix: &str,
        suffix: &str,
        directory: Option<&str>,
    ) -> Result<String>;

    /// Delete a file.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`](crate::ApiError::NotFound) if the file
    /// does not exist.
    async fn delete_file(&self, auth: &Credentials, path: &str) -> Result<()>;

    /// Move a file, optionally replacing the destination.
    async fn move_file(
        &self,
        auth: &Credentials,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<()>;

    /// Initiate a transfer out of the guest.
    async fn initiate_file_transfer_from_guest(
        &self,
        auth: &Credentials,
        path: &str,
    ) -> Result<FileTransferInformation>;

    /// Initiate a transfer into the guest.
    ///
    /// # Returns
    /// The raw transfer URL.
    async fn initiate_file_transfer_to_guest(
        &self,
        auth: &Credentials,
        path: &str,
        attributes: &FileAttributes,
        size: u64,
        overwrite: bool,
    ) -> Result<String>;

    /// Resolve a raw transfer URL into one reachable from the caller.
    ///
    /// Raw URLs may carry a `*` host placeholder standing for the hypervisor
    /// host that owns the guest.
    async fn transfer_url(&self, raw: &str) -> Result<String>;
}

/// Credential validation.
#[async_trait]
pub trait AuthManager: Send + Sync {
    /// Check the credentials against the guest without starting anything.
    async fn validate_credentials(&self, auth: &Credentials) -> Result<()>;
}
