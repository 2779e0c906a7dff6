//! # guestbox-api
//!
//! Management-API surface used by the guestbox toolbox.
//!
//! The hypervisor's guest-operations interface is split into the same
//! sub-managers the hypervisor exposes:
//!
//! - [`ProcessManager`]: start programs inside the guest and poll them
//! - [`FileManager`]: scratch files, moves, deletes and transfer handshakes
//! - [`AuthManager`]: credential validation
//!
//! The bytes themselves never travel over the management channel. A
//! transfer handshake returns a short-lived URL and a [`Transport`] moves the
//! payload against it. [`HttpTransport`] is the HTTP(S) implementation.
//!
//! ## Features
//!
//! - **Closed value types**: guest OS family, process specs and process status
//! - **Async traits**: `Send + Sync` seams so one connection serves many
//!   concurrent invocations
//! - **Streaming transport**: downloads are exposed as `AsyncRead`, uploads
//!   stream from any `AsyncRead` with a declared length

mod error;
mod manager;
mod transport;
mod types;

pub use error::{ApiError, Result};
pub use manager::{AuthManager, FileManager, ProcessManager};
pub use transport::{
    DownloadReader, HttpTransport, Transport, TransportConfig, UploadReader,
};
pub use types::{
    Credentials, FileAttributes, FileTransferInformation, GuestOsFamily, ProcessInfo,
    ProcessSpec,
};
