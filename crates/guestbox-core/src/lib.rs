//! # guestbox-core
//!
//! Guest execution toolbox for hypervisor-managed virtual machines.
//!
//! This crate runs programs inside a guest and moves files in and out of it
//! using only the hypervisor's guest-operations interface. No network path
//! to the guest and no agent beyond the hypervisor's own tools are needed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  guestbox-core (caller)                  │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  GuestContext   │────▶│  ScratchScope            │   │
//! │  │  - run()        │     │  (temp files, released   │   │
//! │  │  - run_script() │     │   on every exit path)    │   │
//! │  │  - upload_file()│     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │        │        │                                        │
//! │        ▼        ▼                                        │
//! │  ┌──────────┐ ┌────────────────┐ ┌──────────────────┐   │
//! │  │ Process  │ │ OutputStreamer │ │ TransferManager  │   │
//! │  │ Launcher │ │  poll + delta  │ │  URL handshake   │   │
//! │  └──────────┘ └────────────────┘ └──────────────────┘   │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!          │ ProcessManager / FileManager        │ Transport
//!          ▼                                     ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  hypervisor management   │   │  HTTPS transfer URLs     │
//! │  API (guestbox-api)      │   │  (reqwest)               │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use guestbox_core::{Command, GuestContext};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(ctx: GuestContext) -> guestbox_core::Result<()> {
//! let cancel = CancellationToken::new();
//!
//! // Stream output as it appears
//! let mut run = ctx.spawn(Command::new("uname").arg("-a"), &cancel);
//! while let Some(chunk) = run.recv().await {
//!     print!("{}", chunk.text());
//! }
//! run.wait().await?;
//!
//! // Move a file into place
//! ctx.upload_file("/etc/app.conf", "port = 8080\n", false, &cancel).await?;
//!
//! // Fetch a whole directory
//! let archive = ctx.download_dir("/var/log/app", &cancel).await?;
//! println!("{} bytes", archive.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Remote Execution**: Commands, PowerShell batches and scripts
//! - **Incremental Output**: Gap-free chunks while the program runs
//! - **File Transfer**: Single files and whole directories, both directions
//! - **Scratch Cleanup**: Temporary guest files removed on success, failure and cancellation
//! - **Cancellation**: Every operation honours a `CancellationToken`

mod archive;
mod config;
mod context;
mod error;
mod exec;
mod launcher;
mod pack;
mod scratch;
mod streamer;
mod transfer;

pub use archive::{archive_source, is_archive_source, ArchiveReader, ARCHIVE_PREFIX, ARCHIVE_TRAILER};
pub use config::{ToolboxConfig, ToolboxConfigBuilder, DEFAULT_BASH_PATH, DEFAULT_POWERSHELL_PATH};
pub use context::{GuestContext, RunId};
pub use error::{Result, ToolboxError};
pub use launcher::{build_spec, ensure_supported, Command, LaunchedProcess, ProcessLauncher, ProgramRequest};
pub use pack::{pack_dir, unpack_archive};
pub use scratch::{remove_scratch, ScratchScope};
pub use streamer::{CollectedOutput, OutputChunk, OutputStream, OutputStreamer};
pub use transfer::{Download, SizedSource, TransferManager, UploadSource};
