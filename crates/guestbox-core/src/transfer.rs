//! File transfers between the caller and the guest.
//!
//! Every transfer is a two-step handshake: the file manager hands out a
//! short-lived URL, then the transport moves the bytes against it. Uploads
//! must declare their length up front, so sources of unknown length are
//! buffered in memory first.

use crate::archive::{archive_source, is_archive_source, ArchiveReader};
use crate::context::{guarded, GuestContext, RunId};
use crate::error::{Result, ToolboxError};
use crate::launcher::{Command, ProgramRequest};
use crate::pack;
use crate::scratch::ScratchScope;
use bytes::Bytes;
use guestbox_api::{DownloadReader, FileAttributes, UploadReader};
use std::io::Cursor;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Most that `download_bytes` reserves up front from an announced size.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Byte source for an upload.
pub enum UploadSource {
    /// In-memory payload; length known.
    Bytes(Bytes),
    /// Local file; length taken from its metadata.
    File(tokio::fs::File),
    /// Any other reader; buffered to learn its length.
    Reader(UploadReader),
}

impl UploadSource {
    /// Wrap an arbitrary reader.
    pub fn reader(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    /// Resolve the source into a reader with an exact length.
    ///
    /// Known-length sources are passed through untouched. Everything else is
    /// read fully into memory, so memory use grows with the payload.
    ///
    /// # Errors
    /// [`ToolboxError::SizeInference`] if the length cannot be determined.
    pub async fn into_sized(self) -> Result<SizedSource> {
        match self {
            Self::Bytes(data) => Ok(SizedSource {
                len: data.len() as u64,
                body: Box::new(Cursor::new(data)),
                buffered: false,
            }),
            Self::File(file) => {
                let metadata = file
                    .metadata()
                    .await
                    .map_err(|e| ToolboxError::SizeInference(format!("stat failed: {e}")))?;
                if metadata.len() > 0 {
                    Ok(SizedSource {
                        len: metadata.len(),
                        body: Box::new(file),
                        buffered: false,
                    })
                } else {
                    // Devices and pipes report zero; measure by reading.
                    buffer_fully(Box::new(file)).await
                }
            }
            Self::Reader(reader) => buffer_fully(reader).await,
        }
    }
}

async fn buffer_fully(mut reader: UploadReader) -> Result<SizedSource> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ToolboxError::SizeInference(format!("buffering failed: {e}")))?;
    tracing::trace!(len = buf.len(), "Upload source buffered to measure length");

    Ok(SizedSource {
        len: buf.len() as u64,
        body: Box::new(Cursor::new(Bytes::from(buf))),
        buffered: true,
    })
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<String> for UploadSource {
    fn from(data: String) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<&'static str> for UploadSource {
    fn from(data: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl From<tokio::fs::File> for UploadSource {
    fn from(file: tokio::fs::File) -> Self {
        Self::File(file)
    }
}

/// An upload body with its exact length.
pub struct SizedSource {
    /// Reader positioned at the first byte to send.
    pub body: UploadReader,
    /// Number of bytes `body` yields.
    pub len: u64,
    /// Whether the source had to be buffered to learn `len`.
    pub buffered: bool,
}

/// An open download.
pub struct Download {
    /// Body reader; trailer-truncated for archive sources.
    pub reader: DownloadReader,
    /// Length announced by the transfer endpoint (0 for archive streams).
    pub size: u64,
    /// Whether the source was an archive stream.
    pub archive: bool,
}

/// Moves bytes in and out of the guest.
pub struct TransferManager<'a> {
    ctx: &'a GuestContext,
}

impl<'a> TransferManager<'a> {
    /// Create a transfer manager bound to a context.
    pub fn new(ctx: &'a GuestContext) -> Self {
        Self { ctx }
    }

    /// Upload `source` to the guest path `dst`.
    ///
    /// The length is settled before any network call.
    ///
    /// # Returns
    /// The number of bytes sent.
    pub async fn upload(
        &self,
        source: UploadSource,
        dst: &str,
        attributes: &FileAttributes,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let sized = source.into_sized().await?;
        tracing::debug!(dst = %dst, len = sized.len, buffered = sized.buffered, "Uploading to guest");

        let files = self.ctx.files();
        let raw = guarded(
            cancel,
            files.initiate_file_transfer_to_guest(self.ctx.auth(), dst, attributes, sized.len, overwrite),
        )
        .await?;
        let url = guarded(cancel, files.transfer_url(&raw)).await?;

        // In-flight bytes are not interrupted; cancellation applies at the boundary.
        if cancel.is_cancelled() {
            return Err(ToolboxError::Cancelled);
        }
        self.ctx
            .transport()
            .upload(&url, sized.body, sized.len)
            .await?;

        tracing::debug!(dst = %dst, len = sized.len, "Upload complete");
        Ok(sized.len)
    }

    /// Open a download of the guest path `src`.
    ///
    /// Archive sources (`/archive:/...` or a path ending in a separator) are
    /// wrapped so the consumer sees the packed archive without its trailer.
    pub async fn download(&self, src: &str, cancel: &CancellationToken) -> Result<Download> {
        let files = self.ctx.files();
        let info = guarded(
            cancel,
            files.initiate_file_transfer_from_guest(self.ctx.auth(), src),
        )
        .await?;
        let url = guarded(cancel, files.transfer_url(&info.url)).await?;

        if cancel.is_cancelled() {
            return Err(ToolboxError::Cancelled);
        }
        let (reader, size) = self.ctx.transport().download(&url).await?;
        tracing::trace!(src = %src, size, "Download opened");

        if is_archive_source(src) {
            return Ok(Download {
                reader: Box::new(ArchiveReader::new(reader)),
                size,
                archive: true,
            });
        }
        Ok(Download {
            reader,
            size,
            archive: false,
        })
    }

    /// Download the guest path `src` into memory.
    pub async fn download_bytes(&self, src: &str, cancel: &CancellationToken) -> Result<Bytes> {
        let mut download = self.download(src, cancel).await?;
        let mut buf = Vec::with_capacity(download.size.min(MAX_PREALLOCATION) as usize);
        download.reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl GuestContext {
    /// Transfer manager for this context.
    pub fn transfers(&self) -> TransferManager<'_> {
        TransferManager::new(self)
    }

    /// Upload `source` to `dst`, replacing any existing file.
    pub async fn upload(
        &self,
        source: impl Into<UploadSource>,
        dst: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.transfers()
            .upload(source.into(), dst, &FileAttributes::default(), true, cancel)
            .await
    }

    /// Open a download of `src`.
    pub async fn download(&self, src: &str, cancel: &CancellationToken) -> Result<Download> {
        self.transfers().download(src, cancel).await
    }

    /// Download `src` into memory.
    pub async fn download_bytes(&self, src: &str, cancel: &CancellationToken) -> Result<Bytes> {
        self.transfers().download_bytes(src, cancel).await
    }

    /// Stage `source` in a scratch file, then put it in place at `dst`.
    ///
    /// Files are moved onto `dst`. With `is_dir`, `source` must be a
    /// `.tar.gz`; the guest creates `dst` if needed and unpacks into it.
    /// The staging file is removed on every path. A failure after the first
    /// byte reached `dst` can leave it partially written.
    pub async fn upload_file(
        &self,
        dst: &str,
        source: impl Into<UploadSource>,
        is_dir: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let run_id = RunId::new();
        let start = std::time::Instant::now();
        tracing::info!(run_id = %run_id, dst = %dst, is_dir, "Uploading to guest");

        let mut scratch = ScratchScope::new(self);
        let result = self
            .stage_and_place(run_id, &mut scratch, dst, source.into(), is_dir, cancel)
            .await;
        scratch.release().await;

        match &result {
            Ok(()) => tracing::info!(
                run_id = %run_id,
                dst = %dst,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Upload finished"
            ),
            Err(e) => tracing::warn!(run_id = %run_id, dst = %dst, error = %e, "Upload failed"),
        }
        result
    }

    async fn stage_and_place(
        &self,
        run_id: RunId,
        scratch: &mut ScratchScope,
        dst: &str,
        source: UploadSource,
        is_dir: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let suffix = if is_dir {
            self.config().archive_suffix.clone()
        } else {
            String::new()
        };
        let staged = scratch.create(&suffix, cancel).await?;

        self.transfers()
            .upload(source, &staged, &FileAttributes::default(), true, cancel)
            .await?;
        tracing::debug!(run_id = %run_id, staged = %staged, "Payload staged");

        if is_dir {
            let request = unpack_request(self, &staged, dst);
            let interval = self.config().command_poll_interval;
            return self.execute(request, interval, None, cancel).await;
        }

        guarded(
            cancel,
            self.files().move_file(self.auth(), &staged, dst, true),
        )
        .await?;
        scratch.disown(&staged);
        tracing::debug!(run_id = %run_id, staged = %staged, dst = %dst, "Staged file moved into place");
        Ok(())
    }

    /// Upload a script file to `dst`.
    pub async fn upload_script(
        &self,
        dst: &str,
        source: impl Into<UploadSource>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.upload_file(dst, source, false, cancel).await
    }

    /// Pack the local directory `local_dir` and unpack it at `dst` in the guest.
    pub async fn upload_dir(
        &self,
        local_dir: &Path,
        dst: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let archive = pack::pack_dir(local_dir).await?;
        tracing::debug!(local = %local_dir.display(), dst = %dst, size = archive.len(), "Directory packed for upload");
        self.upload_file(dst, archive, true, cancel).await
    }

    /// Download the guest directory `dir` as a `.tar.gz`.
    pub async fn download_dir(&self, dir: &str, cancel: &CancellationToken) -> Result<Bytes> {
        let src = archive_source(dir);
        let archive = self.download_bytes(&src, cancel).await?;
        tracing::debug!(src = %src, size = archive.len(), "Directory archive downloaded");
        Ok(archive)
    }

    /// Download the guest directory `dir` and unpack it into `local_dir`.
    pub async fn download_dir_to(
        &self,
        dir: &str,
        local_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let archive = self.download_dir(dir, cancel).await?;
        pack::unpack_archive(archive, local_dir).await
    }
}

/// Remote command that creates `dst` and unpacks `staged` into it.
fn unpack_request(ctx: &GuestContext, staged: &str, dst: &str) -> ProgramRequest {
    if ctx.family().is_windows() {
        ProgramRequest::Batch(vec![
            format!("mkdir {dst} -Force"),
            format!("tar -xzvf {staged} -C {dst}"),
        ])
    } else {
        ProgramRequest::Command(
            Command::new("mkdir").args(["-p", dst, "&&", "tar", "-xzf", staged, "-C", dst]),
        )
    }
}
