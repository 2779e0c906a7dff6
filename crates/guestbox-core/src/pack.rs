//! Local directory packing for directory transfers.
//!
//! Directories travel as gzip-compressed tarballs. Packing and unpacking run
//! on the blocking pool.

use crate::error::{Result, ToolboxError};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::{Path, PathBuf};

/// Pack a local directory into an in-memory `.tar.gz`.
///
/// Entries are stored relative to `dir`, so unpacking into a destination
/// recreates the directory's contents there.
pub async fn pack_dir(dir: &Path) -> Result<Bytes> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || pack_dir_blocking(&dir))
        .await
        .map_err(|e| ToolboxError::Archive(format!("pack task failed: {e}")))?
}

fn pack_dir_blocking(dir: &Path) -> Result<Bytes> {
    if !dir.is_dir() {
        return Err(ToolboxError::Archive(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar_builder = tar::Builder::new(encoder);

    tar_builder
        .append_dir_all(".", dir)
        .map_err(|e| ToolboxError::Archive(format!("failed to pack '{}': {e}", dir.display())))?;

    let encoder = tar_builder
        .into_inner()
        .map_err(|e| ToolboxError::Archive(e.to_string()))?;
    let data = encoder
        .finish()
        .map_err(|e| ToolboxError::Archive(e.to_string()))?;

    tracing::debug!(dir = %dir.display(), size = data.len(), "Directory packed");
    Ok(Bytes::from(data))
}

/// Unpack a `.tar.gz` into a local directory, creating it if needed.
pub async fn unpack_archive(data: Bytes, dest: &Path) -> Result<()> {
    let dest: PathBuf = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        fs::create_dir_all(&dest)?;

        let mut archive = tar::Archive::new(GzDecoder::new(&data[..]));
        archive.unpack(&dest).map_err(|e| {
            ToolboxError::Archive(format!("failed to unpack into '{}': {e}", dest.display()))
        })?;

        tracing::debug!(dest = %dest.display(), size = data.len(), "Archive unpacked");
        Ok(())
    })
    .await
    .map_err(|e| ToolboxError::Archive(format!("unpack task failed: {e}")))?
}
