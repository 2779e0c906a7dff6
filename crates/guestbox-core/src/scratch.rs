//! Guest-side scratch files.
//!
//! A [`ScratchScope`] owns every scratch file one operation allocates and
//! deletes them when the operation ends, whatever its outcome. Deletion is
//! best-effort: failures are logged and never replace the operation's
//! result.

use crate::context::{guarded, GuestContext};
use crate::error::Result;
use guestbox_api::{Credentials, FileManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Scratch files allocated on behalf of one operation.
///
/// Call [`release`](Self::release) on every exit path. If the scope is
/// dropped with files still registered (for example because the owning
/// future was dropped mid-flight) the remaining files are deleted on a
/// background task.
pub struct ScratchScope {
    files: Arc<dyn FileManager>,
    auth: Credentials,
    prefix: String,
    paths: Vec<String>,
}

impl ScratchScope {
    /// Create an empty scope bound to a context.
    pub fn new(ctx: &GuestContext) -> Self {
        Self {
            files: ctx.files_arc(),
            auth: ctx.auth().clone(),
            prefix: ctx.config().temp_prefix.clone(),
            paths: Vec::new(),
        }
    }

    /// Allocate a uniquely named scratch file in the guest temp directory.
    ///
    /// # Arguments
    /// * `suffix` - Name suffix, e.g. `.ps1` for scripts; may be empty
    ///
    /// # Returns
    /// The guest path, now owned by this scope.
    pub async fn create(&mut self, suffix: &str, cancel: &CancellationToken) -> Result<String> {
        let path = guarded(
            cancel,
            self.files
                .create_temporary_file(&self.auth, &self.prefix, suffix, None),
        )
        .await?;
        tracing::debug!(path = %path, "Scratch file created");
        self.paths.push(path.clone());
        Ok(path)
    }

    /// Stop tracking a scratch file that no longer lives at its path.
    ///
    /// Used after the file was moved into its final place.
    ///
    /// # Returns
    /// `true` if the path was owned by this scope.
    pub fn disown(&mut self, path: &str) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        before != self.paths.len()
    }

    /// Paths currently owned by this scope.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Delete every owned scratch file.
    ///
    /// Runs regardless of cancellation so cleanup happens even after the
    /// operation was aborted.
    pub async fn release(mut self) {
        let paths = std::mem::take(&mut self.paths);
        for path in paths.iter().rev() {
            remove_scratch(self.files.as_ref(), &self.auth, path).await;
        }
    }
}

impl Drop for ScratchScope {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }

        let paths = std::mem::take(&mut self.paths);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(count = paths.len(), "Releasing abandoned scratch files");
                let files = Arc::clone(&self.files);
                let auth = self.auth.clone();
                handle.spawn(async move {
                    for path in paths.iter().rev() {
                        remove_scratch(files.as_ref(), &auth, path).await;
                    }
                });
            }
            Err(_) => {
                tracing::warn!(?paths, "No runtime to release scratch files; leaving them behind");
            }
        }
    }
}

/// Best-effort deletion of a guest scratch file.
///
/// A file that is already gone is tolerated; every failure is logged and
/// swallowed.
pub async fn remove_scratch(files: &dyn FileManager, auth: &Credentials, path: &str) {
    match files.delete_file(auth, path).await {
        Ok(()) => tracing::debug!(path = %path, "Scratch file deleted"),
        Err(e) if e.is_not_found() => {
            tracing::debug!(path = %path, "Scratch file already gone")
        }
        Err(e) => tracing::warn!(path = %path, error = %e, "Failed to delete scratch file"),
    }
}
