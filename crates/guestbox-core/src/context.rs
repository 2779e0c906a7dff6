//! Execution context shared by every guest operation.

use crate::config::ToolboxConfig;
use crate::error::{Result, ToolboxError};
use guestbox_api::{AuthManager, Credentials, FileManager, GuestOsFamily, ProcessManager, Transport};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier attached to every log line of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything an operation needs to talk to one guest.
///
/// Bundles the two management sub-managers, the transfer transport, the
/// credentials and the guest's OS family. It is cheap to clone and is passed
/// by reference into every operation; invocations sharing a context share
/// nothing mutable beyond the management connection itself.
#[derive(Clone)]
pub struct GuestContext {
    processes: Arc<dyn ProcessManager>,
    files: Arc<dyn FileManager>,
    transport: Arc<dyn Transport>,
    auth: Credentials,
    family: GuestOsFamily,
    config: ToolboxConfig,
}

impl GuestContext {
    /// Create a context with the default [`ToolboxConfig`].
    pub fn new(
        processes: Arc<dyn ProcessManager>,
        files: Arc<dyn FileManager>,
        transport: Arc<dyn Transport>,
        auth: Credentials,
        family: GuestOsFamily,
    ) -> Self {
        Self {
            processes,
            files,
            transport,
            auth,
            family,
            config: ToolboxConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ToolboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Process sub-manager.
    pub fn processes(&self) -> &dyn ProcessManager {
        self.processes.as_ref()
    }

    /// File sub-manager.
    pub fn files(&self) -> &dyn FileManager {
        self.files.as_ref()
    }

    pub(crate) fn files_arc(&self) -> Arc<dyn FileManager> {
        Arc::clone(&self.files)
    }

    /// Transfer transport.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Credentials presented on every call.
    pub fn auth(&self) -> &Credentials {
        &self.auth
    }

    /// Guest OS family.
    pub fn family(&self) -> GuestOsFamily {
        self.family
    }

    /// Toolbox configuration.
    pub fn config(&self) -> &ToolboxConfig {
        &self.config
    }

    /// Check the context's credentials against the guest.
    pub async fn validate_credentials(
        &self,
        auth_manager: &dyn AuthManager,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!(family = %self.family, "Validating guest credentials");
        guarded(cancel, auth_manager.validate_credentials(&self.auth)).await
    }
}

impl fmt::Debug for GuestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestContext")
            .field("auth", &self.auth)
            .field("family", &self.family)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Run one management-API call at a cancellation boundary.
///
/// Fails fast if the token is already cancelled, otherwise races the call
/// against cancellation.
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = guestbox_api::Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(ToolboxError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ToolboxError::Cancelled),
        result = call => result.map_err(ToolboxError::from),
    }
}
