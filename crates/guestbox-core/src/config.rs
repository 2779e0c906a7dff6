//! Toolbox configuration types.

use crate::error::ToolboxError;
use std::time::Duration;

/// PowerShell interpreter used for every Windows-family launch.
pub const DEFAULT_POWERSHELL_PATH: &str =
    "C:\\WINDOWS\\system32\\WindowsPowerShell\\v1.0\\powershell.exe";

/// Shell used when a non-Windows command is not an absolute path.
pub const DEFAULT_BASH_PATH: &str = "/bin/bash";

/// Configuration shared by every operation of a [`GuestContext`](crate::GuestContext).
#[derive(Debug, Clone)]
pub struct ToolboxConfig {
    /// Poll interval for command runs (default: 10 seconds).
    pub command_poll_interval: Duration,
    /// Poll interval for script runs (default: 2 seconds).
    pub script_poll_interval: Duration,
    /// Guest path of the PowerShell interpreter.
    pub powershell_path: String,
    /// Guest path of bash.
    pub bash_path: String,
    /// Prefix for scratch file names (default: `guestbox-`).
    pub temp_prefix: String,
    /// Suffix for staged scripts (default: `.ps1`).
    pub script_suffix: String,
    /// Suffix for staged directory archives (default: `.tar.gz`).
    pub archive_suffix: String,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            command_poll_interval: Duration::from_secs(10),
            script_poll_interval: Duration::from_secs(2),
            powershell_path: DEFAULT_POWERSHELL_PATH.to_string(),
            bash_path: DEFAULT_BASH_PATH.to_string(),
            temp_prefix: "guestbox-".to_string(),
            script_suffix: ".ps1".to_string(),
            archive_suffix: ".tar.gz".to_string(),
        }
    }
}

impl ToolboxConfig {
    /// Create a new config builder.
    pub fn builder() -> ToolboxConfigBuilder {
        ToolboxConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GUESTBOX_COMMAND_POLL_SECS` | `10` |
    /// | `GUESTBOX_SCRIPT_POLL_SECS` | `2` |
    /// | `GUESTBOX_POWERSHELL` | `C:\WINDOWS\system32\WindowsPowerShell\v1.0\powershell.exe` |
    /// | `GUESTBOX_BASH` | `/bin/bash` |
    /// | `GUESTBOX_TEMP_PREFIX` | `guestbox-` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            command_poll_interval: std::env::var("GUESTBOX_COMMAND_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.command_poll_interval),
            script_poll_interval: std::env::var("GUESTBOX_SCRIPT_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.script_poll_interval),
            powershell_path: std::env::var("GUESTBOX_POWERSHELL")
                .unwrap_or(default.powershell_path),
            bash_path: std::env::var("GUESTBOX_BASH").unwrap_or(default.bash_path),
            temp_prefix: std::env::var("GUESTBOX_TEMP_PREFIX").unwrap_or(default.temp_prefix),
            ..default
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ToolboxError> {
        if self.command_poll_interval.is_zero() {
            return Err(ToolboxError::Config(
                "command_poll_interval must be > 0".into(),
            ));
        }
        if self.script_poll_interval.is_zero() {
            return Err(ToolboxError::Config(
                "script_poll_interval must be > 0".into(),
            ));
        }
        if self.powershell_path.is_empty() {
            return Err(ToolboxError::Config("powershell_path is required".into()));
        }
        if !self.bash_path.starts_with('/') {
            return Err(ToolboxError::Config(
                "bash_path must be an absolute path".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for ToolboxConfig.
#[derive(Debug, Default)]
pub struct ToolboxConfigBuilder {
    config: ToolboxConfig,
}

impl ToolboxConfigBuilder {
    /// Set the command poll interval.
    pub fn command_poll_interval(mut self, interval: Duration) -> Self {
        self.config.command_poll_interval = interval;
        self
    }

    /// Set the script poll interval.
    pub fn script_poll_interval(mut self, interval: Duration) -> Self {
        self.config.script_poll_interval = interval;
        self
    }

    /// Set the PowerShell interpreter path.
    pub fn powershell_path(mut self, path: impl Into<String>) -> Self {
        self.config.powershell_path = path.into();
        self
    }

    /// Set the bash path.
    pub fn bash_path(mut self, path: impl Into<String>) -> Self {
        self.config.bash_path = path.into();
        self
    }

    /// Set the scratch file prefix.
    pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.temp_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<ToolboxConfig, ToolboxError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
