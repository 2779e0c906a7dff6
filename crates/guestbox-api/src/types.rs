//! Value types exchanged with the management API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authentication presented to the guest on every management-API call.
///
/// Supplied once per context and forwarded untouched.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Guest account name and password.
    NamePassword {
        /// Guest account name
        username: String,
        /// Guest account password
        password: String,
    },
    /// Pre-issued authentication ticket.
    Ticket(String),
}

impl Credentials {
    /// Name/password credentials.
    pub fn name_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::NamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Ticket credentials.
    pub fn ticket(ticket: impl Into<String>) -> Self {
        Self::Ticket(ticket.into())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamePassword { username, .. } => f
                .debug_struct("NamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Ticket(_) => f.debug_tuple("Ticket").field(&"<redacted>").finish(),
        }
    }
}

/// Guest operating system family as reported by the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GuestOsFamily {
    /// Windows family; programs run under PowerShell
    Windows,
    /// Linux family
    Linux,
    /// Novell NetWare family
    Netware,
    /// Solaris family
    Solaris,
    /// macOS family
    Darwin,
    /// Anything else
    Other,
}

impl From<String> for GuestOsFamily {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<GuestOsFamily> for String {
    fn from(family: GuestOsFamily) -> Self {
        family.as_str().to_string()
    }
}

impl GuestOsFamily {
    /// Parse a management-API family identifier (case-insensitive).
    ///
    /// Unknown identifiers map to [`GuestOsFamily::Other`].
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "windowsguest" | "windows" => Self::Windows,
            "linuxguest" | "linux" => Self::Linux,
            "netwareguest" | "netware" => Self::Netware,
            "solarisguest" | "solaris" => Self::Solaris,
            "darwinguestfamily" | "darwin" => Self::Darwin,
            _ => Self::Other,
        }
    }

    /// The management-API identifier for this family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windowsGuest",
            Self::Linux => "linuxGuest",
            Self::Netware => "netwareGuest",
            Self::Solaris => "solarisGuest",
            Self::Darwin => "darwinGuestFamily",
            Self::Other => "otherGuestFamily",
        }
    }

    /// Check if the guest belongs to the Windows family.
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl fmt::Display for GuestOsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Program specification handed to `start_program`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Absolute path of the program inside the guest.
    pub program_path: String,
    /// Argument string, passed verbatim.
    pub arguments: String,
    /// Environment in `KEY=value` form.
    pub env_variables: Vec<String>,
    /// Working directory, guest default when `None`.
    pub working_directory: Option<String>,
}

/// Status of a guest process as observed by `list_processes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Guest process id.
    pub pid: i64,
    /// Process name.
    pub name: String,
    /// Time the process was started.
    pub start_time: DateTime<Utc>,
    /// Time the process ended; `None` while running.
    pub end_time: Option<DateTime<Utc>>,
    /// Exit code; only meaningful once `end_time` is set.
    pub exit_code: Option<i32>,
}

impl ProcessInfo {
    /// Check if the process has ended.
    pub fn has_ended(&self) -> bool {
        self.end_time.is_some()
    }
}

/// File attributes applied to an uploaded file.
///
/// The default leaves every attribute to the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Last modification time to set.
    pub modification_time: Option<DateTime<Utc>>,
    /// Last access time to set.
    pub access_time: Option<DateTime<Utc>>,
}

/// Result of initiating a transfer out of the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferInformation {
    /// Raw transfer URL, still to be resolved with `transfer_url`.
    pub url: String,
    /// Size of the file in bytes (0 for streamed archives).
    pub size: u64,
    /// Attributes of the source file.
    pub attributes: FileAttributes,
}
