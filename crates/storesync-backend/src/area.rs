use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::BackendError;

/// Selects which storage area of the host a backend reads and writes.
///
/// `Local`, `Sync` and `Managed` correspond to extension-style storage areas;
/// `Session` and `Local` to the simple local/session-storage style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Durable, device-local storage.
    #[default]
    Local,
    /// Storage replicated by the host across the user's devices.
    Sync,
    /// Administrator-provided storage. Read-only for the application.
    Managed,
    /// Storage that lives as long as the browsing session.
    Session,
}

impl StorageArea {
    /// The lowercase name used in persisted keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sync => "sync",
            Self::Managed => "managed",
            Self::Session => "session",
        }
    }

    /// Whether the application may write to this area.
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Managed)
    }

    /// Fails with [`BackendError::ReadOnly`] for read-only areas.
    pub fn ensure_writable(&self) -> Result<(), BackendError> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(BackendError::ReadOnly(*self))
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageArea {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "sync" => Ok(Self::Sync),
            "managed" => Ok(Self::Managed),
            "session" => Ok(Self::Session),
            other => Err(BackendError::Unavailable(format!(
                "unknown storage area `{other}`"
            ))),
        }
    }
}
