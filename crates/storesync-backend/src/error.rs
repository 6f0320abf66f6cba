use thiserror::Error;

use crate::StorageArea;

/// Errors raised by a [`StorageBackend`](crate::StorageBackend).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// The host storage could not be opened. Raised at construction time.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    /// A read or write failed at the host layer.
    #[error("storage I/O error: {0}")]
    Io(String),
    /// The area holds as many entries as it is allowed to.
    #[error("storage quota exceeded ({limit} entries)")]
    QuotaExceeded {
        /// Maximum number of entries the area accepts.
        limit: usize,
    },
    /// The area does not accept writes from the application.
    #[error("storage area `{0}` is read-only")]
    ReadOnly(StorageArea),
    /// A stored value could not be converted to or from its persisted form.
    #[error("storage encoding error: {0}")]
    Encoding(String),
}
