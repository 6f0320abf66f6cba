use storesync_backend::BackendError;
use thiserror::Error;

use crate::versioned::MigrationSource;

/// Error type for store and registry operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Error from the underlying storage backend.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Store options rejected at construction time.
    #[error("invalid store configuration: {0}")]
    Configuration(String),
    /// A stored value does not have the store's value type.
    #[error("cannot decode value stored under `{key}`: {reason}")]
    Decode {
        /// Effective key of the value.
        key: String,
        /// Why decoding failed.
        reason: String,
    },
    /// A value could not be converted to its stored form.
    #[error("cannot encode value for `{key}`: {reason}")]
    Encode {
        /// Effective key of the value.
        key: String,
        /// Why encoding failed.
        reason: String,
    },
    /// A migration strategy failed. The old value is left in place.
    #[error("migrating `{key}` from {from} failed: {reason}")]
    Migration {
        /// Effective key of the migrating store.
        key: String,
        /// Version the value was migrated from.
        from: MigrationSource,
        /// Why the migration failed.
        reason: String,
    },
}

/// Result alias for store operations.
pub type Result<T, E = StoreError> = core::result::Result<T, E>;
