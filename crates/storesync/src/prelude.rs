//! Convenience re-exports.
//!
//! ```
//! use storesync::prelude::*;
//! ```

pub use crate::{
    with_lookup, Lookup, Registry, RoutedStore, StorageBackend, StoreError, SyncStore,
    SyncedStore, VersionOptions,
};
