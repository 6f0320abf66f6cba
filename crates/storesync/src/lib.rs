//! # storesync
//!
//! Keep reactive in-memory stores in sync with a key-value storage backend.
//!
//! A [`Registry`] owns one [`StorageBackend`] and creates stores on it. Each
//! store caches the value of one key, lazily pulls it from the backend on
//! first access, writes every update back, and receives changes made by
//! other contexts sharing the same storage area.
//!
//! - [`SyncedStore`]: one key, a default value, observable updates.
//! - Versioned stores: the effective key carries a version, and values under
//!   older versions are migrated on first access (see [`VersionOptions`]).
//! - [`with_lookup`]: item-level `get_item`/`set_item` on stores whose value
//!   is a map.
//!
//! ## Quick Start
//!
//! ```
//! use storesync::{Registry, StorageBackend, SyncStore, VersionOptions};
//! use serde_json::Value;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let registry = Registry::new();
//!
//! let theme = registry.create_sync_store("theme", "light".to_string(), true);
//! assert_eq!(theme.get().await.unwrap(), "light");
//! theme.set("dark".to_string()).await.unwrap();
//!
//! // A record written by an older release, under the unversioned key.
//! registry.backend().set("arch", Value::from("x64")).await.unwrap();
//! let arch = registry
//!     .create_versioned_store(
//!         "arch",
//!         Vec::<String>::new(),
//!         true,
//!         VersionOptions::new(1).migrate_from(-1, |old: String| vec![old]),
//!     )
//!     .unwrap();
//! assert_eq!(arch.key(), "arch_v1");
//! assert_eq!(arch.get().await.unwrap(), vec!["x64".to_string()]);
//! # });
//! ```
//!
//! ## Concurrency
//!
//! Everything runs on one thread with cooperative scheduling: stores and
//! backends are `!Send`, state lives behind `Rc`/`RefCell`, and change
//! notifications are delivered synchronously, in the order the backend
//! reports them.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `sqlite` | SQLite-backed storage areas (`SqliteBackend`) |
//! | `redb` | redb-backed storage areas (`RedbBackend`) |

mod config;
mod error;
mod lookup;
mod observable;
mod registry;
mod store;
mod versioned;

pub mod prelude;

pub use config::{RegistryConfig, DEFAULT_SEPARATOR};
pub use error::{Result, StoreError};
pub use lookup::{with_lookup, Lookup, LookupStore};
pub use observable::{Observable, Subscription};
pub use registry::{Registry, RegistryBuilder};
pub use store::{RoutedStore, SyncStore, SyncedStore};
pub use versioned::{
    migration, versioned_key, Migration, MigrationError, MigrationSource, VersionOptions,
    UNVERSIONED,
};

pub use storesync_backend::{
    BackendError, ChangeBatch, ChangeListener, ListenerId, MemoryBackend, StorageArea,
    StorageBackend, StorageChange,
};
#[cfg(feature = "redb")]
pub use storesync_backend::RedbBackend;
#[cfg(feature = "sqlite")]
pub use storesync_backend::{JournalMode, SqliteBackend, SqliteConfig};
