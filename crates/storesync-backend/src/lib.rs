//! # storesync-backend
//!
//! Storage backends for [`storesync`](https://docs.rs/storesync).
//!
//! Every backend implements [`StorageBackend`]: asynchronous get/set/remove/clear
//! of JSON values by string key within one [`StorageArea`], plus change
//! notification. Listeners receive a [`ChangeBatch`] for every mutation of the
//! area, including mutations made through the same instance. Filtering
//! self-originated changes is left to the caller.
//!
//! ## Quick Start
//!
//! ```
//! use storesync_backend::{MemoryBackend, StorageArea, StorageBackend};
//! use serde_json::json;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let backend = MemoryBackend::new(StorageArea::Local);
//! backend.set("theme", json!("dark")).await.unwrap();
//! assert_eq!(backend.get("theme").await.unwrap(), Some(json!("dark")));
//! # });
//! # }
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Representation |
//! |---------|-------------|----------------|
//! | [`MemoryBackend`] | *(always available)* | native `serde_json::Value` |
//! | `SqliteBackend` | `sqlite` | JSON text |
//! | `RedbBackend` | `redb` | JSON bytes |

mod area;
mod change;
mod error;
mod memory;
#[cfg(feature = "redb")]
mod redb;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use area::StorageArea;
pub use change::{ChangeBatch, ChangeListener, ListenerId, Listeners, StorageChange};
pub use error::BackendError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb")]
pub use redb::RedbBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteBackend, SqliteConfig};
pub use traits::StorageBackend;
