//! Pure-Rust storage backend using [`redb`](https://docs.rs/redb).
//!
//! No C dependencies. Values are persisted as JSON bytes under an
//! `area \0 key` composite key, so several areas can share one database file.
//!
//! Enable with `features = ["redb"]`.

use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;

use crate::{
    BackendError, ChangeBatch, ChangeListener, ListenerId, Listeners, StorageArea,
    StorageBackend, StorageChange,
};

// ── Table definitions ───────────────────────────────────────────────

const STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("storesync_state");

fn io(e: impl std::fmt::Display) -> BackendError {
    BackendError::Io(e.to_string())
}

fn unavailable(e: impl std::fmt::Display) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

// ── Backend ─────────────────────────────────────────────────────────

/// A pure-Rust storage backend built on [`redb`].
///
/// Every operation runs in its own redb transaction.
pub struct RedbBackend {
    db: Database,
    area: StorageArea,
    listeners: Listeners,
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, area: StorageArea) -> Result<Self, BackendError> {
        let db = Database::create(path).map_err(unavailable)?;
        Self::from_database(db, area)
    }

    /// Create an in-memory redb database (for testing).
    pub fn open_in_memory(area: StorageArea) -> Result<Self, BackendError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(unavailable)?;
        Self::from_database(db, area)
    }

    fn from_database(db: Database, area: StorageArea) -> Result<Self, BackendError> {
        // Ensure the table exists by opening a write txn.
        let txn = db.begin_write().map_err(unavailable)?;
        txn.open_table(STATE_TABLE).map_err(unavailable)?;
        txn.commit().map_err(unavailable)?;
        Ok(Self {
            db,
            area,
            listeners: Listeners::new(),
        })
    }
}

#[async_trait(?Send)]
impl StorageBackend for RedbBackend {
    fn area(&self) -> StorageArea {
        self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(STATE_TABLE).map_err(io)?;
        let stored = table
            .get(state_key(self.area, key).as_slice())
            .map_err(io)?;
        stored.map(|guard| decode(guard.value())).transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.area.ensure_writable()?;
        let bytes = encode(&value)?;
        let txn = self.db.begin_write().map_err(io)?;
        let old_bytes = {
            let mut table = txn.open_table(STATE_TABLE).map_err(io)?;
            let old = table
                .insert(state_key(self.area, key).as_slice(), bytes.as_slice())
                .map_err(io)?;
            old.map(|guard| guard.value().to_vec())
        };
        txn.commit().map_err(io)?;

        let old_value = old_bytes
            .as_deref()
            .and_then(|bytes| decode_previous(key, bytes));
        let mut batch = ChangeBatch::new();
        batch.insert(key.to_string(), StorageChange::written(old_value, value));
        self.listeners.notify(&batch);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.area.ensure_writable()?;
        let txn = self.db.begin_write().map_err(io)?;
        let old_bytes = {
            let mut table = txn.open_table(STATE_TABLE).map_err(io)?;
            let old = table
                .remove(state_key(self.area, key).as_slice())
                .map_err(io)?;
            old.map(|guard| guard.value().to_vec())
        };
        txn.commit().map_err(io)?;

        if let Some(bytes) = old_bytes {
            let mut batch = ChangeBatch::new();
            batch.insert(
                key.to_string(),
                StorageChange {
                    old_value: decode_previous(key, &bytes),
                    new_value: None,
                },
            );
            self.listeners.notify(&batch);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.area.ensure_writable()?;
        let prefix = state_key_prefix(self.area);
        let upper = state_key_prefix_upper(self.area);

        let txn = self.db.begin_write().map_err(io)?;
        let removed = {
            let mut table = txn.open_table(STATE_TABLE).map_err(io)?;
            let mut entries = Vec::new();
            for item in table
                .range(prefix.as_slice()..upper.as_slice())
                .map_err(io)?
            {
                let (key_guard, value_guard) = item.map_err(io)?;
                entries.push((key_guard.value().to_vec(), value_guard.value().to_vec()));
            }
            for (raw_key, _) in &entries {
                table.remove(raw_key.as_slice()).map_err(io)?;
            }
            entries
        };
        txn.commit().map_err(io)?;

        let mut batch = ChangeBatch::new();
        for (raw_key, bytes) in removed {
            if let Some(key) = parse_state_key(&raw_key) {
                let old_value = decode_previous(key, &bytes);
                batch.insert(
                    key.to_string(),
                    StorageChange {
                        old_value,
                        new_value: None,
                    },
                );
            }
        }
        self.listeners.notify(&batch);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(STATE_TABLE).map_err(io)?;

        let prefix = state_key_prefix(self.area);
        let upper = state_key_prefix_upper(self.area);
        let range = table
            .range(prefix.as_slice()..upper.as_slice())
            .map_err(io)?;

        let mut keys = Vec::new();
        for item in range {
            let (key_guard, _) = item.map_err(io)?;
            if let Some(k) = parse_state_key(key_guard.value()) {
                keys.push(k.to_string());
            }
        }
        Ok(keys)
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn release(&self) {
        self.listeners.release();
    }
}

// ── Key encoding helpers ────────────────────────────────────────────

/// State key: `area \0 key`
fn state_key(area: StorageArea, key: &str) -> Vec<u8> {
    let area = area.as_str();
    let mut k = Vec::with_capacity(area.len() + 1 + key.len());
    k.extend_from_slice(area.as_bytes());
    k.push(0);
    k.extend_from_slice(key.as_bytes());
    k
}

/// Lower bound for all keys of an area.
fn state_key_prefix(area: StorageArea) -> Vec<u8> {
    let mut k = area.as_str().as_bytes().to_vec();
    k.push(0);
    k
}

/// Exclusive upper bound for all keys of an area.
fn state_key_prefix_upper(area: StorageArea) -> Vec<u8> {
    let mut k = area.as_str().as_bytes().to_vec();
    k.push(1); // \x01 > \x00, captures everything in range
    k
}

/// Parse a state key back into its key part.
fn parse_state_key(key: &[u8]) -> Option<&str> {
    let pos = key.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&key[pos + 1..]).ok()
}

// ── Value encoding helpers ──────────────────────────────────────────

fn encode(value: &Value) -> Result<Vec<u8>, BackendError> {
    serde_json::to_vec(value).map_err(|e| BackendError::Encoding(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Value, BackendError> {
    serde_json::from_slice(bytes).map_err(|e| BackendError::Encoding(e.to_string()))
}

/// Decode a value that was just overwritten or removed. The write has
/// already committed, so an unreadable value is reported as absent.
fn decode_previous(key: &str, bytes: &[u8]) -> Option<Value> {
    match decode(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("previous value of `{key}` is not valid JSON, reporting it as absent: {e}");
            None
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
