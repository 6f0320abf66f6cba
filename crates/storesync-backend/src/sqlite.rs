//! SQLite storage backend using rusqlite.
//!
//! Durable, text-oriented backend: values are persisted as JSON text, one row
//! per `(area, key)`. Uses WAL mode by default.
//!
//! Change notifications are delivered to the listeners of the instance that
//! performed the write; SQLite offers no cross-connection change feed.
//!
//! # Example
//!
//! ```no_run
//! use storesync_backend::{SqliteBackend, StorageArea, StorageBackend};
//! use serde_json::json;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let backend = SqliteBackend::open("settings.db", StorageArea::Local).unwrap();
//! backend.set("theme", json!("dark")).await.unwrap();
//! # });
//! ```

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::{
    BackendError, ChangeBatch, ChangeListener, ListenerId, Listeners, StorageArea,
    StorageBackend, StorageChange,
};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging — allows concurrent reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}

/// SQLite storage backend bound to one [`StorageArea`].
///
/// Several areas can live in the same database file; each row is scoped by
/// the area name.
pub struct SqliteBackend {
    conn: Connection,
    area: StorageArea,
    listeners: Listeners,
}

impl SqliteBackend {
    /// Open (or create) a database at `path` with default config.
    pub fn open<P: AsRef<Path>>(path: P, area: StorageArea) -> Result<Self, BackendError> {
        Self::open_with_config(path, area, SqliteConfig::default())
    }

    /// Open with custom configuration.
    ///
    /// Fails with [`BackendError::Unavailable`] if the database cannot be
    /// opened or initialized.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        area: StorageArea,
        config: SqliteConfig,
    ) -> Result<Self, BackendError> {
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::from_connection(conn, area, &config)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(area: StorageArea) -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::from_connection(conn, area, &SqliteConfig::default())
    }

    fn from_connection(
        conn: Connection,
        area: StorageArea,
        config: &SqliteConfig,
    ) -> Result<Self, BackendError> {
        Self::init_connection(&conn, config).map_err(unavailable)?;
        Self::create_schema(&conn).map_err(unavailable)?;
        log::debug!("opened sqlite storage area `{area}`");
        Ok(Self {
            conn,
            area,
            listeners: Listeners::new(),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.page_size,
        ))
    }

    fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS storesync_state (
                area        TEXT NOT NULL,
                key         TEXT NOT NULL,
                data        TEXT NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (area, key)
            );",
        )
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn read_text(&self, key: &str) -> Result<Option<String>, BackendError> {
        let text = self
            .conn
            .query_row(
                "SELECT data FROM storesync_state WHERE area = ?1 AND key = ?2",
                params![self.area.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, BackendError> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

fn unavailable(e: rusqlite::Error) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

fn decode(text: &str) -> Result<Value, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::Encoding(e.to_string()))
}

/// Decode a value that is being overwritten or removed.
///
/// An unreadable row never blocks the write; it is reported as absent.
fn decode_previous(key: &str, text: &str) -> Option<Value> {
    match decode(text) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("previous value of `{key}` is not valid JSON, reporting it as absent: {e}");
            None
        }
    }
}

#[async_trait(?Send)]
impl StorageBackend for SqliteBackend {
    fn area(&self) -> StorageArea {
        self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.read_text(key)?.map(|text| decode(&text)).transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.area.ensure_writable()?;
        let text =
            serde_json::to_string(&value).map_err(|e| BackendError::Encoding(e.to_string()))?;
        let old_value = self
            .read_text(key)?
            .and_then(|text| decode_previous(key, &text));
        self.conn.execute(
            "INSERT INTO storesync_state (area, key, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(area, key)
             DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![self.area.as_str(), key, text, Self::now_ms() as i64],
        )?;

        let mut batch = ChangeBatch::new();
        batch.insert(key.to_string(), StorageChange::written(old_value, value));
        self.listeners.notify(&batch);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.area.ensure_writable()?;
        let Some(old_text) = self.read_text(key)? else {
            return Ok(());
        };
        self.conn.execute(
            "DELETE FROM storesync_state WHERE area = ?1 AND key = ?2",
            params![self.area.as_str(), key],
        )?;

        let mut batch = ChangeBatch::new();
        batch.insert(
            key.to_string(),
            StorageChange {
                old_value: decode_previous(key, &old_text),
                new_value: None,
            },
        );
        self.listeners.notify(&batch);
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.area.ensure_writable()?;
        let tx = self.conn.unchecked_transaction()?;
        let rows: Vec<(String, String)> = {
            let mut stmt =
                tx.prepare("SELECT key, data FROM storesync_state WHERE area = ?1 ORDER BY key")?;
            let rows = stmt
                .query_map(params![self.area.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM storesync_state WHERE area = ?1",
            params![self.area.as_str()],
        )?;
        tx.commit()?;

        let mut batch = ChangeBatch::new();
        for (key, text) in rows {
            let old_value = decode_previous(&key, &text);
            batch.insert(
                key,
                StorageChange {
                    old_value,
                    new_value: None,
                },
            );
        }
        self.listeners.notify(&batch);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM storesync_state WHERE area = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![self.area.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool, BackendError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM storesync_state WHERE area = ?1 AND key = ?2",
            params![self.area.as_str(), key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn test_backend() -> SqliteBackend {
        SqliteBackend::open_in_memory(StorageArea::Local).unwrap()
    }

    #[tokio::test]
    async fn set_get_remove() {
        let backend = test_backend();

        backend.set("k1", json!({"theme": "dark"})).await.unwrap();
        assert_eq!(
            backend.get("k1").await.unwrap(),
            Some(json!({"theme": "dark"}))
        );

        backend.set("k1", json!(42)).await.unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), Some(json!(42)));

        backend.remove("k1").await.unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), None);
        backend.remove("k1").await.unwrap();
    }

    #[tokio::test]
    async fn values_are_stored_as_json_text() {
        let backend = test_backend();
        backend.set("k", json!([1, "two"])).await.unwrap();

        let text: String = backend
            .conn
            .query_row(
                "SELECT data FROM storesync_state WHERE key = 'k'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(text, r#"[1,"two"]"#);
    }

    #[tokio::test]
    async fn notifies_own_listeners() {
        let backend = test_backend();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        backend.add_change_listener(Rc::new(move |batch: &ChangeBatch| {
            sink.borrow_mut().push(batch.clone())
        }));

        backend.set("k", json!(1)).await.unwrap();
        backend.set("k", json!(2)).await.unwrap();
        backend.remove("k").await.unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1]["k"], StorageChange::written(Some(json!(1)), json!(2)));
        assert_eq!(seen[2]["k"], StorageChange::removed(json!(2)));
    }

    #[tokio::test]
    async fn clear_only_touches_own_area() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("areas.db");
        let local = SqliteBackend::open(&path, StorageArea::Local).unwrap();
        let sync = SqliteBackend::open(&path, StorageArea::Sync).unwrap();

        local.set("a", json!(1)).await.unwrap();
        local.set("b", json!(2)).await.unwrap();
        sync.set("a", json!("sync")).await.unwrap();

        local.clear().await.unwrap();

        assert!(local.keys().await.unwrap().is_empty());
        assert_eq!(sync.get("a").await.unwrap(), Some(json!("sync")));
    }

    #[tokio::test]
    async fn keys_sorted_and_contains() {
        let backend = test_backend();
        backend.set("b", json!(2)).await.unwrap();
        backend.set("a", json!(1)).await.unwrap();

        assert_eq!(backend.keys().await.unwrap(), vec!["a", "b"]);
        assert!(backend.contains("a").await.unwrap());
        assert!(!backend.contains("z").await.unwrap());
    }

    #[tokio::test]
    async fn open_file_based() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let backend = SqliteBackend::open(&db_path, StorageArea::Local).unwrap();
            backend.set("k1", json!("persist")).await.unwrap();
        }

        let backend = SqliteBackend::open(&db_path, StorageArea::Local).unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), Some(json!("persist")));
    }

    #[tokio::test]
    async fn corrupt_row_can_be_overwritten_and_removed() {
        let backend = test_backend();
        let corrupt = || {
            backend
                .conn
                .execute(
                    "INSERT OR REPLACE INTO storesync_state (area, key, data) VALUES ('local', 'k', 'not json')",
                    [],
                )
                .unwrap();
        };
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        backend.add_change_listener(Rc::new(move |batch: &ChangeBatch| {
            sink.borrow_mut().push(batch.clone())
        }));

        corrupt();
        assert!(matches!(
            backend.get("k").await,
            Err(BackendError::Encoding(_))
        ));
        backend.set("k", json!(1)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(json!(1)));

        corrupt();
        backend.remove("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);

        corrupt();
        backend.clear().await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0]["k"], StorageChange::written(None, json!(1)));
        assert_eq!(seen[1]["k"], StorageChange::default());
        assert_eq!(seen[2]["k"], StorageChange::default());
    }

    #[tokio::test]
    async fn managed_area_rejects_writes() {
        let backend = SqliteBackend::open_in_memory(StorageArea::Managed).unwrap();
        assert_eq!(
            backend.set("k", json!(1)).await,
            Err(BackendError::ReadOnly(StorageArea::Managed))
        );
    }

    #[test]
    fn unopenable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("x.db");
        assert!(matches!(
            SqliteBackend::open(missing, StorageArea::Local),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn wal_mode_enabled() {
        let backend = test_backend();
        let mode = backend.journal_mode().unwrap();
        // In-memory databases may report "memory" instead of "wal"
        assert!(mode == "wal" || mode == "memory", "got: {mode}");
    }
}
