//! Stores over the file-backed backends.

#![cfg(any(feature = "sqlite", feature = "redb"))]

use storesync::prelude::*;
use storesync::{StorageArea, VersionOptions};

async fn write_then_reopen<B, F>(open: F)
where
    B: StorageBackend + 'static,
    F: Fn() -> B,
{
    {
        let registry = Registry::with_backend(open());
        let count = registry.create_sync_store("count", 1, true);
        for _ in 0..3 {
            let current = count.get().await.unwrap();
            count.set(current + 1).await.unwrap();
        }
        let old = registry.backend();
        old.set("arch_v0", serde_json::json!(64)).await.unwrap();
    }

    let registry = Registry::with_backend(open());
    let count = registry.create_sync_store("count", 1, true);
    assert_eq!(count.get().await.unwrap(), 4);

    let arch = registry
        .create_versioned_store(
            "arch",
            String::new(),
            true,
            VersionOptions::new(1).migrate_from(0, |bits: i64| format!("x{bits}")),
        )
        .unwrap();
    assert_eq!(arch.get().await.unwrap(), "x64");
    assert!(!registry.backend().contains("arch_v0").await.unwrap());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    write_then_reopen(|| storesync::SqliteBackend::open(&path, StorageArea::Local).unwrap()).await;
}

#[cfg(feature = "redb")]
#[tokio::test]
async fn redb_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.redb");
    write_then_reopen(|| storesync::RedbBackend::open(&path, StorageArea::Local).unwrap()).await;
}
