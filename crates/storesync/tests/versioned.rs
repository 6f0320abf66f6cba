//! Integration tests for versioned stores and migrations.

use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use storesync::prelude::*;
use storesync::{
    migration, BackendError, ChangeListener, ListenerId, MemoryBackend, MigrationSource,
    StorageArea,
};

#[tokio::test]
async fn migrates_previous_version() {
    let registry = Registry::new();
    registry.backend().set("arch_v0", json!(64)).await.unwrap();

    let arch = registry
        .create_versioned_store(
            "arch",
            "unknown".to_string(),
            true,
            VersionOptions::new(1).migrate_from(0, |bits: i64| format!("x{bits}")),
        )
        .unwrap();

    assert_eq!(arch.key(), "arch_v1");
    assert_eq!(arch.get().await.unwrap(), "x64");
    assert_eq!(registry.backend().get("arch_v0").await.unwrap(), None);
    assert_eq!(
        registry.backend().get("arch_v1").await.unwrap(),
        Some(json!("x64"))
    );
}

#[tokio::test]
async fn migrates_unversioned_value() {
    let registry = Registry::new();
    registry.backend().set("arch", json!("x64")).await.unwrap();

    let arch = registry
        .create_versioned_store(
            "arch",
            Vec::<String>::new(),
            true,
            VersionOptions::new(1)
                .migrate_from(MigrationSource::Unversioned, |old: String| vec![old]),
        )
        .unwrap();

    assert_eq!(arch.get().await.unwrap(), vec!["x64".to_string()]);
    assert!(!registry.backend().contains("arch").await.unwrap());
}

#[tokio::test]
async fn unversioned_number_becomes_string() {
    let registry = Registry::new();
    registry.backend().set("arch", json!(64)).await.unwrap();

    let arch = registry
        .create_versioned_store(
            "arch",
            String::new(),
            true,
            VersionOptions::new(1).migrate_from(-1, |bits: i64| format!("x{bits}")),
        )
        .unwrap();

    assert_eq!(arch.get().await.unwrap(), "x64");
    assert_eq!(registry.backend().get("arch").await.unwrap(), None);
    assert_eq!(
        registry.backend().get("arch_v1").await.unwrap(),
        Some(json!("x64"))
    );
}

#[tokio::test]
async fn without_old_data_seeds_default() {
    let registry = Registry::new();
    let store = registry
        .create_versioned_store(
            "limits",
            10u32,
            true,
            VersionOptions::new(2).migrate_from(1, |old: u32| old * 2),
        )
        .unwrap();

    assert_eq!(store.get().await.unwrap(), 10);
    assert_eq!(
        registry.backend().keys().await.unwrap(),
        vec!["limits_v2".to_string()]
    );
}

#[tokio::test]
async fn later_migrations_win() {
    let registry = Registry::new();
    registry.backend().set("n", json!(1)).await.unwrap();
    registry.backend().set("n_v1", json!(2)).await.unwrap();

    let store = registry
        .create_versioned_store(
            "n",
            0i64,
            true,
            VersionOptions::new(2)
                .migrate_from(-1, |old: i64| old * 100)
                .migrate_from(1, |old: i64| old * 10),
        )
        .unwrap();

    assert_eq!(store.get().await.unwrap(), 20);
    assert_eq!(
        registry.backend().keys().await.unwrap(),
        vec!["n_v2".to_string()]
    );
}

#[tokio::test]
async fn failed_migration_keeps_old_key() {
    let registry = Registry::new();
    registry.backend().set("arch_v0", json!("not a number")).await.unwrap();

    let arch = registry
        .create_versioned_store(
            "arch",
            "unknown".to_string(),
            true,
            VersionOptions::new(1).migrate_from(0, |bits: i64| format!("x{bits}")),
        )
        .unwrap();

    let err = arch.ready().await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Migration { ref key, from: MigrationSource::Version(0), .. } if key == "arch_v1"
    ));
    assert!(arch.is_ready());
    assert_eq!(arch.get().await.unwrap(), "unknown");
    assert_eq!(
        registry.backend().get("arch_v0").await.unwrap(),
        Some(json!("not a number"))
    );
}

#[tokio::test]
async fn registry_supplies_default_separator() {
    let registry = Registry::builder().default_separator("@").build();
    let store = registry
        .create_versioned_store("cfg", 0, true, VersionOptions::new(3))
        .unwrap();
    assert_eq!(store.key(), "cfg@3");
    assert!(registry.contains("cfg@3"));

    let explicit = registry
        .create_versioned_store("cfg", 0, true, VersionOptions::new(3).separator("-v"))
        .unwrap();
    assert_eq!(explicit.key(), "cfg-v3");
}

#[tokio::test]
async fn versioned_store_receives_external_changes() {
    let registry = Registry::new();
    let store = registry
        .create_versioned_store("count", 0, true, VersionOptions::new(1))
        .unwrap();
    store.ready().await.unwrap();

    registry.backend().set("count_v1", json!(6)).await.unwrap();
    assert_eq!(store.get_current(), 6);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Window {
    width: u32,
    height: u32,
}

#[tokio::test]
async fn boxed_migration_between_shapes() {
    let registry = Registry::new();
    registry
        .backend()
        .set("window_v1", json!([800, 600]))
        .await
        .unwrap();

    let window = registry
        .create_versioned_store(
            "window",
            Window {
                width: 640,
                height: 480,
            },
            true,
            VersionOptions::new(2).migrate(migration(1, |(width, height): (u32, u32)| {
                Window { width, height }
            })),
        )
        .unwrap();

    assert_eq!(
        window.get().await.unwrap(),
        Window {
            width: 800,
            height: 600
        }
    );
}

#[test]
fn invalid_options_are_rejected() {
    let registry = Registry::new();
    let reject = |options: VersionOptions<i32>| {
        let err = registry
            .create_versioned_store("k", 0, true, options)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Configuration(_)), "{err}");
    };

    reject(VersionOptions::new(-1));
    reject(VersionOptions::new(1).separator(""));
    reject(VersionOptions::new(1).separator("v2"));
    reject(VersionOptions::new(1).migrate_from(1, |old: i32| old));
    reject(
        VersionOptions::new(2)
            .migrate_from(0, |old: i32| old)
            .migrate_from(0, |old: i32| old + 1),
    );
    reject(VersionOptions::new(1).migrate(migration(MigrationSource::Version(-1), |old: i32| old)));

    assert!(registry.is_empty());
}

/// Memory backend whose reads never complete while `stalled` is set.
struct StallingBackend {
    inner: MemoryBackend,
    stalled: Cell<bool>,
}

#[async_trait(?Send)]
impl StorageBackend for StallingBackend {
    fn area(&self) -> StorageArea {
        self.inner.area()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        if self.stalled.get() {
            std::future::pending::<()>().await;
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        self.inner.keys().await
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
        self.inner.add_change_listener(listener)
    }

    fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_change_listener(id)
    }

    fn release(&self) {
        self.inner.release();
    }
}

#[tokio::test]
async fn abandoned_pull_still_migrates() {
    let backend = Rc::new(StallingBackend {
        inner: MemoryBackend::new(StorageArea::Local),
        stalled: Cell::new(false),
    });
    backend.set("arch_v0", json!(64)).await.unwrap();
    backend.stalled.set(true);

    let arch = SyncedStore::versioned(
        "arch",
        "unknown".to_string(),
        backend.clone(),
        true,
        VersionOptions::new(1).migrate_from(0, |bits: i64| format!("x{bits}")),
    )
    .unwrap();

    tokio::select! {
        biased;
        _ = arch.ready() => panic!("pull completed while reads are stalled"),
        _ = tokio::task::yield_now() => {}
    }
    assert!(!arch.is_ready());

    backend.stalled.set(false);
    assert_eq!(arch.get().await.unwrap(), "x64");
    assert_eq!(backend.get("arch_v0").await.unwrap(), None);
    assert_eq!(backend.get("arch_v1").await.unwrap(), Some(json!("x64")));
}
