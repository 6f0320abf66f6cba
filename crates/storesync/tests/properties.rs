//! Property-based tests over store write sequences.

use proptest::prelude::*;
use storesync::prelude::*;
use storesync::{MemoryBackend, StorageArea};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn last_write_is_persisted(values in proptest::collection::vec(any::<i64>(), 1..20)) {
        runtime().block_on(async {
            let backend = MemoryBackend::new(StorageArea::Local);
            let registry = Registry::with_backend(backend.attach());
            let store = registry.create_sync_store("k", 0i64, true);
            for v in &values {
                store.set(*v).await.unwrap();
            }
            let last = *values.last().unwrap();
            assert_eq!(store.get().await.unwrap(), last);

            let reopened = Registry::with_backend(backend);
            let fresh = reopened.create_sync_store("k", 0i64, true);
            assert_eq!(fresh.get().await.unwrap(), last);
        });
    }

    #[test]
    fn peers_converge_on_last_write(
        writes in proptest::collection::vec((any::<bool>(), any::<i32>()), 1..20)
    ) {
        runtime().block_on(async {
            let shared = MemoryBackend::new(StorageArea::Local);
            let left = Registry::with_backend(shared.attach());
            let right = Registry::with_backend(shared);
            let a = left.create_sync_store("k", 0, true);
            let b = right.create_sync_store("k", 0, true);
            a.ready().await.unwrap();
            b.ready().await.unwrap();

            for (from_a, v) in &writes {
                let writer = if *from_a { &a } else { &b };
                writer.set(*v).await.unwrap();
            }
            let last = writes.last().unwrap().1;
            assert_eq!(a.get_current(), last);
            assert_eq!(b.get_current(), last);
        });
    }
}
