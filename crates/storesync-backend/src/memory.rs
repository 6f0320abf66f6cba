use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    BackendError, ChangeBatch, ChangeListener, ListenerId, Listeners, StorageArea,
    StorageBackend, StorageChange,
};

/// Entries of one storage area, shared by every attached context.
struct SharedArea {
    area: StorageArea,
    entries: RefCell<BTreeMap<String, Value>>,
    quota: Option<usize>,
    /// Listener sets of every attached context.
    contexts: RefCell<Vec<Weak<Listeners>>>,
}

/// In-memory storage backend.
///
/// Values are kept as native `serde_json::Value`s in a `BTreeMap`; nothing
/// touches disk. A backend can be [attached](MemoryBackend::attach) again to
/// model another execution context (e.g. a second extension page) reading the
/// same area: a write through any context notifies the listeners of all of
/// them, as host storage does.
///
/// # Example
///
/// ```
/// use storesync_backend::{MemoryBackend, StorageArea, StorageBackend};
/// use serde_json::json;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let popup = MemoryBackend::new(StorageArea::Local);
/// let options_page = popup.attach();
///
/// popup.set("count", json!(3)).await.unwrap();
/// assert_eq!(options_page.get("count").await.unwrap(), Some(json!(3)));
/// # });
/// ```
pub struct MemoryBackend {
    shared: Rc<SharedArea>,
    listeners: Rc<Listeners>,
}

impl MemoryBackend {
    /// Create an empty area.
    pub fn new(area: StorageArea) -> Self {
        Self::from_shared(Rc::new(SharedArea {
            area,
            entries: RefCell::new(BTreeMap::new()),
            quota: None,
            contexts: RefCell::new(Vec::new()),
        }))
    }

    /// Create an empty area that accepts at most `max_entries` keys.
    ///
    /// Writing a new key past the limit fails with
    /// [`BackendError::QuotaExceeded`]; overwriting an existing key succeeds.
    pub fn with_quota(area: StorageArea, max_entries: usize) -> Self {
        Self::from_shared(Rc::new(SharedArea {
            area,
            entries: RefCell::new(BTreeMap::new()),
            quota: Some(max_entries),
            contexts: RefCell::new(Vec::new()),
        }))
    }

    /// Create a read-only [`StorageArea::Managed`] area preloaded with
    /// host-provided entries.
    pub fn managed<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self::from_shared(Rc::new(SharedArea {
            area: StorageArea::Managed,
            entries: RefCell::new(entries.into_iter().collect()),
            quota: None,
            contexts: RefCell::new(Vec::new()),
        }))
    }

    /// Open another context on the same area.
    ///
    /// The new instance shares the stored entries but owns its listeners.
    pub fn attach(&self) -> Self {
        Self::from_shared(Rc::clone(&self.shared))
    }

    fn from_shared(shared: Rc<SharedArea>) -> Self {
        let listeners = Rc::new(Listeners::new());
        {
            let mut contexts = shared.contexts.borrow_mut();
            contexts.retain(|weak| weak.strong_count() > 0);
            contexts.push(Rc::downgrade(&listeners));
        }
        Self { shared, listeners }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.shared.entries.borrow().len()
    }

    /// Returns `true` if the area holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored entry.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.shared.entries.borrow().clone()
    }

    /// Deliver `batch` to the listeners of every live context.
    fn broadcast(&self, batch: &ChangeBatch) {
        let contexts: Vec<Rc<Listeners>> = {
            let mut contexts = self.shared.contexts.borrow_mut();
            contexts.retain(|weak| weak.strong_count() > 0);
            contexts.iter().filter_map(Weak::upgrade).collect()
        };
        for listeners in contexts {
            listeners.notify(batch);
        }
    }
}

#[async_trait(?Send)]
impl StorageBackend for MemoryBackend {
    fn area(&self) -> StorageArea {
        self.shared.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        Ok(self.shared.entries.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.shared.area.ensure_writable()?;
        let old_value = {
            let mut entries = self.shared.entries.borrow_mut();
            if let Some(limit) = self.shared.quota {
                if !entries.contains_key(key) && entries.len() >= limit {
                    return Err(BackendError::QuotaExceeded { limit });
                }
            }
            entries.insert(key.to_string(), value.clone())
        };

        let mut batch = ChangeBatch::new();
        batch.insert(key.to_string(), StorageChange::written(old_value, value));
        self.broadcast(&batch);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.shared.area.ensure_writable()?;
        let removed = self.shared.entries.borrow_mut().remove(key);
        if let Some(old_value) = removed {
            let mut batch = ChangeBatch::new();
            batch.insert(key.to_string(), StorageChange::removed(old_value));
            self.broadcast(&batch);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.shared.area.ensure_writable()?;
        let removed = core::mem::take(&mut *self.shared.entries.borrow_mut());
        let batch: ChangeBatch = removed
            .into_iter()
            .map(|(key, old_value)| (key, StorageChange::removed(old_value)))
            .collect();
        self.broadcast(&batch);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.shared.entries.borrow().keys().cloned().collect())
    }

    async fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.shared.entries.borrow().contains_key(key))
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
