//! Change notifications emitted by backends.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The before/after pair for one key in a [`ChangeBatch`].
///
/// `old_value` is `None` when the key was created, `new_value` is `None`
/// when it was removed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageChange {
    /// Value stored before the change.
    pub old_value: Option<Value>,
    /// Value stored after the change.
    pub new_value: Option<Value>,
}

impl StorageChange {
    /// A change that writes `new_value` over `old_value` (if any).
    pub fn written(old_value: Option<Value>, new_value: Value) -> Self {
        Self {
            old_value,
            new_value: Some(new_value),
        }
    }

    /// A change that deletes `old_value`.
    pub fn removed(old_value: Value) -> Self {
        Self {
            old_value: Some(old_value),
            new_value: None,
        }
    }
}

/// All keys changed by one backend mutation.
pub type ChangeBatch = BTreeMap<String, StorageChange>;

/// Callback invoked with every [`ChangeBatch`] of a backend's area.
pub type ChangeListener = Rc<dyn Fn(&ChangeBatch)>;

/// Handle returned when registering a [`ChangeListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Listener registrations owned by a single backend instance.
///
/// Backends embed one of these and call [`Listeners::notify`] after a
/// mutation has been applied and every internal borrow released.
#[derive(Default)]
pub struct Listeners {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(ListenerId, ChangeListener)>>,
    released: Cell<bool>,
}

impl Listeners {
    /// Create an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Once released, registrations are dropped.
    pub fn add(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        if self.released.get() {
            log::warn!("ignoring change listener registered on a released backend");
            return id;
        }
        self.entries.borrow_mut().push((id, listener));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Deliver `batch` to every registered listener. Empty batches are dropped.
    pub fn notify(&self, batch: &ChangeBatch) {
        if batch.is_empty() {
            return;
        }
        // Listeners may register or remove listeners while being called.
        let snapshot: Vec<ChangeListener> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(batch);
        }
    }

    /// Detach every listener. Idempotent.
    pub fn release(&self) {
        self.released.set(true);
        self.entries.borrow_mut().clear();
    }

    /// Whether [`release`](Self::release) has been called.
    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(key: &str, change: StorageChange) -> ChangeBatch {
        let mut batch = ChangeBatch::new();
        batch.insert(key.to_string(), change);
        batch
    }

    #[test]
    fn notify_reaches_every_listener() {
        let listeners = Listeners::new();
        let seen = Rc::new(Cell::new(0));
        for _ in 0..2 {
            let seen = Rc::clone(&seen);
            listeners.add(Rc::new(move |_: &ChangeBatch| seen.set(seen.get() + 1)));
        }

        listeners.notify(&batch("k", StorageChange::written(None, json!(1))));
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn empty_batch_is_not_delivered() {
        let listeners = Listeners::new();
        let seen = Rc::new(Cell::new(false));
        let flag = Rc::clone(&seen);
        listeners.add(Rc::new(move |_: &ChangeBatch| flag.set(true)));

        listeners.notify(&ChangeBatch::new());
        assert!(!seen.get());
    }

    #[test]
    fn remove_detaches_one_listener() {
        let listeners = Listeners::new();
        let id = listeners.add(Rc::new(|_: &ChangeBatch| {}));
        listeners.add(Rc::new(|_: &ChangeBatch| {}));

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn release_is_idempotent_and_final() {
        let listeners = Listeners::new();
        listeners.add(Rc::new(|_: &ChangeBatch| {}));

        listeners.release();
        listeners.release();
        assert!(listeners.is_empty());

        listeners.add(Rc::new(|_: &ChangeBatch| {}));
        assert!(listeners.is_empty());
    }

    #[test]
    fn listener_may_register_during_notify() {
        let listeners = Rc::new(Listeners::new());
        let inner = Rc::clone(&listeners);
        listeners.add(Rc::new(move |_: &ChangeBatch| {
            inner.add(Rc::new(|_: &ChangeBatch| {}));
        }));

        listeners.notify(&batch("k", StorageChange::removed(json!("gone"))));
        assert_eq!(listeners.len(), 2);
    }
}
