//! Binds one backend to the stores created on it and routes external
//! changes to them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde::{de::DeserializeOwned, Serialize};
use storesync_backend::{
    ChangeBatch, ListenerId, MemoryBackend, StorageArea, StorageBackend,
};

use crate::config::RegistryConfig;
use crate::store::{RoutedStore, SyncedStore};
use crate::versioned::VersionOptions;
use crate::{Result, StoreError};

type Routes = RefCell<HashMap<String, Rc<dyn RoutedStore>>>;

/// Owns a backend and every store created on it.
///
/// The registry is the only listener it registers on the backend. Each
/// change batch is routed by key to the store registered under that key,
/// which applies the new value without writing it back. A change is skipped
/// when:
/// - no store is registered for the key;
/// - the store opted out of external changes;
/// - with [`RegistryConfig::stale_guard`], the reported old value differs from
///   the store's cached value. This filters echoes of the store's own writes
///   and notifications overtaken by a newer local write; it can also drop a
///   concurrent external write that races a local one.
///
/// Failures while applying a change are logged, since there is no caller to
/// report them to.
///
/// # Example
///
/// ```
/// use storesync::{Registry, SyncStore};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let registry = Registry::new();
/// let count = registry.create_sync_store("count", 1, true);
///
/// for _ in 0..3 {
///     count.set(count.get().await.unwrap() + 1).await.unwrap();
/// }
/// assert_eq!(count.get().await.unwrap(), 4);
/// # });
/// ```
pub struct Registry {
    backend: Rc<dyn StorageBackend>,
    routes: Rc<Routes>,
    listener: Cell<Option<ListenerId>>,
    config: RegistryConfig,
}

/// Builder for a [`Registry`] with custom configuration.
#[derive(Default)]
pub struct RegistryBuilder {
    backend: Option<Rc<dyn StorageBackend>>,
    config: RegistryConfig,
}

impl RegistryBuilder {
    /// Use `backend` instead of an in-memory area.
    pub fn backend<B: StorageBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Rc::new(backend));
        self
    }

    /// Use a backend shared with other owners.
    pub fn shared_backend(mut self, backend: Rc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable the stale-change comparison.
    pub fn stale_guard(mut self, enabled: bool) -> Self {
        self.config.stale_guard = enabled;
        self
    }

    /// Separator for versioned stores that do not set one.
    pub fn default_separator(mut self, separator: impl Into<String>) -> Self {
        self.config.default_separator = separator.into();
        self
    }

    /// Area of the in-memory backend built when none is given.
    pub fn area(mut self, area: StorageArea) -> Self {
        self.config.area = area;
        self
    }

    /// Build the registry.
    pub fn build(self) -> Registry {
        let area = self.config.area;
        let backend = self
            .backend
            .unwrap_or_else(|| Rc::new(MemoryBackend::new(area)));
        Registry::from_parts(backend, self.config)
    }
}

impl Registry {
    /// Create a registry over an in-memory [`StorageArea::Local`] area.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a registry over `backend` with default configuration.
    pub fn with_backend<B: StorageBackend + 'static>(backend: B) -> Self {
        Self::builder().backend(backend).build()
    }

    /// Create a builder for advanced configuration.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    fn from_parts(backend: Rc<dyn StorageBackend>, config: RegistryConfig) -> Self {
        let routes: Rc<Routes> = Rc::new(RefCell::new(HashMap::new()));
        let weak: Weak<Routes> = Rc::downgrade(&routes);
        let stale_guard = config.stale_guard;
        let id = backend.add_change_listener(Rc::new(move |batch: &ChangeBatch| {
            if let Some(routes) = weak.upgrade() {
                dispatch(&routes, batch, stale_guard);
            }
        }));
        Self {
            backend,
            routes,
            listener: Cell::new(Some(id)),
            config,
        }
    }

    /// The backend shared by every store of this registry.
    pub fn backend(&self) -> Rc<dyn StorageBackend> {
        Rc::clone(&self.backend)
    }

    /// The configuration in effect.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create and register a store for `key`.
    pub fn create_sync_store<T>(
        &self,
        key: impl Into<String>,
        default_value: T,
        sync_from_external: bool,
    ) -> Rc<SyncedStore<T>>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
    {
        let store = Rc::new(SyncedStore::new(
            key,
            default_value,
            self.backend(),
            sync_from_external,
        ));
        self.register(store.clone());
        store
    }

    /// Create and register a versioned store, keyed by its effective key.
    ///
    /// Options without a separator use [`RegistryConfig::default_separator`].
    pub fn create_versioned_store<T>(
        &self,
        base_key: impl Into<String>,
        default_value: T,
        sync_from_external: bool,
        options: VersionOptions<T>,
    ) -> Result<Rc<SyncedStore<T>>>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
    {
        let options = if options.has_separator() {
            options
        } else {
            options.separator(self.config.default_separator.clone())
        };
        let store = Rc::new(SyncedStore::versioned(
            base_key,
            default_value,
            self.backend(),
            sync_from_external,
            options,
        )?);
        self.register(store.clone());
        Ok(store)
    }

    /// Register a store built by `factory` from this registry's backend.
    ///
    /// The store is routed under its [`RoutedStore::route_key`].
    pub fn create_custom_store<S, F>(&self, factory: F) -> Rc<S>
    where
        S: RoutedStore + 'static,
        F: FnOnce(Rc<dyn StorageBackend>) -> S,
    {
        let store = Rc::new(factory(self.backend()));
        self.register(store.clone());
        store
    }

    fn register(&self, store: Rc<dyn RoutedStore>) {
        let key = store.route_key().to_string();
        if self.routes.borrow_mut().insert(key.clone(), store).is_some() {
            log::warn!("store `{key}` replaced an earlier store with the same key");
        }
    }

    /// Whether a store is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.routes.borrow().contains_key(key)
    }

    /// Keys of every registered store, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered stores.
    pub fn len(&self) -> usize {
        self.routes.borrow().len()
    }

    /// Returns `true` if no store is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registered key from the backend and forget the stores.
    ///
    /// Teardown utility for tests. Every key is attempted; the first backend
    /// failure is returned.
    pub async fn clear_all(&self) -> Result<()> {
        let keys: Vec<String> = self.routes.borrow_mut().drain().map(|(key, _)| key).collect();
        let mut first_error: Option<StoreError> = None;
        for key in keys {
            if let Err(e) = self.backend.remove(&key).await {
                log::warn!("clearing `{key}` failed: {e}");
                first_error.get_or_insert(e.into());
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop routing backend changes. Idempotent; also done on drop.
    pub fn release(&self) {
        if let Some(id) = self.listener.take() {
            self.backend.remove_change_listener(id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.release();
    }
}

/// Route each change of `batch` to the store registered under its key.
fn dispatch(routes: &Routes, batch: &ChangeBatch, stale_guard: bool) {
    for (key, change) in batch {
        let Some(store) = routes.borrow().get(key).cloned() else {
            log::trace!("no store for changed key `{key}`");
            continue;
        };
        if !store.accepts_external() {
            log::debug!("store `{key}` ignores external changes");
            continue;
        }
        if stale_guard {
            if let Some(old_value) = &change.old_value {
                if store.current_json().as_ref() != Some(old_value) {
                    log::debug!("skipping stale change for `{key}`");
                    continue;
                }
            }
        }
        match store.apply_external(change.new_value.clone()) {
            Ok(true) => log::debug!("applied external change to `{key}`"),
            Ok(false) => {}
            Err(e) => log::warn!("cannot apply external change to `{key}`: {e}"),
        }
    }
}
