//! Item access for stores holding a keyed collection.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::observable::Subscription;
use crate::store::{RoutedStore, SyncStore};
use crate::Result;

/// A value made of named items.
pub trait Lookup {
    /// Type of a single item.
    type Item: Clone;

    /// The item called `name`, if present.
    fn item(&self, name: &str) -> Option<&Self::Item>;

    /// Insert or replace the item called `name`.
    fn set_item(&mut self, name: &str, item: Self::Item);
}

impl<V: Clone> Lookup for BTreeMap<String, V> {
    type Item = V;

    fn item(&self, name: &str) -> Option<&V> {
        self.get(name)
    }

    fn set_item(&mut self, name: &str, item: V) {
        self.insert(name.to_string(), item);
    }
}

impl<V: Clone> Lookup for HashMap<String, V> {
    type Item = V;

    fn item(&self, name: &str) -> Option<&V> {
        self.get(name)
    }

    fn set_item(&mut self, name: &str, item: V) {
        self.insert(name.to_string(), item);
    }
}

impl Lookup for Map<String, Value> {
    type Item = Value;

    fn item(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn set_item(&mut self, name: &str, item: Value) {
        self.insert(name.to_string(), item);
    }
}

/// A store extended with [`get_item`](LookupStore::get_item) and
/// [`set_item`](LookupStore::set_item).
///
/// Implements [`SyncStore`] and [`RoutedStore`] by delegating to the wrapped
/// store, so it can stand in anywhere the plain store is used.
pub struct LookupStore<S> {
    inner: S,
}

/// Add item access to any store whose value is a [`Lookup`].
///
/// ```
/// use std::rc::Rc;
/// use serde_json::{json, Map, Value};
/// use storesync::{with_lookup, MemoryBackend, StorageArea, SyncedStore};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let backend = Rc::new(MemoryBackend::new(StorageArea::Local));
/// let mut defaults = Map::new();
/// defaults.insert("a".into(), json!(1));
/// defaults.insert("b".into(), json!(false));
///
/// let prefs = with_lookup(SyncedStore::new("prefs", defaults, backend, true));
/// prefs.set_item("b", json!(true)).await.unwrap();
/// assert_eq!(prefs.get_item("b").await.unwrap(), Some(json!(true)));
/// assert_eq!(prefs.get_item("a").await.unwrap(), Some(json!(1)));
/// # });
/// ```
pub fn with_lookup<S>(store: S) -> LookupStore<S>
where
    S: SyncStore,
    S::Value: Lookup,
{
    LookupStore { inner: store }
}

impl<S> LookupStore<S>
where
    S: SyncStore,
    S::Value: Lookup,
{
    /// Ensure readiness, then return a copy of the item called `name`.
    pub async fn get_item(&self, name: &str) -> Result<Option<<S::Value as Lookup>::Item>> {
        let value = self.inner.get().await?;
        Ok(value.item(name).cloned())
    }

    /// Ensure readiness, then set the item called `name` through the
    /// wrapped store's `set`.
    pub async fn set_item(&self, name: &str, item: <S::Value as Lookup>::Item) -> Result<()> {
        self.inner.ready().await?;
        let mut value = self.inner.get_current();
        value.set_item(name, item);
        self.inner.set(value).await
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the store.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait(?Send)]
impl<S> SyncStore for LookupStore<S>
where
    S: SyncStore,
    S::Value: Lookup,
{
    type Value = S::Value;

    fn key(&self) -> &str {
        self.inner.key()
    }

    fn sync_from_external(&self) -> bool {
        self.inner.sync_from_external()
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    async fn ready(&self) -> Result<()> {
        self.inner.ready().await
    }

    fn get_current(&self) -> S::Value {
        self.inner.get_current()
    }

    async fn set(&self, value: S::Value) -> Result<()> {
        self.inner.set(value).await
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }

    async fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&S::Value) + 'static,
    {
        self.inner.subscribe(handler).await
    }
}

impl<S: RoutedStore> RoutedStore for LookupStore<S> {
    fn route_key(&self) -> &str {
        self.inner.route_key()
    }

    fn accepts_external(&self) -> bool {
        self.inner.accepts_external()
    }

    fn current_json(&self) -> Option<Value> {
        self.inner.current_json()
    }

    fn apply_external(&self, new_value: Option<Value>) -> Result<bool> {
        self.inner.apply_external(new_value)
    }
}
