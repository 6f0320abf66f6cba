//! Synchronized stores: one storage key, cached in memory, observable.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use storesync_backend::StorageBackend;
use tokio::sync::Notify;

use crate::observable::{Observable, Subscription};
use crate::versioned::{MigrationPlan, VersionOptions};
use crate::{Result, StoreError};

/// Read/write/subscribe contract shared by every store implementation.
#[async_trait(?Send)]
pub trait SyncStore {
    /// Type of the stored value.
    type Value: Clone + 'static;

    /// Effective storage key.
    fn key(&self) -> &str;

    /// Whether externally-sourced changes are applied to this store.
    fn sync_from_external(&self) -> bool;

    /// Whether the readiness pull has completed.
    fn is_ready(&self) -> bool;

    /// Run the one-time readiness pull. No-op once ready.
    async fn ready(&self) -> Result<()>;

    /// Ensure readiness, then return the cached value.
    async fn get(&self) -> Result<Self::Value> {
        self.ready().await?;
        Ok(self.get_current())
    }

    /// The cached value, without forcing readiness.
    fn get_current(&self) -> Self::Value;

    /// Update the cache, notify subscribers, then write to the backend.
    async fn set(&self, value: Self::Value) -> Result<()>;

    /// Set the default value.
    async fn reset(&self) -> Result<()>;

    /// Deliver the current value once readiness completes, then every change.
    async fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Self::Value) + 'static;
}

/// The type-erased face of a store that a [`Registry`](crate::Registry)
/// routes external changes to.
pub trait RoutedStore {
    /// Key the store is registered and dispatched under.
    fn route_key(&self) -> &str;

    /// Whether the store opted into external changes.
    fn accepts_external(&self) -> bool;

    /// The cached value in stored form, for the stale-change comparison.
    fn current_json(&self) -> Option<Value>;

    /// Apply a value confirmed by the backend without writing it back.
    ///
    /// `None` means the key was removed. Returns whether the cache changed.
    fn apply_external(&self, new_value: Option<Value>) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Pulling,
    Ready,
}

/// A store bound to one backend key.
///
/// The value is pulled from the backend lazily, on the first [`get`],
/// [`ready`] or [`subscribe`]. When the backend holds nothing the default
/// value is written to seed it.
///
/// [`set`] applies to the cache and notifies subscribers before the backend
/// write is issued. A failed write is reported to the caller but the cache
/// keeps the new value; the caller decides whether to retry or revert.
///
/// Versioned stores (see [`VersionOptions`]) additionally run their
/// migrations once, inside the first readiness pull.
///
/// [`get`]: SyncStore::get
/// [`ready`]: SyncStore::ready
/// [`subscribe`]: SyncStore::subscribe
/// [`set`]: SyncStore::set
pub struct SyncedStore<T> {
    key: String,
    default_value: T,
    sync_from_external: bool,
    backend: Rc<dyn StorageBackend>,
    state: Observable<T>,
    phase: Cell<Phase>,
    pulled: Notify,
    migrations: RefCell<Option<Rc<MigrationPlan<T>>>>,
}

impl<T> SyncedStore<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    /// Create a store for `key` on `backend`.
    pub fn new(
        key: impl Into<String>,
        default_value: T,
        backend: Rc<dyn StorageBackend>,
        sync_from_external: bool,
    ) -> Self {
        Self {
            key: key.into(),
            state: Observable::new(default_value.clone()),
            default_value,
            sync_from_external,
            backend,
            phase: Cell::new(Phase::Uninitialized),
            pulled: Notify::new(),
            migrations: RefCell::new(None),
        }
    }

    /// Create a store whose effective key is `base_key`, the separator and
    /// the version, migrating older versions on first access.
    ///
    /// Options are validated here; see [`VersionOptions`] for the rules.
    pub fn versioned(
        base_key: impl Into<String>,
        default_value: T,
        backend: Rc<dyn StorageBackend>,
        sync_from_external: bool,
        options: VersionOptions<T>,
    ) -> Result<Self> {
        let plan = MigrationPlan::new(base_key.into(), options)?;
        let store = Self::new(
            plan.effective_key(),
            default_value,
            backend,
            sync_from_external,
        );
        *store.migrations.borrow_mut() = Some(Rc::new(plan));
        Ok(store)
    }

    /// The value used when the backend holds nothing, and by `reset`.
    pub fn default_value(&self) -> &T {
        &self.default_value
    }

    /// The backend this store reads and writes.
    pub fn backend(&self) -> &Rc<dyn StorageBackend> {
        &self.backend
    }

    pub(crate) fn encode(&self, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(|e| StoreError::Encode {
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, raw: Value) -> Result<T> {
        serde_json::from_value(raw).map_err(|e| StoreError::Decode {
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }

    /// Replace the cached value, notifying subscribers only on change.
    fn adopt(&self, value: T) -> bool {
        if self.state.with(|current| *current == value) {
            return false;
        }
        self.state.set(value);
        true
    }

    async fn pull(&self) -> Result<()> {
        // Cleared only after a complete run; an abandoned pull retries it.
        let plan = self.migrations.borrow().clone();
        let migrated = match plan {
            Some(plan) => {
                let outcome = plan.run(self).await;
                self.migrations.borrow_mut().take();
                outcome
            }
            None => Ok(()),
        };

        let pulled = match self.backend.get(&self.key).await {
            Ok(Some(raw)) => self.decode(raw).map(|value| {
                log::debug!("store `{}` adopted backend value", self.key);
                self.adopt(value);
            }),
            Ok(None) => {
                log::debug!("store `{}` seeding backend with default", self.key);
                match self.encode(&self.default_value) {
                    Ok(raw) => self.backend.set(&self.key, raw).await.map_err(Into::into),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                log::warn!("store `{}` keeps its default, backend read failed: {e}", self.key);
                Err(e.into())
            }
        };

        migrated.and(pulled)
    }
}

/// Resets the phase if a pull is abandoned before completing.
struct PullGuard<'a> {
    phase: &'a Cell<Phase>,
    pulled: &'a Notify,
}

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        if self.phase.get() == Phase::Pulling {
            self.phase.set(Phase::Uninitialized);
        }
        self.pulled.notify_waiters();
    }
}

#[async_trait(?Send)]
impl<T> SyncStore for SyncedStore<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    type Value = T;

    fn key(&self) -> &str {
        &self.key
    }

    fn sync_from_external(&self) -> bool {
        self.sync_from_external
    }

    fn is_ready(&self) -> bool {
        self.phase.get() == Phase::Ready
    }

    /// Pull the value from the backend, once.
    ///
    /// Callers arriving while a pull is in flight wait for it instead of
    /// issuing a second backend read. The store becomes ready even when the
    /// pull fails; the failure is reported to the caller that ran the pull
    /// and the cache keeps the default value.
    async fn ready(&self) -> Result<()> {
        loop {
            match self.phase.get() {
                Phase::Ready => return Ok(()),
                Phase::Uninitialized => break,
                Phase::Pulling => {
                    let notified = self.pulled.notified();
                    if self.phase.get() == Phase::Pulling {
                        notified.await;
                    }
                }
            }
        }

        self.phase.set(Phase::Pulling);
        let _guard = PullGuard {
            phase: &self.phase,
            pulled: &self.pulled,
        };
        let outcome = self.pull().await;
        self.phase.set(Phase::Ready);
        outcome
    }

    fn get_current(&self) -> T {
        self.state.get()
    }

    async fn set(&self, value: T) -> Result<()> {
        let raw = self.encode(&value)?;
        self.state.set(value);
        self.backend.set(&self.key, raw).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.set(self.default_value.clone()).await
    }

    async fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        if let Err(e) = self.ready().await {
            log::warn!("subscribing to `{}` with cached value: {e}", self.key);
        }
        self.state.subscribe(handler)
    }
}

impl<T> RoutedStore for SyncedStore<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    fn route_key(&self) -> &str {
        &self.key
    }

    fn accepts_external(&self) -> bool {
        self.sync_from_external
    }

    fn current_json(&self) -> Option<Value> {
        self.state.with(|current| serde_json::to_value(current).ok())
    }

    fn apply_external(&self, new_value: Option<Value>) -> Result<bool> {
        let value = match new_value {
            Some(raw) => self.decode(raw)?,
            None => self.default_value.clone(),
        };
        let changed = self.adopt(value);
        if !changed {
            log::trace!("store `{}` already holds the external value", self.key);
        }
        Ok(changed)
    }
}

#[async_trait(?Send)]
impl<S: SyncStore> SyncStore for Rc<S> {
    type Value = S::Value;

    fn key(&self) -> &str {
        (**self).key()
    }

    fn sync_from_external(&self) -> bool {
        (**self).sync_from_external()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn ready(&self) -> Result<()> {
        (**self).ready().await
    }

    fn get_current(&self) -> S::Value {
        (**self).get_current()
    }

    async fn set(&self, value: S::Value) -> Result<()> {
        (**self).set(value).await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&S::Value) + 'static,
    {
        (**self).subscribe(handler).await
    }
}

impl<S: RoutedStore + ?Sized> RoutedStore for Rc<S> {
    fn route_key(&self) -> &str {
        (**self).route_key()
    }

    fn accepts_external(&self) -> bool {
        (**self).accepts_external()
    }

    fn current_json(&self) -> Option<Value> {
        (**self).current_json()
    }

    fn apply_external(&self, new_value: Option<Value>) -> Result<bool> {
        (**self).apply_external(new_value)
    }
}
