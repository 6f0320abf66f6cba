use async_trait::async_trait;
use serde_json::Value;

use crate::{BackendError, ChangeListener, ListenerId, StorageArea};

/// Uniform key-value contract every persistence medium implements.
///
/// Values are JSON values; text-oriented backends persist their serialized
/// form. Missing keys are reported as `Ok(None)`, never as an error.
///
/// Backends perform no retries: host failures surface to the caller.
/// Scheduling is single-threaded and cooperative, so the futures are not
/// required to be `Send`.
#[async_trait(?Send)]
pub trait StorageBackend {
    /// The storage area this backend instance is bound to.
    fn area(&self) -> StorageArea;

    /// Retrieve the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;

    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError>;

    /// Delete `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), BackendError>;

    /// Delete every key of the area.
    async fn clear(&self) -> Result<(), BackendError>;

    /// List every key of the area.
    async fn keys(&self) -> Result<Vec<String>, BackendError>;

    /// Check if `key` holds a value.
    async fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Register a listener for every change of the area, including changes
    /// made through this instance.
    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId;

    /// Unregister a listener. Returns whether it was registered.
    fn remove_change_listener(&self, id: ListenerId) -> bool;

    /// Detach all listeners and free host resources. Idempotent.
    fn release(&self);
}
