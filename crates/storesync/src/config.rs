//! Registry configuration.

use serde::{Deserialize, Serialize};
use storesync_backend::StorageArea;

/// Separator placed between a base key and its version.
pub const DEFAULT_SEPARATOR: &str = "_v";

/// Configuration for a [`Registry`](crate::Registry).
///
/// Can be loaded from any serde format; missing fields take their defaults.
///
/// ```
/// use storesync::RegistryConfig;
///
/// let config: RegistryConfig = serde_json::from_str(r#"{ "stale_guard": false }"#).unwrap();
/// assert!(!config.stale_guard);
/// assert_eq!(config.default_separator, "_v");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ignore an external change whose reported old value differs from the
    /// target store's cached value.
    pub stale_guard: bool,
    /// Separator for versioned stores that do not set one.
    pub default_separator: String,
    /// Area of the backend built by [`Registry::new`](crate::Registry::new).
    pub area: StorageArea,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_guard: true,
            default_separator: DEFAULT_SEPARATOR.to_string(),
            area: StorageArea::Local,
        }
    }
}
