//! Versioned keys and one-time migration of older versions.
//!
//! A versioned store keeps its value under `base ⧺ separator ⧺ version`.
//! On first access each registered [`Migration`] looks for a value under its
//! source key; a value found there is migrated, written under the current key,
//! and the old key is removed. Migrations run in registration order, so when
//! several old keys hold values the last one wins.

use core::fmt;
use core::marker::PhantomData;
use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::DEFAULT_SEPARATOR;
use crate::store::{SyncStore, SyncedStore};
use crate::{Result, StoreError};

/// Version number reserved for values stored before any versioning scheme.
pub const UNVERSIONED: i32 = -1;

/// The version a [`Migration`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationSource {
    /// The plain base key, from before the value was versioned.
    Unversioned,
    /// A previous version.
    Version(i32),
}

impl From<i32> for MigrationSource {
    /// [`UNVERSIONED`] maps to [`MigrationSource::Unversioned`].
    fn from(version: i32) -> Self {
        if version == UNVERSIONED {
            Self::Unversioned
        } else {
            Self::Version(version)
        }
    }
}

impl fmt::Display for MigrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unversioned => f.write_str("unversioned"),
            Self::Version(v) => write!(f, "v{v}"),
        }
    }
}

/// Error returned by a migration function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MigrationError {
    /// The old value does not have the expected shape.
    #[error("cannot decode old value: {0}")]
    Decode(String),
    /// The migration rejected the old value.
    #[error("{0}")]
    Failed(String),
}

/// Converts a value stored under an older version into the current type.
///
/// Migrations must be pure: the result may only depend on the old value.
pub trait Migration<T> {
    /// Version this migration reads from.
    fn source(&self) -> MigrationSource;
    /// Produce the current value from the old one.
    fn migrate(&self, old: Value) -> Result<T, MigrationError>;
}

struct FnMigration<O, F> {
    source: MigrationSource,
    f: F,
    _old: PhantomData<fn(O)>,
}

impl<O, T, F> Migration<T> for FnMigration<O, F>
where
    O: DeserializeOwned,
    F: Fn(O) -> T,
{
    fn source(&self) -> MigrationSource {
        self.source
    }

    fn migrate(&self, old: Value) -> Result<T, MigrationError> {
        let old: O =
            serde_json::from_value(old).map_err(|e| MigrationError::Decode(e.to_string()))?;
        Ok((self.f)(old))
    }
}

/// Build a migration from a function over the decoded old value.
///
/// ```
/// use storesync::{migration, Migration, MigrationSource};
///
/// let m = migration(0, |old: i64| format!("x{old}"));
/// assert_eq!(m.source(), MigrationSource::Version(0));
/// assert_eq!(m.migrate(serde_json::json!(64)).unwrap(), "x64");
/// ```
pub fn migration<O, T, F>(source: impl Into<MigrationSource>, f: F) -> Box<dyn Migration<T>>
where
    O: DeserializeOwned + 'static,
    T: 'static,
    F: Fn(O) -> T + 'static,
{
    Box::new(FnMigration {
        source: source.into(),
        f,
        _old: PhantomData,
    })
}

/// Versioning options for a store.
///
/// Rejected at construction with [`StoreError::Configuration`] when:
/// - the version is [`UNVERSIONED`];
/// - the separator is empty or ends with an ASCII digit;
/// - a migration reads from the current version, or uses
///   `MigrationSource::Version(UNVERSIONED)` instead of
///   [`MigrationSource::Unversioned`];
/// - two migrations read from the same source.
pub struct VersionOptions<T> {
    version: i32,
    separator: Option<String>,
    migrations: Vec<Box<dyn Migration<T>>>,
}

impl<T: 'static> VersionOptions<T> {
    /// Options for `version`, with the default separator and no migrations.
    pub fn new(version: i32) -> Self {
        Self {
            version,
            separator: None,
            migrations: Vec::new(),
        }
    }

    /// Set the separator placed between the base key and the version.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// Append a migration. Migrations run in the order they are added.
    pub fn migrate(mut self, migration: Box<dyn Migration<T>>) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Append a migration built from a function, see [`migration`].
    pub fn migrate_from<O, F>(self, source: impl Into<MigrationSource>, f: F) -> Self
    where
        O: DeserializeOwned + 'static,
        F: Fn(O) -> T + 'static,
    {
        self.migrate(migration(source, f))
    }

    /// The current version.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub(crate) fn has_separator(&self) -> bool {
        self.separator.is_some()
    }
}

/// Validated versioning state, dropped once a readiness pull has run it.
pub(crate) struct MigrationPlan<T> {
    base_key: String,
    separator: String,
    version: i32,
    migrations: Vec<Box<dyn Migration<T>>>,
}

impl<T> MigrationPlan<T> {
    pub(crate) fn new(base_key: String, options: VersionOptions<T>) -> Result<Self> {
        let separator = options
            .separator
            .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string());

        if options.version == UNVERSIONED {
            return Err(invalid(format!(
                "`{base_key}`: version {UNVERSIONED} is reserved for unversioned values"
            )));
        }
        if separator.is_empty() {
            return Err(invalid(format!("`{base_key}`: separator must not be empty")));
        }
        if separator.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid(format!(
                "`{base_key}`: separator `{separator}` must not end with a digit"
            )));
        }

        let mut seen = HashSet::new();
        for m in &options.migrations {
            let source = m.source();
            match source {
                MigrationSource::Version(UNVERSIONED) => {
                    return Err(invalid(format!(
                        "`{base_key}`: use MigrationSource::Unversioned instead of version {UNVERSIONED}"
                    )));
                }
                MigrationSource::Version(v) if v == options.version => {
                    return Err(invalid(format!(
                        "`{base_key}`: cannot migrate from the current version {v}"
                    )));
                }
                _ => {}
            }
            if !seen.insert(source) {
                return Err(invalid(format!(
                    "`{base_key}`: more than one migration from {source}"
                )));
            }
        }

        Ok(Self {
            base_key,
            separator,
            version: options.version,
            migrations: options.migrations,
        })
    }

    pub(crate) fn effective_key(&self) -> String {
        versioned_key(&self.base_key, &self.separator, self.version)
    }

    fn source_key(&self, source: MigrationSource) -> String {
        match source {
            MigrationSource::Unversioned => self.base_key.clone(),
            MigrationSource::Version(v) => versioned_key(&self.base_key, &self.separator, v),
        }
    }
}

impl<T> MigrationPlan<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    /// Migrate every populated source key into `store`.
    ///
    /// A failing strategy leaves its old key in place and does not stop the
    /// remaining ones; the first failure is returned.
    pub(crate) async fn run(&self, store: &SyncedStore<T>) -> Result<()> {
        let backend = store.backend();
        let mut first_error: Option<StoreError> = None;

        for m in &self.migrations {
            let source = m.source();
            let old_key = self.source_key(source);

            let old = match backend.get(&old_key).await {
                Ok(Some(old)) => old,
                Ok(None) => {
                    log::debug!("no `{old_key}` to migrate into `{}`", store.key());
                    continue;
                }
                Err(e) => {
                    log::warn!("reading `{old_key}` for migration failed: {e}");
                    first_error.get_or_insert(e.into());
                    continue;
                }
            };

            let value = match m.migrate(old) {
                Ok(value) => value,
                Err(e) => {
                    first_error.get_or_insert(StoreError::Migration {
                        key: store.key().to_string(),
                        from: source,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = store.set(value).await {
                first_error.get_or_insert(e);
                continue;
            }
            if let Err(e) = backend.remove(&old_key).await {
                first_error.get_or_insert(e.into());
                continue;
            }
            log::debug!("migrated `{old_key}` into `{}`", store.key());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn invalid(msg: String) -> StoreError {
    StoreError::Configuration(msg)
}

/// `base ⧺ separator ⧺ version`.
pub fn versioned_key(base_key: &str, separator: &str, version: i32) -> String {
    format!("{base_key}{separator}{version}")
}
