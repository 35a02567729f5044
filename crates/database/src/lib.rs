//! # Database — the StringDB contract and its composable layers
//!
//! A [`Database`] is an append-only, insertion-ordered multimap. The same
//! contract is served by very different backing stores, and the layers in
//! this crate compose freely around any of them:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ReadOnlyDatabase   (rejects writes)          │
//! │ ┌──────────────────────────────────────────┐ │
//! │ │ CacheDatabase    (memoizes loaders)      │ │
//! │ │ ┌──────────────────────────────────────┐ │ │
//! │ │ │ TransformDatabase (type conversion)  │ │ │
//! │ │ │ ┌──────────────────────────────────┐ │ │ │
//! │ │ │ │ MemoryDatabase / FileDatabase    │ │ │ │
//! │ │ │ └──────────────────────────────────┘ │ │ │
//! │ │ └──────────────────────────────────────┘ │ │
//! │ └──────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Values travel as [`Loader`] handles: enumeration never materializes a
//! value, the seek-and-decode cost is paid inside [`LazyLoader::load`].

mod cache;
mod memory;
mod readonly;
mod transform;

pub use cache::CacheDatabase;
pub use memory::MemoryDatabase;
pub use readonly::ReadOnlyDatabase;
pub use transform::{TransformDatabase, Transformer};

use codec::CodecError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for database operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("write attempted on a read-only database")]
    ReadOnly,

    #[error("database has been disposed")]
    Disposed,

    #[error("replacement value must encode to {expected} payload bytes, got {actual}")]
    OverwriteSizeMismatch { expected: u64, actual: u64 },

    #[error("value is not backed by this store")]
    ForeignValue,

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A deferred handle for a single value.
///
/// Loaders are cheap to obtain from enumeration and may outlive their
/// enumerator, but not the database they came from: loading from a disposed
/// file store fails with [`Error::Disposed`].
pub trait LazyLoader<V>: Send + Sync {
    fn load(&self) -> Result<V>;

    /// Absolute offset of the backing value record, for stores that have
    /// one. Wrapping layers forward this unchanged so same-size overwrites
    /// work through a layer stack.
    fn value_offset(&self) -> Option<u64> {
        None
    }
}

/// Shared, cloneable loader handle.
pub type Loader<V> = Arc<dyn LazyLoader<V>>;

/// One enumerated pair: an eager key and a lazy value.
pub struct Entry<K, V> {
    pub key: K,
    pub value: Loader<V>,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: Loader<V>) -> Self {
        Self { key, value }
    }

    pub fn load(&self) -> Result<V> {
        self.value.load()
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &"<lazy>")
            .finish()
    }
}

/// A loader around an already-materialized value; `load` clones.
pub struct EagerLoader<V>(V);

impl<V> EagerLoader<V> {
    pub fn new(value: V) -> Self {
        Self(value)
    }
}

impl<V: Clone + Send + Sync> LazyLoader<V> for EagerLoader<V> {
    fn load(&self) -> Result<V> {
        Ok(self.0.clone())
    }
}

/// The uniform database contract.
///
/// Contract invariants, honored by every implementation in this workspace:
///
/// - enumeration order is insertion order, within and across batches;
/// - duplicate keys are permitted: `get` returns the first match in
///   enumeration order, `get_all` every match in enumeration order;
/// - `get` succeeds whenever `try_get` finds a match, even when the value
///   equals the type's default;
/// - `entries` yields keys eagerly but never materializes values.
pub trait Database<K, V>: Send {
    fn insert(&mut self, key: K, value: V) -> Result<()> {
        self.insert_range(vec![(key, value)])
    }

    /// Appends a batch. Batches are the atomicity granule of the file
    /// store, so callers that need all-or-nothing semantics use one call.
    fn insert_range(&mut self, items: Vec<(K, V)>) -> Result<()>;

    fn get(&self, key: &K) -> Result<V> {
        self.try_get(key)?.ok_or(Error::NotFound)
    }

    fn try_get(&self, key: &K) -> Result<Option<V>>;

    fn get_all(&self, key: &K) -> Result<Vec<Loader<V>>>;

    fn entries(&self) -> Result<Vec<Entry<K, V>>>;

    /// Flushes and releases the backing resources. Further operations fail
    /// with [`Error::Disposed`]. Wrappers leave their inner database alone
    /// unless constructed with `owning`.
    fn dispose(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eager_loader_clones_value() {
        let loader = EagerLoader::new("v".to_string());
        assert_eq!(loader.load().unwrap(), "v");
        assert_eq!(loader.load().unwrap(), "v");
        assert_eq!(loader.value_offset(), None);
    }

    #[test]
    fn entry_load_delegates_to_loader() {
        let entry = Entry::new("k", Arc::new(EagerLoader::new(7u32)) as Loader<u32>);
        assert_eq!(entry.load().unwrap(), 7);
        assert_eq!(format!("{:?}", entry), r#"Entry { key: "k", value: "<lazy>" }"#);
    }
}
