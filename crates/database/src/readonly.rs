//! Write-rejecting layer.

use crate::{Database, Entry, Error, Loader, Result};

/// Forwards every read to the inner database and fails every write with
/// [`Error::ReadOnly`]. Whether disposing the wrapper disposes the inner
/// database is fixed at construction.
pub struct ReadOnlyDatabase<D> {
    inner: D,
    dispose_inner: bool,
}

impl<D> ReadOnlyDatabase<D> {
    /// Wraps `inner`, leaving it alive when this layer is disposed.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            dispose_inner: false,
        }
    }

    /// Wraps `inner` and disposes it when this layer is disposed.
    pub fn owning(inner: D) -> Self {
        Self {
            inner,
            dispose_inner: true,
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<K, V, D> Database<K, V> for ReadOnlyDatabase<D>
where
    D: Database<K, V>,
{
    fn insert_range(&mut self, _items: Vec<(K, V)>) -> Result<()> {
        Err(Error::ReadOnly)
    }

    fn get(&self, key: &K) -> Result<V> {
        self.inner.get(key)
    }

    fn try_get(&self, key: &K) -> Result<Option<V>> {
        self.inner.try_get(key)
    }

    fn get_all(&self, key: &K) -> Result<Vec<Loader<V>>> {
        self.inner.get_all(key)
    }

    fn entries(&self) -> Result<Vec<Entry<K, V>>> {
        self.inner.entries()
    }

    fn dispose(&mut self) -> Result<()> {
        if self.dispose_inner {
            self.inner.dispose()
        } else {
            Ok(())
        }
    }
}
