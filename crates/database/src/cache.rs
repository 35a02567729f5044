//! Loader-memoizing layer.

use crate::{Database, Entry, Error, LazyLoader, Loader, Result};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| Error::LockPoisoned(e.to_string()))
}

/// Memoizes its first `load`; later loads clone the stored value.
struct CachedLoader<V> {
    inner: Loader<V>,
    cell: Mutex<Option<V>>,
}

impl<V: Clone + Send + Sync> LazyLoader<V> for CachedLoader<V> {
    fn load(&self) -> Result<V> {
        let mut cell = lock(&self.cell)?;
        if let Some(v) = cell.as_ref() {
            return Ok(v.clone());
        }
        let v = self.inner.load()?;
        *cell = Some(v.clone());
        Ok(v)
    }

    fn value_offset(&self) -> Option<u64> {
        self.inner.value_offset()
    }
}

/// A layer that hands out stable, memoizing loader handles.
///
/// The cache is an ordered list keyed by position against the inner
/// database's enumeration order. Repeated enumerations yield the *same*
/// handle for a given position, so one underlying load suffices for the
/// lifetime of the cache no matter how often callers re-enumerate.
///
/// Inserts pass through unchanged and do not invalidate anything: new
/// positions are adopted lazily on the next enumeration. This assumes the
/// inner's enumeration order is stable and grows only at the tail, which
/// holds for the memory and file stores.
pub struct CacheDatabase<V, D> {
    inner: D,
    cache: Mutex<Vec<Loader<V>>>,
    disposed: bool,
    dispose_inner: bool,
}

impl<V, D> CacheDatabase<V, D> {
    /// Wraps `inner`, leaving it alive when this layer is disposed.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            cache: Mutex::new(Vec::new()),
            disposed: false,
            dispose_inner: false,
        }
    }

    /// Wraps `inner` and disposes it when this layer is disposed.
    pub fn owning(inner: D) -> Self {
        Self {
            dispose_inner: true,
            ..Self::new(inner)
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    fn check(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        Ok(())
    }
}

impl<K, V, D> Database<K, V> for CacheDatabase<V, D>
where
    D: Database<K, V>,
    K: PartialEq + Send,
    V: Clone + Send + Sync + 'static,
{
    fn insert_range(&mut self, items: Vec<(K, V)>) -> Result<()> {
        self.check()?;
        self.inner.insert_range(items)
    }

    fn try_get(&self, key: &K) -> Result<Option<V>> {
        for entry in self.entries()? {
            if entry.key == *key {
                return entry.load().map(Some);
            }
        }
        Ok(None)
    }

    fn get_all(&self, key: &K) -> Result<Vec<Loader<V>>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.key == *key)
            .map(|e| e.value)
            .collect())
    }

    fn entries(&self) -> Result<Vec<Entry<K, V>>> {
        self.check()?;
        let mut cache = lock(&self.cache)?;
        let inner_entries = self.inner.entries()?;
        let mut out = Vec::with_capacity(inner_entries.len());
        for (i, entry) in inner_entries.into_iter().enumerate() {
            if i >= cache.len() {
                cache.push(Arc::new(CachedLoader {
                    inner: entry.value,
                    cell: Mutex::new(None),
                }) as Loader<V>);
            }
            out.push(Entry::new(entry.key, cache[i].clone()));
        }
        Ok(out)
    }

    fn dispose(&mut self) -> Result<()> {
        if self.dispose_inner {
            self.inner.dispose()?;
        }
        lock(&self.cache)?.clear();
        self.disposed = true;
        Ok(())
    }
}
