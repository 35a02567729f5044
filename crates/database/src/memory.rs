//! In-memory database preserving insertion order.

use crate::{Database, EagerLoader, Entry, Error, Loader, Result};
use std::sync::Arc;

/// An ordered in-RAM [`Database`].
///
/// The backing store is a plain `Vec` of pairs, so enumeration order is
/// insertion order by construction and duplicate keys coexist naturally.
/// Values are materialized eagerly; `entries` hands out [`EagerLoader`]
/// wrappers to honor the lazy contract.
#[derive(Debug)]
pub struct MemoryDatabase<K, V> {
    items: Vec<(K, V)>,
    disposed: bool,
}

impl<K, V> MemoryDatabase<K, V> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            disposed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        Ok(())
    }
}

impl<K, V> Default for MemoryDatabase<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Database<K, V> for MemoryDatabase<K, V>
where
    K: PartialEq + Clone + Send,
    V: Clone + Send + Sync + 'static,
{
    fn insert_range(&mut self, items: Vec<(K, V)>) -> Result<()> {
        self.check()?;
        self.items.extend(items);
        Ok(())
    }

    fn try_get(&self, key: &K) -> Result<Option<V>> {
        self.check()?;
        Ok(self
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn get_all(&self, key: &K) -> Result<Vec<Loader<V>>> {
        self.check()?;
        Ok(self
            .items
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| Arc::new(EagerLoader::new(v.clone())) as Loader<V>)
            .collect())
    }

    fn entries(&self) -> Result<Vec<Entry<K, V>>> {
        self.check()?;
        Ok(self
            .items
            .iter()
            .map(|(k, v)| {
                Entry::new(
                    k.clone(),
                    Arc::new(EagerLoader::new(v.clone())) as Loader<V>,
                )
            })
            .collect())
    }

    fn dispose(&mut self) -> Result<()> {
        self.items.clear();
        self.disposed = true;
        Ok(())
    }
}
