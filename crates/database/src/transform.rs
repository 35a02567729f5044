//! Typed-transform layer: converts keys and values on the way through.

use crate::{Database, Entry, LazyLoader, Loader, Result};
use std::sync::Arc;

/// A first-class pre/post conversion pair.
///
/// `pre` maps an outer value inward (for arguments), `post` maps an inner
/// value outward (for results). Transformers clone cheaply; both directions
/// are shared behind `Arc`.
pub struct Transformer<Outer, Inner> {
    pre: Arc<dyn Fn(&Outer) -> Inner + Send + Sync>,
    post: Arc<dyn Fn(Inner) -> Outer + Send + Sync>,
}

impl<Outer, Inner> Transformer<Outer, Inner> {
    pub fn new(
        pre: impl Fn(&Outer) -> Inner + Send + Sync + 'static,
        post: impl Fn(Inner) -> Outer + Send + Sync + 'static,
    ) -> Self {
        Self {
            pre: Arc::new(pre),
            post: Arc::new(post),
        }
    }

    pub fn pre(&self, outer: &Outer) -> Inner {
        (self.pre)(outer)
    }

    pub fn post(&self, inner: Inner) -> Outer {
        (self.post)(inner)
    }
}

impl<Outer, Inner> Clone for Transformer<Outer, Inner> {
    fn clone(&self) -> Self {
        Self {
            pre: self.pre.clone(),
            post: self.post.clone(),
        }
    }
}

/// Wraps an inner loader so `load` applies the value `post` conversion.
struct TransformLoader<Vo, Vi> {
    inner: Loader<Vi>,
    values: Transformer<Vo, Vi>,
}

impl<Vo, Vi> LazyLoader<Vo> for TransformLoader<Vo, Vi>
where
    Vo: Send + Sync + 'static,
    Vi: Send + Sync + 'static,
{
    fn load(&self) -> Result<Vo> {
        Ok(self.values.post(self.inner.load()?))
    }

    fn value_offset(&self) -> Option<u64> {
        self.inner.value_offset()
    }
}

/// A [`Database`] over outer types `(Ko, Vo)` backed by an inner database
/// over `(Ki, Vi)`.
///
/// Every operation converts arguments inbound with `pre` and results
/// outbound with `post`; enumeration re-wraps each loader so its `load`
/// converts the inner result on demand.
pub struct TransformDatabase<Ko, Vo, Ki, Vi, D> {
    inner: D,
    keys: Transformer<Ko, Ki>,
    values: Transformer<Vo, Vi>,
    dispose_inner: bool,
}

impl<Ko, Vo, Ki, Vi, D> TransformDatabase<Ko, Vo, Ki, Vi, D>
where
    D: Database<Ki, Vi>,
{
    /// Wraps `inner`, leaving it alive when this layer is disposed.
    pub fn new(inner: D, keys: Transformer<Ko, Ki>, values: Transformer<Vo, Vi>) -> Self {
        Self {
            inner,
            keys,
            values,
            dispose_inner: false,
        }
    }

    /// Wraps `inner` and disposes it when this layer is disposed.
    pub fn owning(inner: D, keys: Transformer<Ko, Ki>, values: Transformer<Vo, Vi>) -> Self {
        Self {
            inner,
            keys,
            values,
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

impl<Ko, Vo, Ki, Vi, D> Database<Ko, Vo> for TransformDatabase<Ko, Vo, Ki, Vi, D>
where
    D: Database<Ki, Vi>,
    Ko: Send + 'static,
    Vo: Send + Sync + 'static,
    Ki: Send + 'static,
    Vi: Send + Sync + 'static,
{
    fn insert_range(&mut self, items: Vec<(Ko, Vo)>) -> Result<()> {
        let mapped = items
            .into_iter()
            .map(|(k, v)| (self.keys.pre(&k), self.values.pre(&v)))
            .collect();
        self.inner.insert_range(mapped)
    }

    fn try_get(&self, key: &Ko) -> Result<Option<Vo>> {
        Ok(self
            .inner
            .try_get(&self.keys.pre(key))?
            .map(|v| self.values.post(v)))
    }

    fn get_all(&self, key: &Ko) -> Result<Vec<Loader<Vo>>> {
        Ok(self
            .inner
            .get_all(&self.keys.pre(key))?
            .into_iter()
            .map(|inner| {
                Arc::new(TransformLoader {
                    inner,
                    values: self.values.clone(),
                }) as Loader<Vo>
            })
            .collect())
    }

    fn entries(&self) -> Result<Vec<Entry<Ko, Vo>>> {
        Ok(self
            .inner
            .entries()?
            .into_iter()
            .map(|entry| {
                Entry::new(
                    self.keys.post(entry.key),
                    Arc::new(TransformLoader {
                        inner: entry.value,
                        values: self.values.clone(),
                    }) as Loader<Vo>,
                )
            })
            .collect())
    }

    fn dispose(&mut self) -> Result<()> {
        if self.dispose_inner {
            self.inner.dispose()
        } else {
            Ok(())
        }
    }
}
