//! Bounded caches for segment indexes and decompressed chunks
//!
//! Misses are loaded outside the cache, so two readers racing on the same
//! key may both load it; the later insert wins. Values are pure functions of
//! their keys, so the duplicate work is harmless and unrelated keys never
//! wait on each other.

use std::hash::Hash;
use std::sync::Arc;

use moka::sync::Cache;

/// Concurrent size-bounded cache of shared values
/// Uses Arc to avoid cloning large data buffers
pub(crate) struct BoundedCache<K, V> {
    inner: Cache<K, Arc<V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_entries.max(1)).build(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.inner.insert(key, Arc::clone(&value));
        value
    }

    /// Cached value, or the result of `load` (cached on success)
    pub fn get_or_load<E>(&self, key: K, load: impl FnOnce() -> Result<V, E>) -> Result<Arc<V>, E> {
        if let Some(hit) = self.inner.get(&key) {
            return Ok(hit);
        }
        let value = load()?;
        Ok(self.insert(key, value))
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}
