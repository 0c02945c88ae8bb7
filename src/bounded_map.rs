//! A capacity-bounded, least-recently-used-evicting per-key store.
//!
//! `BoundedMap` is the leaf dependency of both [`crate::RateLimiter`] and
//! [`crate::RequestPacer`]: each owns one `BoundedMap` instance as its sole
//! source of per-key state, and each instance's mutex is the "single-writer
//! serialized interface" the concurrency contract asks for — every public
//! operation on the owning `RateLimiter`/`RequestPacer` takes this map's
//! lock for its full critical section and releases it before returning.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::error::ConfigError;

/// A mapping from key to per-key state with a capacity cap and
/// least-recently-used eviction on insert.
///
/// All operations are atomic with respect to concurrent callers — each
/// takes the internal mutex for its full duration.
pub struct BoundedMap<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Eq + Hash + Clone, V> BoundedMap<K, V> {
    /// Creates a new map bounded to `capacity` entries.
    ///
    /// Rejects `capacity == 0` with [`ConfigError::InvalidCacheSize`] —
    /// a zero-capacity cache can never hold a single key's state, which
    /// would make every operation a silent no-op.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(ConfigError::InvalidCacheSize)?;
        Ok(Self { inner: Mutex::new(LruCache::new(capacity)) })
    }

    /// Marks `key` as most-recently-used and returns a clone of its value,
    /// or `None` if absent.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut cache = self.inner.lock().unwrap();
        cache.get(key).cloned()
    }

    /// Inserts or updates `key`. If the map is at capacity, evicts the
    /// least-recently-used entry first.
    ///
    /// Tie-break policy: when multiple entries share the oldest access
    /// time, any one of them may be evicted — callers must not rely on
    /// the identity of the evicted entry.
    pub fn insert(&self, key: K, value: V) {
        let mut cache = self.inner.lock().unwrap();
        cache.put(key, value);
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock().unwrap();
        cache.pop(key)
    }

    /// Removes every entry for which `predicate` returns `false`.
    ///
    /// The traversal itself does not update access order — only the
    /// removals it performs change the map's contents.
    pub fn retain(&self, mut predicate: impl FnMut(&K, &V) -> bool) {
        let mut cache = self.inner.lock().unwrap();
        let stale: Vec<K> = cache
            .iter()
            .filter(|(k, v)| !predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether the map currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` against `key`'s value, inserting `default()` first if
    /// `key` is absent, and returns `f`'s result.
    ///
    /// This is the primitive the [`crate::RateLimiter`] and
    /// [`crate::RequestPacer`] decision algorithms are built on: it holds
    /// the map's lock across "load-or-synthesize, decide, persist" so that
    /// a single logical operation observes and mutates a consistent
    /// snapshot of one key's state, rather than racing a separate
    /// get/insert pair against concurrent callers.
    pub(crate) fn with_entry<R>(
        &self,
        key: &K,
        default: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut cache = self.inner.lock().unwrap();
        if !cache.contains(key) {
            cache.put(key.clone(), default());
        }
        let value = cache
            .get_mut(key)
            .expect("entry was just inserted if absent");
        f(value)
    }

    /// Runs `f` against `key`'s value if present, otherwise does nothing.
    ///
    /// Used for operations that must be silent no-ops on a missing key
    /// (`recordSuccess`/`recordFailure` in the spec) rather than implicitly
    /// creating state.
    pub(crate) fn update_if_present<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut V) -> R,
    ) -> Option<R> {
        let mut cache = self.inner.lock().unwrap();
        cache.get_mut(key).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            BoundedMap::<&str, u32>::new(0).unwrap_err(),
            ConfigError::InvalidCacheSize
        );
    }

    #[test]
    fn get_insert_remove_roundtrip() {
        let map: BoundedMap<&str, u32> = BoundedMap::new(4).unwrap();
        assert_eq!(map.get(&"a"), None);

        map.insert("a", 1);
        assert_eq!(map.get(&"a"), Some(1));
        assert_eq!(map.remove(&"a"), Some(1));
        assert_eq!(map.get(&"a"), None);
    }

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        let map: BoundedMap<&str, u32> = BoundedMap::new(2).unwrap();
        map.insert("k1", 1);
        map.insert("k2", 2);
        // Touch k1 so k2 becomes the least-recently-used entry.
        assert_eq!(map.get(&"k1"), Some(1));
        map.insert("k3", 3);

        assert_eq!(map.get(&"k2"), None);
        assert_eq!(map.get(&"k1"), Some(1));
        assert_eq!(map.get(&"k3"), Some(3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn retain_drops_entries_failing_predicate() {
        let map: BoundedMap<&str, u32> = BoundedMap::new(4).unwrap();
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);

        map.retain(|_, v| *v != 2);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"b"), None);
        assert_eq!(map.get(&"a"), Some(1));
        assert_eq!(map.get(&"c"), Some(3));
    }

    #[test]
    fn with_entry_synthesizes_default_once() {
        let map: BoundedMap<&str, u32> = BoundedMap::new(4).unwrap();
        let first = map.with_entry(&"a", || 10, |v| { *v += 1; *v });
        assert_eq!(first, 11);

        let second = map.with_entry(&"a", || 999, |v| { *v += 1; *v });
        assert_eq!(second, 12);
    }
}
