//! CachedStore: memoizing decorator over any [`VersionedStore`]
//!
//! Results of `has`, `get` and `time` are remembered per
//! (operation, key, version-or-latest), including `NotFound` outcomes.
//! Other errors are never cached.
//!
//! Writes through the decorator keep the cache coherent:
//! - `put` records the new payload for both the explicit version and the
//!   latest alias, and drops the stale `time` entry for latest
//! - `rem` forgets everything known about the key
//!
//! A read that misses runs the backend call without holding the map lock.
//! Every write through the decorator bumps a generation counter, and a read
//! whose backend call overlapped a write returns its result without caching
//! it, so an old payload never replaces the one a `put` just recorded.
//!
//! Writes that bypass this instance (another process, another decorator)
//! are not observed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use kiwi_core::{Error, Result, Timestamp, Version, VersionedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Has,
    Get,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    op: Op,
    key: String,
    version: Option<Version>,
}

impl CacheKey {
    fn new(op: Op, key: &str, version: Option<Version>) -> Self {
        CacheKey {
            op,
            key: key.to_string(),
            version,
        }
    }
}

/// A remembered outcome; `None` payloads record `NotFound`
#[derive(Debug, Clone)]
enum Cached {
    Has(bool),
    Get(Option<Arc<[u8]>>),
    Time(Option<Timestamp>),
}

/// Cached outcomes plus the write generation they belong to
#[derive(Debug, Default)]
struct Entries {
    map: HashMap<CacheKey, Cached>,
    /// Bumped by every successful `put` and `rem`
    generation: u64,
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the cache
    pub hits: u64,
    /// Reads delegated to the wrapped store
    pub misses: u64,
    /// Entries currently held
    pub entries: usize,
}

/// Memoizing wrapper around a backend
///
/// The cache lives as long as this value; there is no process-wide state.
pub struct CachedStore<S> {
    inner: S,
    cache: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: VersionedStore> CachedStore<S> {
    /// Wrap `inner` with an empty cache
    pub fn new(inner: S) -> Self {
        CachedStore {
            inner,
            cache: Mutex::new(Entries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap, discarding the cache
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Forget every cached result
    pub fn clear(&self) {
        self.cache.lock().map.clear();
    }

    /// Current hit/miss counters and entry count
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.lock().map.len(),
        }
    }

    /// Look up `cache_key`, or compute it with `load` and remember the result
    ///
    /// The lock is not held across `load`, so a slow backend call does not
    /// block readers of other entries. The result is only remembered if no
    /// write went through this instance while `load` ran; otherwise it may
    /// predate that write and is returned uncached.
    fn memoize(&self, cache_key: CacheKey, load: impl FnOnce() -> Result<Cached>) -> Result<Cached> {
        let generation = {
            let entries = self.cache.lock();
            if let Some(hit) = entries.map.get(&cache_key).cloned() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(target: "kiwi::cache", op = ?cache_key.op, key = %cache_key.key, "hit");
                return Ok(hit);
            }
            entries.generation
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(target: "kiwi::cache", op = ?cache_key.op, key = %cache_key.key, "miss");
        let loaded = load()?;

        let mut entries = self.cache.lock();
        if entries.generation == generation {
            entries.map.insert(cache_key, loaded.clone());
        } else {
            trace!(target: "kiwi::cache", op = ?cache_key.op, key = %cache_key.key, "write overlapped load, not cached");
        }
        Ok(loaded)
    }
}

impl<S: VersionedStore> VersionedStore for CachedStore<S> {
    fn has(&self, key: &str, version: Option<Version>) -> Result<bool> {
        let cached = self.memoize(CacheKey::new(Op::Has, key, version), || {
            self.inner.has(key, version).map(Cached::Has)
        })?;
        match cached {
            Cached::Has(found) => Ok(found),
            other => Err(mismatch(Op::Has, &other)),
        }
    }

    fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>> {
        let cached = self.memoize(CacheKey::new(Op::Get, key, version), || {
            match self.inner.get(key, version) {
                Ok(value) => Ok(Cached::Get(Some(value.into()))),
                Err(e) if e.is_not_found() => Ok(Cached::Get(None)),
                Err(e) => Err(e),
            }
        })?;
        match cached {
            Cached::Get(Some(value)) => Ok(value.to_vec()),
            Cached::Get(None) => Err(Error::not_found(key, version)),
            other => Err(mismatch(Op::Get, &other)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
        let version = self.inner.put(key, value)?;
        let payload: Arc<[u8]> = value.into();

        let mut entries = self.cache.lock();
        entries.generation += 1;
        let map = &mut entries.map;
        for alias in [Some(version), None] {
            map.insert(CacheKey::new(Op::Get, key, alias), Cached::Get(Some(payload.clone())));
            map.insert(CacheKey::new(Op::Has, key, alias), Cached::Has(true));
        }
        map.remove(&CacheKey::new(Op::Time, key, None));
        map.remove(&CacheKey::new(Op::Time, key, Some(version)));
        Ok(version)
    }

    fn rem(&self, key: &str) -> Result<bool> {
        let removed = self.inner.rem(key)?;
        let mut entries = self.cache.lock();
        entries.generation += 1;
        entries.map.retain(|k, _| k.key != key);
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<String>> {
        self.inner.list()
    }

    fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp> {
        let cached = self.memoize(CacheKey::new(Op::Time, key, version), || {
            match self.inner.time(key, version) {
                Ok(t) => Ok(Cached::Time(Some(t))),
                Err(e) if e.is_not_found() => Ok(Cached::Time(None)),
                Err(e) => Err(e),
            }
        })?;
        match cached {
            Cached::Time(Some(t)) => Ok(t),
            Cached::Time(None) => Err(Error::not_found(key, version)),
            other => Err(mismatch(Op::Time, &other)),
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for CachedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("inner", &self.inner)
            .field("entries", &self.cache.lock().map.len())
            .finish()
    }
}

fn mismatch(op: Op, found: &Cached) -> Error {
    Error::Corruption(format!("cache entry for {op:?} holds {found:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;

    fn cached() -> CachedStore<SqliteStore> {
        CachedStore::new(SqliteStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_repeated_read_hits_cache() {
        let store = cached();
        store.inner().put("Home", b"hello").unwrap();

        assert_eq!(store.get("Home", None).unwrap(), b"hello");
        assert_eq!(store.get("Home", None).unwrap(), b"hello");
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_not_found_is_cached() {
        let store = cached();
        assert!(store.get("Nope", None).unwrap_err().is_not_found());
        assert!(store.get("Nope", None).unwrap_err().is_not_found());
        assert!(store.time("Nope", None).unwrap_err().is_not_found());
        assert_eq!(store.stats().misses, 2);
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_put_overrides_negative_entries() {
        let store = cached();
        assert!(!store.has("Home", None).unwrap());
        assert!(!store.has("Home", Some(Version::new(0))).unwrap());
        assert!(store.get("Home", Some(Version::new(0))).is_err());

        store.put("Home", b"hello").unwrap();
        assert!(store.has("Home", None).unwrap());
        assert!(store.has("Home", Some(Version::new(0))).unwrap());
        assert_eq!(store.get("Home", Some(Version::new(0))).unwrap(), b"hello");
    }

    #[test]
    fn test_put_drops_stale_latest_time() {
        let store = cached();
        store.put("Home", b"hello").unwrap();
        let first = store.time("Home", None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.put("Home", b"world").unwrap();

        let latest = store.time("Home", None).unwrap();
        assert!(latest > first);
        assert_eq!(latest, store.inner().time("Home", Some(Version::new(1))).unwrap());
    }

    #[test]
    fn test_rem_purges_key() {
        let store = cached();
        store.put("Gone", b"a").unwrap();
        store.put("Stay", b"b").unwrap();
        assert!(store.has("Gone", None).unwrap());

        assert!(store.rem("Gone").unwrap());
        assert!(!store.has("Gone", None).unwrap());
        assert!(store.get("Gone", Some(Version::new(0))).unwrap_err().is_not_found());
        assert_eq!(store.get("Stay", None).unwrap(), b"b");
    }

    #[test]
    fn test_load_overlapping_put_is_not_cached() {
        let store = cached();
        store.inner().put("Home", b"hello").unwrap();

        let loaded = store
            .memoize(CacheKey::new(Op::Get, "Home", None), || {
                let before = store.inner().get("Home", None)?;
                store.put("Home", b"world")?;
                Ok(Cached::Get(Some(before.into())))
            })
            .unwrap();

        assert!(matches!(loaded, Cached::Get(Some(ref v)) if &v[..] == b"hello"));
        assert_eq!(store.get("Home", None).unwrap(), b"world");
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let store = cached();
        store.put("Home", b"hello").unwrap();
        assert!(store.stats().entries > 0);
        store.clear();
        assert_eq!(store.stats().entries, 0);
        assert_eq!(store.get("Home", None).unwrap(), b"hello");
        assert_eq!(store.stats().misses, 1);
    }
}
