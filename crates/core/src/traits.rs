//! The versioned store contract
//!
//! Every backend (filesystem, relational, and the caching decorator)
//! implements [`VersionedStore`], so callers can swap or stack them
//! without changing call sites.

use std::sync::Arc;

use crate::contract::{Timestamp, Version};
use crate::error::Result;

/// Versioned key-value store
///
/// Every operation that accepts a `version` treats `None` as "latest".
///
/// Thread safety: implementations must be `Send + Sync`. Serialization of
/// concurrent `put` calls on the same key is the backend's job.
pub trait VersionedStore: Send + Sync {
    /// True if `key` has at least one version (`version == None`), or
    /// if the given version exists.
    fn has(&self, key: &str, version: Option<Version>) -> Result<bool>;

    /// Read the payload of `key` at `version`, or of its latest version
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the key or that version does not exist.
    fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>>;

    /// Append a new version of `key` holding `value`
    ///
    /// Returns the assigned version: one past the current maximum, or 0
    /// for a new key. The latest pointer only moves after the value is
    /// fully written.
    fn put(&self, key: &str, value: &[u8]) -> Result<Version>;

    /// Remove every version of `key`
    ///
    /// Returns `true` if the key existed, `false` if it had no versions.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` if the backend does not allow deletion; no data
    /// is touched in that case.
    fn rem(&self, key: &str) -> Result<bool>;

    /// All keys with at least one version, in no particular order
    fn list(&self) -> Result<Vec<String>>;

    /// Creation time of `key` at `version`, or of its latest version
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the key or that version does not exist.
    fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp>;
}

impl<S: VersionedStore + ?Sized> VersionedStore for Arc<S> {
    fn has(&self, key: &str, version: Option<Version>) -> Result<bool> {
        (**self).has(key, version)
    }

    fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>> {
        (**self).get(key, version)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
        (**self).put(key, value)
    }

    fn rem(&self, key: &str) -> Result<bool> {
        (**self).rem(key)
    }

    fn list(&self) -> Result<Vec<String>> {
        (**self).list()
    }

    fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp> {
        (**self).time(key, version)
    }
}

impl<S: VersionedStore + ?Sized> VersionedStore for Box<S> {
    fn has(&self, key: &str, version: Option<Version>) -> Result<bool> {
        (**self).has(key, version)
    }

    fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>> {
        (**self).get(key, version)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
        (**self).put(key, value)
    }

    fn rem(&self, key: &str) -> Result<bool> {
        (**self).rem(key)
    }

    fn list(&self) -> Result<Vec<String>> {
        (**self).list()
    }

    fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp> {
        (**self).time(key, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Minimal in-memory store used to exercise the blanket impls
    #[derive(Default)]
    struct MemStore {
        data: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
    }

    impl VersionedStore for MemStore {
        fn has(&self, key: &str, version: Option<Version>) -> Result<bool> {
            Ok(self.get(key, version).is_ok())
        }

        fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>> {
            let data = self.data.lock().unwrap();
            let versions = data.get(key).ok_or_else(|| Error::not_found(key, version))?;
            let entry = match version {
                Some(v) => versions.get(v.as_u64() as usize),
                None => versions.last(),
            };
            entry.cloned().ok_or_else(|| Error::not_found(key, version))
        }

        fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
            let mut data = self.data.lock().unwrap();
            let versions = data.entry(key.to_string()).or_default();
            versions.push(value.to_vec());
            Ok(Version::new(versions.len() as u64 - 1))
        }

        fn rem(&self, key: &str) -> Result<bool> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }

        fn list(&self) -> Result<Vec<String>> {
            Ok(self.data.lock().unwrap().keys().cloned().collect())
        }

        fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp> {
            self.get(key, version).map(|_| Timestamp::EPOCH)
        }
    }

    #[test]
    fn test_arc_delegates() {
        let store: Arc<dyn VersionedStore> = Arc::new(MemStore::default());
        assert_eq!(store.put("Home", b"hello").unwrap(), Version::new(0));
        assert_eq!(store.put("Home", b"world").unwrap(), Version::new(1));
        assert_eq!(store.get("Home", None).unwrap(), b"world");
        assert_eq!(store.get("Home", Some(Version::new(0))).unwrap(), b"hello");
        assert!(!store.has("Home", Some(Version::new(5))).unwrap());
        assert_eq!(store.list().unwrap(), vec!["Home".to_string()]);
    }

    #[test]
    fn test_box_delegates() {
        let store: Box<dyn VersionedStore> = Box::new(MemStore::default());
        store.put("A", b"x").unwrap();
        assert!(store.rem("A").unwrap());
        assert!(!store.rem("A").unwrap());
        assert!(store.get("A", None).unwrap_err().is_not_found());
    }
}
