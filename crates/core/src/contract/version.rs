//! Version identifier for stored entries
//!
//! Every key carries a dense, gap-free history of versions numbered from 0.
//! Versions are assigned by the store on `put`, never by the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential revision number of a key's content
///
/// ## Invariants
///
/// - The first write of a key is version 0
/// - Each later write is exactly one past the key's current maximum
/// - A (key, version) pair is never reused or rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version assigned to the first write of a key
    pub const FIRST: Version = Version(0);

    /// Create a version from its number
    #[inline]
    pub const fn new(n: u64) -> Self {
        Version(n)
    }

    /// Get the raw version number
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The version that follows this one
    #[inline]
    pub const fn next(&self) -> Self {
        Version(self.0 + 1)
    }

    /// The version a new write receives given the key's current maximum
    ///
    /// `None` means the key has no versions yet.
    #[inline]
    pub fn after(current: Option<Version>) -> Self {
        current.map_or(Version::FIRST, |v| v.next())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(n: u64) -> Self {
        Version(n)
    }
}

impl From<Version> for u64 {
    fn from(v: Version) -> Self {
        v.0
    }
}
