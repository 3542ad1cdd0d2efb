//! Storage backends for kiwi
//!
//! This crate implements the versioned store contract with:
//! - FileStore: one immutable file per version, hard-linked latest pointer
//! - SqliteStore: one append-only table keyed by (key, version)
//! - CachedStore: per-instance read cache that wraps any backend
//! - StoreConfig: `kiwi.toml` loader that opens one of the above
//!
//! # Write serialization
//!
//! - FileStore holds a mutex plus an `fs2` exclusive file lock across
//!   version selection and the pointer switch
//! - SqliteStore computes and inserts the next version in one statement
//!   inside an IMMEDIATE transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cached;
pub mod config;
pub mod fs;
pub mod sqlite;

pub use cached::{CacheStats, CachedStore};
pub use config::{Backend, FilesystemConfig, SqliteConfig, StoreConfig, CONFIG_FILE_NAME};
pub use fs::{FileStore, FileStoreOptions, RecoveryStats};
pub use sqlite::SqliteStore;
