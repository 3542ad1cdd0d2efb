//! Kiwi - versioned page storage for a minimal wiki
//!
//! Every page title maps to a dense history of versions numbered from 0.
//! One contract, [`VersionedStore`], is served by two independent
//! backends and an optional read cache:
//!
//! - [`FileStore`]: `<key>.<version>` files plus a hard-linked `<key>!` pointer
//! - [`SqliteStore`]: rows of one `(key, version)` table
//! - [`CachedStore`]: memoizes `has`/`get`/`time` for any backend
//!
//! # Quick Start
//!
//! ```no_run
//! use kiwi::{FileStore, Version, VersionedStore};
//!
//! let store = FileStore::open("data")?;
//! assert_eq!(store.put("Home", b"hello")?, Version::new(0));
//! assert_eq!(store.put("Home", b"world")?, Version::new(1));
//! assert_eq!(store.get("Home", None)?, b"world");
//! assert_eq!(store.get("Home", Some(Version::new(0)))?, b"hello");
//! # Ok::<(), kiwi::Error>(())
//! ```
//!
//! Or pick the backend from a `kiwi.toml`:
//!
//! ```no_run
//! use kiwi::StoreConfig;
//!
//! let store = StoreConfig::from_file("kiwi.toml".as_ref())?.open()?;
//! for title in store.list()? {
//!     println!("{title} modified {}", store.time(&title, None)?.to_rfc3339());
//! }
//! # Ok::<(), kiwi::Error>(())
//! ```

pub use kiwi_core::*;
pub use kiwi_storage::*;
