//! Core types and traits for kiwi
//!
//! This crate defines the foundational pieces shared by every store:
//! - Version: per-key revision number, dense from 0
//! - Timestamp: creation time of a version
//! - Error: error taxonomy (not found, unsupported, configuration, I/O)
//! - VersionedStore: the six-operation store contract

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod contract;
pub mod error;
pub mod traits;

pub use contract::{Timestamp, Version};
pub use error::{Error, Result};
pub use traits::VersionedStore;
