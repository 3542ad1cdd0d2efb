//! Contract types shared by every backend
//!
//! - `version`: per-key revision numbers, dense from 0
//! - `timestamp`: microsecond creation times

pub mod timestamp;
pub mod version;

pub use timestamp::Timestamp;
pub use version::Version;
