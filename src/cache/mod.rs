//! Cache module for storing adapted fetch results in memory
//!
//! Results are keyed by the canonical serialization of their argument list and
//! may carry a TTL. Expired entries are treated as misses but stay in the
//! table until they are overwritten or cleared; `peek` still reports them with
//! an `is_expired` flag.

mod key;
mod manager;

pub use key::CacheKey;
pub use manager::CachedData;

pub(crate) use key::{canonical_arg, ArgsKey};
pub(crate) use manager::CacheTable;
