//! Incremental build cache.
//!
//! # Architecture
//!
//! - **Etag-keyed**: module entries are keyed by BLAKE3 of source hash and
//!   build options; chunk entries by an order-independent combination of
//!   their members' code generation keys
//! - **Lazy decoding**: a damaged entry is discarded on lookup and rebuilt
//! - **redb backend**: optional persistence in `<dir>/cache.redb`, one row
//!   per entry plus a format version

pub mod changes;
pub mod etag;
pub mod incremental;
mod storage;

pub use changes::{ChangeDetector, ChangeSet};
pub use etag::{Etag, EtagBuilder, build_options_etag};
pub use incremental::{
    CacheLookup, CacheStats, CachedChunk, CachedModule, IncrementalCache, Invalidation,
};
pub use storage::{CacheError, CacheStore};
