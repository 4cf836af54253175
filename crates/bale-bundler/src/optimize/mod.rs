//! Seal-time optimization passes.
//!
//! They run in a fixed order on a frozen module graph:
//!
//! 1. [`usage`] marks which exports each runtime reads.
//! 2. [`concatenation`] merges single-consumer ESM modules into one scope.
//! 3. [`split_chunks`] extracts shared chunks according to cache groups.
//!
//! Each pass only reads the module graph (usage also writes exports info)
//! and mutates the chunk graph.

pub mod concatenation;
pub mod split_chunks;
pub mod usage;

pub use concatenation::{ConcatenationReport, concatenate_modules};
pub use split_chunks::{SplitReport, split_chunks};
pub use usage::{UsageReport, propagate_usage};
