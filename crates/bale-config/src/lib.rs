//! Configuration for bale builds.
//!
//! [`BundleConfig`] is plain serde data. [`ConfigLoader`] layers defaults,
//! a `bale.toml` (or `bale.json`) file and `BALE_` environment variables
//! with figment; [`SchemaValidator`] checks the result for logical
//! consistency without touching the file system.

pub mod config;
pub mod error;
pub mod loading;
pub mod split_chunks;
pub mod validation;

pub use config::{
    BundleConfig, CacheConfig, IdStrategy, IdsConfig, OptimizationConfig, OutputConfig,
    RuntimeChunkMode,
};
pub use error::{ConfigError, Result};
pub use loading::ConfigLoader;
pub use split_chunks::{CacheGroup, ChunkSelection, SplitChunksConfig};
pub use validation::{ConfigValidator, SchemaValidator};
