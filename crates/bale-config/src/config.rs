use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::split_chunks::SplitChunksConfig;

/// Complete build configuration.
///
/// Every field has a default, so an empty `bale.toml` is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Concurrent resolve/build tasks in the make phase. `None` uses the
    /// number of CPUs.
    pub parallelism: Option<usize>,
    pub ids: IdsConfig,
    pub output: OutputConfig,
    pub optimization: OptimizationConfig,
    pub cache: CacheConfig,
}

impl BundleConfig {
    /// Render the configuration as TOML, e.g. to scaffold a `bale.toml`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Check logical consistency with the [`SchemaValidator`](crate::SchemaValidator).
    pub fn validate(&self) -> Result<()> {
        use crate::validation::{ConfigValidator, SchemaValidator};
        SchemaValidator.validate(self)
    }
}

/// How module and chunk ids are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Position in first-reachable order.
    Natural,
    /// Module identifier or chunk name.
    Named,
    /// Truncated content-independent hash of the name.
    Deterministic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdsConfig {
    pub module_ids: IdStrategy,
    pub chunk_ids: IdStrategy,
    /// Initial hex length of deterministic ids; extended on collision.
    pub hash_length: usize,
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            module_ids: IdStrategy::Deterministic,
            chunk_ids: IdStrategy::Deterministic,
            hash_length: 4,
        }
    }
}

/// Output naming. Templates understand `[name]`, `[id]` and `[contenthash]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Template for entry chunks.
    pub filename: String,
    /// Template for async and shared chunks.
    pub chunk_filename: String,
    /// Template for extracted runtime chunks.
    pub runtime_filename: String,
    /// Hex characters of `[contenthash]`.
    pub hash_length: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            filename: "[name].[contenthash].js".to_string(),
            chunk_filename: "[id].[contenthash].js".to_string(),
            runtime_filename: "runtime~[name].[contenthash].js".to_string(),
            hash_length: 8,
        }
    }
}

/// Where bootstrap code goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeChunkMode {
    /// Each entry chunk embeds the runtime.
    #[default]
    Embedded,
    /// One runtime chunk per runtime name, shared by its entries.
    Single,
    /// One runtime chunk per entry.
    PerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Run usage propagation and drop unused exports.
    pub tree_shaking: bool,
    /// Merge single-consumer ESM modules into their consumer.
    pub concatenate_modules: bool,
    pub runtime_chunk: RuntimeChunkMode,
    pub split_chunks: SplitChunksConfig,
    /// Drop non-entry chunks left without modules after splitting.
    pub remove_empty_chunks: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            tree_shaking: true,
            concatenate_modules: true,
            runtime_chunk: RuntimeChunkMode::Embedded,
            split_chunks: SplitChunksConfig::default(),
            remove_empty_chunks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Directory of the persistent store. In-memory only when unset.
    pub directory: Option<PathBuf>,
    /// Mixed into every etag; bump to invalidate all entries.
    pub version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            version: "1".to_string(),
        }
    }
}
