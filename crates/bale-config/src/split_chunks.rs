//! Chunk splitting rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitChunksConfig {
    pub enabled: bool,
    /// Lower bound applied to groups that do not set their own.
    pub min_size: usize,
    /// Chunks larger than this are split further. Unbounded when unset.
    pub max_size: Option<usize>,
    pub cache_groups: Vec<CacheGroup>,
}

impl Default for SplitChunksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 0,
            max_size: None,
            cache_groups: vec![CacheGroup::vendors(), CacheGroup::shared()],
        }
    }
}

/// Which chunks a cache group may take modules from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSelection {
    #[default]
    All,
    /// Entry chunks only.
    Initial,
    /// Async chunks only.
    Async,
}

/// One extraction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheGroup {
    /// Unique key; also the default name prefix of extracted chunks.
    pub key: String,
    /// Only modules whose identifier contains this string match.
    pub test: Option<String>,
    /// A module must sit in at least this many selected chunks.
    pub min_chunks: usize,
    /// Higher priority groups claim modules first.
    pub priority: i32,
    /// Falls back to the global `min_size` when unset.
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub chunks: ChunkSelection,
    /// Fixed chunk name. Without it the name is `key~` plus the sorted names
    /// of the source chunks.
    pub name: Option<String>,
}

impl Default for CacheGroup {
    fn default() -> Self {
        Self {
            key: String::new(),
            test: None,
            min_chunks: 1,
            priority: 0,
            min_size: None,
            max_size: None,
            chunks: ChunkSelection::All,
            name: None,
        }
    }
}

impl CacheGroup {
    /// Third-party code shared by any chunk.
    pub fn vendors() -> Self {
        Self {
            key: "vendors".to_string(),
            test: Some("node_modules/".to_string()),
            min_chunks: 1,
            priority: -10,
            ..Self::default()
        }
    }

    /// Anything used by at least two chunks.
    pub fn shared() -> Self {
        Self {
            key: "shared".to_string(),
            min_chunks: 2,
            priority: -20,
            ..Self::default()
        }
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.test
            .as_deref()
            .is_none_or(|test| identifier.contains(test))
    }
}
