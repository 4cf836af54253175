use std::fmt;

use bale_graph::RuntimeName;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::chunk_group::ChunkGroupUkey;

/// Arena key of a chunk. Stable for the lifetime of one chunk graph only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkUkey(pub(crate) u32);

impl fmt::Display for ChunkUkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Main chunk of an entrypoint.
    Entry,
    /// Main chunk of a dynamically imported group.
    Async,
    /// Produced by split rules; loaded alongside the chunks it came from.
    Shared,
    /// Bootstrap code only.
    Runtime,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Entry => "entry",
            ChunkKind::Async => "async",
            ChunkKind::Shared => "shared",
            ChunkKind::Runtime => "runtime",
        }
    }

    /// Load order inside a group: runtime, then shared, then the main chunk.
    pub(crate) fn load_rank(&self) -> u8 {
        match self {
            ChunkKind::Runtime => 0,
            ChunkKind::Shared => 1,
            ChunkKind::Entry | ChunkKind::Async => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub ukey: ChunkUkey,
    pub name: Option<String>,
    pub kind: ChunkKind,
    pub runtime: RuntimeName,
    /// Split rules may move this chunk's modules into shared chunks.
    pub shareable: bool,
    /// Assigned by the id pass.
    pub id: Option<String>,
    /// Key of the cache group that created this chunk.
    pub cache_group: Option<String>,
    pub(crate) groups: IndexSet<ChunkGroupUkey>,
}

impl Chunk {
    pub fn groups(&self) -> impl Iterator<Item = ChunkGroupUkey> + '_ {
        self.groups.iter().copied()
    }

    /// Loaded up front by an entrypoint rather than on demand.
    pub fn is_initial(&self) -> bool {
        matches!(self.kind, ChunkKind::Entry | ChunkKind::Runtime)
    }

    /// Id if assigned, otherwise the arena key.
    pub fn id_or_key(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.ukey.to_string())
    }
}
