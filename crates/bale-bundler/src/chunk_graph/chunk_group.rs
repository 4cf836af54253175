use std::fmt;

use bale_graph::{ModuleIdentifier, RuntimeName};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::chunk::ChunkUkey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkGroupUkey(pub(crate) u32);

impl fmt::Display for ChunkGroupUkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkGroupKind {
    Entrypoint { name: String },
    /// Created for a dynamic import of `root`.
    Async,
}

/// Chunks that load together, with links to the groups they can load next.
#[derive(Debug, Clone)]
pub struct ChunkGroup {
    pub ukey: ChunkGroupUkey,
    pub kind: ChunkGroupKind,
    /// Entry module or dynamically imported module.
    pub root: ModuleIdentifier,
    pub runtime: RuntimeName,
    /// Entrypoint owning this group when it does not share chunks.
    pub owner: Option<String>,
    pub(crate) chunks: Vec<ChunkUkey>,
    pub(crate) parents: IndexSet<ChunkGroupUkey>,
    pub(crate) children: IndexSet<ChunkGroupUkey>,
    pub(crate) runtime_chunk: Option<ChunkUkey>,
}

impl ChunkGroup {
    pub fn is_entrypoint(&self) -> bool {
        matches!(self.kind, ChunkGroupKind::Entrypoint { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ChunkGroupKind::Entrypoint { name } => Some(name),
            ChunkGroupKind::Async => None,
        }
    }

    /// Chunks in load order.
    pub fn chunks(&self) -> &[ChunkUkey] {
        &self.chunks
    }

    pub fn parents(&self) -> impl Iterator<Item = ChunkGroupUkey> + '_ {
        self.parents.iter().copied()
    }

    pub fn children(&self) -> impl Iterator<Item = ChunkGroupUkey> + '_ {
        self.children.iter().copied()
    }

    /// Chunk carrying this group's bootstrap code. Only entrypoints have one.
    pub fn runtime_chunk(&self) -> Option<ChunkUkey> {
        self.runtime_chunk
    }

    pub fn shareable(&self) -> bool {
        self.owner.is_none()
    }
}
