//! Consistency checks run at the end of seal.
//!
//! Group closures and availability are recomputed from the module graph, so
//! a pass that moved modules incorrectly is caught here rather than in the
//! emitted code.

use bale_graph::{ModuleGraph, ModuleIdentifier};
use indexmap::IndexMap;

use super::builder::{compute_availability, sync_closure};
use super::{ChunkGraph, ChunkKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphInvariantError {
    #[error("{module} is needed by {group} but none of its chunks contain it")]
    MissingModule {
        group: String,
        module: ModuleIdentifier,
    },

    #[error("{module} sits in {chunk} although no group of that chunk needs it")]
    StrayModule {
        chunk: String,
        module: ModuleIdentifier,
    },

    #[error("membership tables disagree about {module} in {chunk}")]
    AsymmetricMembership {
        chunk: String,
        module: ModuleIdentifier,
    },

    #[error("{chunk} and {group} disagree about their link")]
    DanglingGroupLink { chunk: String, group: String },

    #[error("dynamic import of {target} from {group} has no async group")]
    MissingAsyncGroup {
        group: String,
        target: ModuleIdentifier,
    },

    #[error("runtime chunk {chunk} contains modules")]
    RuntimeChunkWithModules { chunk: String },

    #[error("concatenated module {module} does not share the chunks of {root}")]
    SplitConcatenation {
        root: ModuleIdentifier,
        module: ModuleIdentifier,
    },
}

impl ChunkGraph {
    /// Check membership, group links, reachability and concatenation scopes
    /// against `graph`.
    pub fn validate(&self, graph: &ModuleGraph) -> Result<(), GraphInvariantError> {
        self.validate_tables()?;

        let closures: IndexMap<_, _> = self
            .groups()
            .map(|g| (g.ukey, sync_closure(graph, &g.root, &g.runtime)))
            .collect();
        let available = compute_availability(self, &closures);

        for group in self.groups() {
            let Some(closure) = closures.get(&group.ukey) else {
                continue;
            };
            let loaded = available.get(&group.ukey);
            for module in &closure.modules {
                let in_chunks = group
                    .chunks()
                    .iter()
                    .any(|c| self.is_module_in_chunk(module, *c));
                if !in_chunks && !loaded.is_some_and(|set| set.contains(module)) {
                    return Err(GraphInvariantError::MissingModule {
                        group: group.ukey.to_string(),
                        module: module.clone(),
                    });
                }
            }
            for target in &closure.async_targets {
                let has_child = group.children().any(|child| {
                    self.group(child)
                        .is_some_and(|c| c.root == *target && c.runtime == group.runtime)
                });
                if !has_child {
                    return Err(GraphInvariantError::MissingAsyncGroup {
                        group: group.ukey.to_string(),
                        target: target.clone(),
                    });
                }
            }
        }

        for chunk in self.chunks() {
            for module in self.chunk_modules(chunk.ukey) {
                let needed = chunk.groups().any(|g| {
                    closures
                        .get(&g)
                        .is_some_and(|closure| closure.modules.contains(&module))
                });
                if !needed {
                    return Err(GraphInvariantError::StrayModule {
                        chunk: self.chunk_label(chunk.ukey),
                        module,
                    });
                }
            }
        }

        for concatenation in self.concatenations() {
            let root_chunks = self.module_chunks(concatenation.root());
            for module in concatenation.inner() {
                if self.module_chunks(module) != root_chunks {
                    return Err(GraphInvariantError::SplitConcatenation {
                        root: concatenation.root().clone(),
                        module: module.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_tables(&self) -> Result<(), GraphInvariantError> {
        for (chunk, modules) in &self.chunk_modules {
            for module in modules {
                let mirrored = self
                    .module_chunks
                    .get(module)
                    .is_some_and(|set| set.contains(chunk));
                if !mirrored || !self.chunks.contains_key(chunk) {
                    return Err(GraphInvariantError::AsymmetricMembership {
                        chunk: chunk.to_string(),
                        module: module.clone(),
                    });
                }
            }
        }
        for (module, chunks) in &self.module_chunks {
            for chunk in chunks {
                if !self.is_module_listed(*chunk, module) {
                    return Err(GraphInvariantError::AsymmetricMembership {
                        chunk: chunk.to_string(),
                        module: module.clone(),
                    });
                }
            }
        }

        for chunk in self.chunks() {
            if chunk.kind == ChunkKind::Runtime && self.chunk_module_count(chunk.ukey) > 0 {
                return Err(GraphInvariantError::RuntimeChunkWithModules {
                    chunk: self.chunk_label(chunk.ukey),
                });
            }
            for group in chunk.groups() {
                let linked = self
                    .group(group)
                    .is_some_and(|g| g.chunks().contains(&chunk.ukey));
                if !linked {
                    return Err(GraphInvariantError::DanglingGroupLink {
                        chunk: chunk.ukey.to_string(),
                        group: group.to_string(),
                    });
                }
            }
        }
        for group in self.groups() {
            for chunk in group.chunks() {
                let linked = self
                    .chunk(*chunk)
                    .is_some_and(|c| c.groups.contains(&group.ukey));
                if !linked {
                    return Err(GraphInvariantError::DanglingGroupLink {
                        chunk: chunk.to_string(),
                        group: group.ukey.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn is_module_listed(&self, chunk: super::ChunkUkey, module: &ModuleIdentifier) -> bool {
        self.chunk_modules
            .get(&chunk)
            .is_some_and(|set| set.contains(module))
    }
}
