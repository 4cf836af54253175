//! Chunk graph: chunks, chunk groups and module membership.
//!
//! Chunks and groups live in arenas keyed by [`ChunkUkey`] and
//! [`ChunkGroupUkey`]. Membership is kept in two side tables (chunk to modules
//! and module to chunks) that are always updated together, so both directions
//! answer in one lookup. Modules themselves stay in the module graph.

mod builder;
mod chunk;
mod chunk_group;
mod validate;

pub use builder::build_chunk_graph;
pub use chunk::{Chunk, ChunkKind, ChunkUkey};
pub use chunk_group::{ChunkGroup, ChunkGroupKind, ChunkGroupUkey};
pub use validate::GraphInvariantError;

use std::collections::{BTreeSet, VecDeque};

use bale_graph::{ModuleGraph, ModuleIdentifier, RuntimeName};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Modules merged into one scope: the root, then the modules it absorbed in
/// absorption order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatenatedModule {
    root: ModuleIdentifier,
    inner: Vec<ModuleIdentifier>,
}

impl ConcatenatedModule {
    /// `inner` must not repeat `root`.
    pub fn new(root: ModuleIdentifier, inner: Vec<ModuleIdentifier>) -> Self {
        let inner = inner.into_iter().filter(|m| *m != root).collect();
        Self { root, inner }
    }

    pub fn root(&self) -> &ModuleIdentifier {
        &self.root
    }

    pub fn inner(&self) -> &[ModuleIdentifier] {
        &self.inner
    }

    /// Root first, then inner modules.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleIdentifier> {
        std::iter::once(&self.root).chain(&self.inner)
    }

    pub fn contains(&self, module: &ModuleIdentifier) -> bool {
        self.root == *module || self.inner.contains(module)
    }
}

/// Key of an async group: one group per imported module, runtime and owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AsyncGroupKey {
    target: ModuleIdentifier,
    runtime: RuntimeName,
    owner: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkGraph {
    chunks: IndexMap<ChunkUkey, Chunk>,
    groups: IndexMap<ChunkGroupUkey, ChunkGroup>,
    next_chunk: u32,
    next_group: u32,

    chunk_modules: FxHashMap<ChunkUkey, BTreeSet<ModuleIdentifier>>,
    module_chunks: FxHashMap<ModuleIdentifier, BTreeSet<ChunkUkey>>,

    entrypoints: IndexMap<String, ChunkGroupUkey>,
    async_groups: FxHashMap<AsyncGroupKey, ChunkGroupUkey>,

    module_ids: FxHashMap<ModuleIdentifier, String>,
    concatenations: Vec<ConcatenatedModule>,
    /// Any member of a concatenation to its index in `concatenations`.
    concatenation_index: FxHashMap<ModuleIdentifier, usize>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- construction -------------------------------------------------

    pub fn add_chunk(
        &mut self,
        name: Option<String>,
        kind: ChunkKind,
        runtime: RuntimeName,
        shareable: bool,
    ) -> ChunkUkey {
        let ukey = ChunkUkey(self.next_chunk);
        self.next_chunk += 1;
        self.chunks.insert(
            ukey,
            Chunk {
                ukey,
                name,
                kind,
                runtime,
                shareable,
                id: None,
                cache_group: None,
                groups: IndexSet::new(),
            },
        );
        ukey
    }

    pub fn add_group(
        &mut self,
        kind: ChunkGroupKind,
        root: ModuleIdentifier,
        runtime: RuntimeName,
        owner: Option<String>,
    ) -> ChunkGroupUkey {
        let ukey = ChunkGroupUkey(self.next_group);
        self.next_group += 1;
        if let ChunkGroupKind::Entrypoint { name } = &kind {
            self.entrypoints.insert(name.clone(), ukey);
        } else {
            self.async_groups.insert(
                AsyncGroupKey {
                    target: root.clone(),
                    runtime: runtime.clone(),
                    owner: owner.clone(),
                },
                ukey,
            );
        }
        self.groups.insert(
            ukey,
            ChunkGroup {
                ukey,
                kind,
                root,
                runtime,
                owner,
                chunks: Vec::new(),
                parents: IndexSet::new(),
                children: IndexSet::new(),
                runtime_chunk: None,
            },
        );
        ukey
    }

    /// Add `chunk` to `group`, keeping the group's chunks in load order.
    pub fn connect_chunk_and_group(&mut self, chunk: ChunkUkey, group: ChunkGroupUkey) {
        let Some(rank) = self.chunks.get(&chunk).map(|c| c.kind.load_rank()) else {
            return;
        };
        let Self { chunks, groups, .. } = self;
        let Some(g) = groups.get_mut(&group) else {
            return;
        };
        if g.chunks.contains(&chunk) {
            return;
        }
        let pos = g.chunks.partition_point(|c| {
            chunks
                .get(c)
                .is_some_and(|existing| existing.kind.load_rank() <= rank)
        });
        g.chunks.insert(pos, chunk);
        if let Some(c) = chunks.get_mut(&chunk) {
            c.groups.insert(group);
        }
    }

    pub fn disconnect_chunk_and_group(&mut self, chunk: ChunkUkey, group: ChunkGroupUkey) {
        if let Some(g) = self.groups.get_mut(&group) {
            g.chunks.retain(|c| *c != chunk);
            if g.runtime_chunk == Some(chunk) {
                g.runtime_chunk = None;
            }
        }
        if let Some(c) = self.chunks.get_mut(&chunk) {
            c.groups.shift_remove(&group);
        }
    }

    pub fn connect_groups(&mut self, parent: ChunkGroupUkey, child: ChunkGroupUkey) {
        if let Some(p) = self.groups.get_mut(&parent) {
            p.children.insert(child);
        }
        if let Some(c) = self.groups.get_mut(&child) {
            c.parents.insert(parent);
        }
    }

    pub fn set_runtime_chunk(&mut self, group: ChunkGroupUkey, chunk: ChunkUkey) {
        self.connect_chunk_and_group(chunk, group);
        if let Some(g) = self.groups.get_mut(&group) {
            g.runtime_chunk = Some(chunk);
        }
    }

    pub fn connect_chunk_and_module(&mut self, chunk: ChunkUkey, module: ModuleIdentifier) {
        self.chunk_modules
            .entry(chunk)
            .or_default()
            .insert(module.clone());
        self.module_chunks.entry(module).or_default().insert(chunk);
    }

    pub fn disconnect_chunk_and_module(&mut self, chunk: ChunkUkey, module: &ModuleIdentifier) {
        if let Some(set) = self.chunk_modules.get_mut(&chunk) {
            set.remove(module);
        }
        if let Some(set) = self.module_chunks.get_mut(module) {
            set.remove(&chunk);
            if set.is_empty() {
                self.module_chunks.remove(module);
            }
        }
    }

    /// Remove a chunk from every group and drop its membership.
    pub fn remove_chunk(&mut self, ukey: ChunkUkey) -> Option<Chunk> {
        let groups: Vec<_> = self.chunks.get(&ukey)?.groups().collect();
        for group in groups {
            self.disconnect_chunk_and_group(ukey, group);
        }
        for module in self.chunk_modules.remove(&ukey).unwrap_or_default() {
            if let Some(set) = self.module_chunks.get_mut(&module) {
                set.remove(&ukey);
                if set.is_empty() {
                    self.module_chunks.remove(&module);
                }
            }
        }
        self.chunks.shift_remove(&ukey)
    }

    // ---- chunks -------------------------------------------------------

    pub fn chunk(&self, ukey: ChunkUkey) -> Option<&Chunk> {
        self.chunks.get(&ukey)
    }

    pub fn chunk_mut(&mut self, ukey: ChunkUkey) -> Option<&mut Chunk> {
        self.chunks.get_mut(&ukey)
    }

    /// Chunks in creation order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn chunk_keys(&self) -> Vec<ChunkUkey> {
        self.chunks.keys().copied().collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_by_name(&self, name: &str) -> Option<&Chunk> {
        self.chunks
            .values()
            .find(|c| c.name.as_deref() == Some(name))
    }

    pub fn chunk_by_id(&self, id: &str) -> Option<&Chunk> {
        self.chunks.values().find(|c| c.id.as_deref() == Some(id))
    }

    /// Member modules, sorted by identifier.
    pub fn chunk_modules(&self, chunk: ChunkUkey) -> Vec<ModuleIdentifier> {
        self.chunk_modules
            .get(&chunk)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn chunk_module_count(&self, chunk: ChunkUkey) -> usize {
        self.chunk_modules.get(&chunk).map_or(0, BTreeSet::len)
    }

    /// Sum of member module sizes.
    pub fn chunk_size(&self, chunk: ChunkUkey, graph: &ModuleGraph) -> usize {
        self.chunk_modules
            .get(&chunk)
            .into_iter()
            .flatten()
            .filter_map(|id| graph.module(id))
            .map(|m| m.size())
            .sum()
    }

    /// Human-readable name: the chunk name, else the stem of the module that
    /// created its first group.
    pub fn chunk_label(&self, chunk: ChunkUkey) -> String {
        let Some(c) = self.chunks.get(&chunk) else {
            return chunk.to_string();
        };
        if let Some(name) = &c.name {
            return name.clone();
        }
        c.groups()
            .next()
            .and_then(|g| self.groups.get(&g))
            .map(|g| module_stem(&g.root))
            .unwrap_or_else(|| chunk.to_string())
    }

    // ---- groups -------------------------------------------------------

    pub fn group(&self, ukey: ChunkGroupUkey) -> Option<&ChunkGroup> {
        self.groups.get(&ukey)
    }

    /// Groups in creation order.
    pub fn groups(&self) -> impl Iterator<Item = &ChunkGroup> {
        self.groups.values()
    }

    /// Entrypoints in declaration order.
    pub fn entrypoints(&self) -> impl Iterator<Item = (&str, &ChunkGroup)> {
        self.entrypoints
            .iter()
            .filter_map(|(name, g)| self.groups.get(g).map(|group| (name.as_str(), group)))
    }

    pub fn entrypoint(&self, name: &str) -> Option<&ChunkGroup> {
        self.entrypoints.get(name).and_then(|g| self.groups.get(g))
    }

    pub fn async_group(
        &self,
        target: &ModuleIdentifier,
        runtime: &RuntimeName,
        owner: Option<&str>,
    ) -> Option<ChunkGroupUkey> {
        self.async_groups
            .get(&AsyncGroupKey {
                target: target.clone(),
                runtime: runtime.clone(),
                owner: owner.map(str::to_string),
            })
            .copied()
    }

    /// Async group loaded by `origin` when it dynamically imports `target`.
    ///
    /// Looks through the groups of `origin`'s chunks first, then falls back
    /// to any async group for `target` in `runtime`.
    pub fn async_group_for(
        &self,
        origin: &ModuleIdentifier,
        target: &ModuleIdentifier,
        runtime: &RuntimeName,
    ) -> Option<ChunkGroupUkey> {
        let is_match = |g: &ChunkGroup| {
            !g.is_entrypoint() && &g.root == target && &g.runtime == runtime
        };
        for chunk in self.module_chunks(origin) {
            let Some(c) = self.chunks.get(&chunk) else {
                continue;
            };
            for group in c.groups() {
                let Some(g) = self.groups.get(&group) else {
                    continue;
                };
                if let Some(child) = g
                    .children()
                    .find(|child| self.groups.get(child).is_some_and(is_match))
                {
                    return Some(child);
                }
            }
        }
        self.groups.values().find(|&g| is_match(g)).map(|g| g.ukey)
    }

    /// Last Entry or Async chunk of a group.
    pub fn group_main_chunk(&self, group: ChunkGroupUkey) -> Option<ChunkUkey> {
        let g = self.groups.get(&group)?;
        g.chunks.iter().rev().copied().find(|c| {
            self.chunks
                .get(c)
                .is_some_and(|chunk| matches!(chunk.kind, ChunkKind::Entry | ChunkKind::Async))
        })
    }

    /// `group` and every group reachable through child links, breadth first.
    pub fn descendant_groups(&self, group: ChunkGroupUkey) -> Vec<ChunkGroupUkey> {
        let mut seen = IndexSet::from([group]);
        let mut queue = VecDeque::from([group]);
        while let Some(current) = queue.pop_front() {
            for child in self.groups.get(&current).into_iter().flat_map(|g| g.children()) {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Runtime names used by any group, sorted.
    pub fn runtimes(&self) -> Vec<RuntimeName> {
        let set: BTreeSet<_> = self.groups.values().map(|g| g.runtime.clone()).collect();
        set.into_iter().collect()
    }

    // ---- modules ------------------------------------------------------

    /// Chunks containing `module`, in ukey order.
    pub fn module_chunks(&self, module: &ModuleIdentifier) -> Vec<ChunkUkey> {
        self.module_chunks
            .get(module)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_module_in_chunk(&self, module: &ModuleIdentifier, chunk: ChunkUkey) -> bool {
        self.module_chunks
            .get(module)
            .is_some_and(|set| set.contains(&chunk))
    }

    /// Every module placed in at least one chunk, sorted.
    pub fn modules(&self) -> Vec<ModuleIdentifier> {
        let mut modules: Vec<_> = self.module_chunks.keys().cloned().collect();
        modules.sort();
        modules
    }

    /// Runtimes of the chunks containing `module`, sorted.
    pub fn module_runtimes(&self, module: &ModuleIdentifier) -> Vec<RuntimeName> {
        let set: BTreeSet<_> = self
            .module_chunks(module)
            .into_iter()
            .filter_map(|c| self.chunks.get(&c).map(|chunk| chunk.runtime.clone()))
            .collect();
        set.into_iter().collect()
    }

    pub fn set_module_id(&mut self, module: ModuleIdentifier, id: String) {
        self.module_ids.insert(module, id);
    }

    pub fn module_id(&self, module: &ModuleIdentifier) -> Option<&str> {
        self.module_ids.get(module).map(String::as_str)
    }

    // ---- concatenation ------------------------------------------------

    pub fn add_concatenation(&mut self, concatenation: ConcatenatedModule) {
        let index = self.concatenations.len();
        for module in concatenation.modules() {
            self.concatenation_index.insert(module.clone(), index);
        }
        self.concatenations.push(concatenation);
    }

    pub fn concatenations(&self) -> &[ConcatenatedModule] {
        &self.concatenations
    }

    /// The concatenation `module` belongs to, as root or inner module.
    pub fn concatenation_of(&self, module: &ModuleIdentifier) -> Option<&ConcatenatedModule> {
        self.concatenation_index
            .get(module)
            .and_then(|i| self.concatenations.get(*i))
    }

    /// `module` was absorbed into another module's scope.
    pub fn is_concatenated_inner(&self, module: &ModuleIdentifier) -> bool {
        self.concatenation_of(module)
            .is_some_and(|c| c.root() != module)
    }
}

/// File stem of a module's resource path: `src/pages/about.js` gives `about`.
pub(crate) fn module_stem(module: &ModuleIdentifier) -> String {
    let name = module.short_name();
    let file = name.rsplit('/').next().unwrap_or(name);
    let stem = file.split('.').next().unwrap_or(file);
    if stem == "index" {
        let parent = name.rsplit('/').nth(1).unwrap_or(stem);
        return parent.to_string();
    }
    stem.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_tables_stay_symmetric() {
        let mut chunks = ChunkGraph::new();
        let rt = RuntimeName::default();
        let a = chunks.add_chunk(Some("a".into()), ChunkKind::Entry, rt.clone(), true);
        let b = chunks.add_chunk(None, ChunkKind::Async, rt, true);
        let m = ModuleIdentifier::new("m.js");

        chunks.connect_chunk_and_module(a, m.clone());
        chunks.connect_chunk_and_module(b, m.clone());
        assert_eq!(chunks.module_chunks(&m), vec![a, b]);

        chunks.remove_chunk(a);
        assert_eq!(chunks.module_chunks(&m), vec![b]);
        chunks.disconnect_chunk_and_module(b, &m);
        assert!(chunks.modules().is_empty());
    }

    #[test]
    fn group_chunks_follow_load_order() {
        let mut chunks = ChunkGraph::new();
        let rt = RuntimeName::default();
        let group = chunks.add_group(
            ChunkGroupKind::Entrypoint { name: "main".into() },
            "main.js".into(),
            rt.clone(),
            None,
        );
        let entry = chunks.add_chunk(Some("main".into()), ChunkKind::Entry, rt.clone(), true);
        let shared = chunks.add_chunk(None, ChunkKind::Shared, rt.clone(), true);
        let runtime = chunks.add_chunk(None, ChunkKind::Runtime, rt, true);

        chunks.connect_chunk_and_group(entry, group);
        chunks.connect_chunk_and_group(shared, group);
        chunks.set_runtime_chunk(group, runtime);

        let g = chunks.group(group).unwrap();
        assert_eq!(g.chunks(), &[runtime, shared, entry]);
        assert_eq!(g.runtime_chunk(), Some(runtime));
        assert_eq!(chunks.group_main_chunk(group), Some(entry));
    }

    #[test]
    fn concatenation_without_inner_modules_is_just_its_root() {
        let root = ModuleIdentifier::new("a.js");
        let scope = ConcatenatedModule::new(root.clone(), vec![root.clone()]);
        assert_eq!(scope.root(), &root);
        assert!(scope.inner().is_empty());
        assert_eq!(scope.modules().collect::<Vec<_>>(), vec![&root]);

        let merged = ConcatenatedModule::new(root.clone(), vec![root.clone(), "b.js".into()]);
        assert!(merged.contains(&"b.js".into()));
        assert_eq!(merged.inner(), &[ModuleIdentifier::new("b.js")]);
    }

    #[test]
    fn stems_skip_index_files() {
        assert_eq!(module_stem(&"src/pages/about.js".into()), "about");
        assert_eq!(module_stem(&"node_modules/lodash/index.js".into()), "lodash");
    }
}
