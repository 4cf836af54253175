//! Chunk graph construction.
//!
//! Every entrypoint gets a group with one entry chunk. Walking the static
//! closure of a group discovers its dynamic imports; each distinct imported
//! module (per runtime and owner) gets an async group, created once and
//! linked as a child of every group that imports it. Modules are assigned
//! to a group's chunk unless every parent path already has them loaded.

use std::collections::{BTreeSet, VecDeque};

use bale_config::RuntimeChunkMode;
use bale_graph::{DependencyKind, ModuleGraph, ModuleIdentifier, RuntimeName};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;

use super::{ChunkGraph, ChunkGroupKind, ChunkGroupUkey, ChunkKind, ChunkUkey};
use crate::entry::EntryOptions;

/// Modules a group needs synchronously, and the modules it can load on demand.
#[derive(Debug, Default)]
pub(super) struct GroupClosure {
    pub modules: IndexSet<ModuleIdentifier>,
    pub async_targets: IndexSet<ModuleIdentifier>,
}

/// Breadth-first walk over static, active connections to built modules.
pub(super) fn sync_closure(
    graph: &ModuleGraph,
    root: &ModuleIdentifier,
    runtime: &RuntimeName,
) -> GroupClosure {
    let mut closure = GroupClosure::default();
    if !graph.contains_module(root) {
        return closure;
    }
    closure.modules.insert(root.clone());
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(current) = queue.pop_front() {
        for connection in graph.active_connections(&current, runtime) {
            if !graph.contains_module(&connection.target) {
                continue;
            }
            match connection.kind() {
                DependencyKind::Weak => {}
                DependencyKind::Dynamic => {
                    closure.async_targets.insert(connection.target);
                }
                DependencyKind::Static => {
                    if closure.modules.insert(connection.target.clone()) {
                        queue.push_back(connection.target);
                    }
                }
            }
        }
    }
    closure
}

/// Modules guaranteed loaded before each group runs: the intersection over
/// all parents of what the parent had available plus what it loads.
///
/// Solved as a fixed point from "everything" downwards so cycles between
/// async groups settle.
pub(super) fn compute_availability(
    chunks: &ChunkGraph,
    closures: &IndexMap<ChunkGroupUkey, GroupClosure>,
) -> FxHashMap<ChunkGroupUkey, BTreeSet<ModuleIdentifier>> {
    let mut available: FxHashMap<ChunkGroupUkey, Option<BTreeSet<ModuleIdentifier>>> = chunks
        .groups()
        .map(|g| (g.ukey, g.is_entrypoint().then(BTreeSet::new)))
        .collect();

    loop {
        let mut changed = false;
        for group in chunks.groups().filter(|g| !g.is_entrypoint()) {
            let mut merged: Option<BTreeSet<ModuleIdentifier>> = None;
            for parent in group.parents() {
                let Some(Some(parent_available)) = available.get(&parent) else {
                    continue;
                };
                let mut offered = parent_available.clone();
                if let Some(closure) = closures.get(&parent) {
                    offered.extend(closure.modules.iter().cloned());
                }
                merged = Some(match merged {
                    None => offered,
                    Some(acc) => acc.intersection(&offered).cloned().collect(),
                });
            }
            if merged.is_some() && available.get(&group.ukey) != Some(&merged) {
                available.insert(group.ukey, merged);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    available
        .into_iter()
        .map(|(g, set)| (g, set.unwrap_or_default()))
        .collect()
}

/// Build the initial chunk graph for `entries`.
///
/// Entries whose module failed to build are skipped; the make phase has
/// already reported them.
#[tracing::instrument(skip_all, fields(entries = entries.len()))]
pub fn build_chunk_graph(
    graph: &ModuleGraph,
    entries: &[EntryOptions],
    runtime_mode: RuntimeChunkMode,
) -> ChunkGraph {
    let mut chunks = ChunkGraph::new();
    let mut main_chunks: FxHashMap<ChunkGroupUkey, ChunkUkey> = FxHashMap::default();
    let mut queue = VecDeque::new();

    for entry in entries {
        let Some(connection) = graph.entry_connection(&entry.name) else {
            continue;
        };
        if !graph.contains_module(&connection.target) {
            continue;
        }
        let owner = (!entry.share_chunks).then(|| entry.name.clone());
        let group = chunks.add_group(
            ChunkGroupKind::Entrypoint {
                name: entry.name.clone(),
            },
            connection.target,
            entry.runtime.clone(),
            owner,
        );
        let chunk = chunks.add_chunk(
            Some(entry.name.clone()),
            ChunkKind::Entry,
            entry.runtime.clone(),
            entry.share_chunks,
        );
        chunks.connect_chunk_and_group(chunk, group);
        main_chunks.insert(group, chunk);
        queue.push_back(group);
    }

    let mut closures: IndexMap<ChunkGroupUkey, GroupClosure> = IndexMap::new();
    while let Some(group) = queue.pop_front() {
        let Some((root, runtime, owner)) = chunks
            .group(group)
            .map(|g| (g.root.clone(), g.runtime.clone(), g.owner.clone()))
        else {
            continue;
        };
        let closure = sync_closure(graph, &root, &runtime);

        for target in &closure.async_targets {
            let child = match chunks.async_group(target, &runtime, owner.as_deref()) {
                Some(existing) => existing,
                None => {
                    let child = chunks.add_group(
                        ChunkGroupKind::Async,
                        target.clone(),
                        runtime.clone(),
                        owner.clone(),
                    );
                    let chunk =
                        chunks.add_chunk(None, ChunkKind::Async, runtime.clone(), owner.is_none());
                    chunks.connect_chunk_and_group(chunk, child);
                    main_chunks.insert(child, chunk);
                    queue.push_back(child);
                    child
                }
            };
            chunks.connect_groups(group, child);
        }
        closures.insert(group, closure);
    }

    let available = compute_availability(&chunks, &closures);
    for (group, closure) in &closures {
        let Some(&chunk) = main_chunks.get(group) else {
            continue;
        };
        let skip = available.get(group);
        for module in &closure.modules {
            if !skip.is_some_and(|set| set.contains(module)) {
                chunks.connect_chunk_and_module(chunk, module.clone());
            }
        }
    }

    add_runtime_chunks(&mut chunks, runtime_mode);
    tracing::debug!(
        chunks = chunks.chunk_count(),
        groups = closures.len(),
        "built chunk graph"
    );
    chunks
}

fn add_runtime_chunks(chunks: &mut ChunkGraph, mode: RuntimeChunkMode) {
    let entrypoints: Vec<_> = chunks
        .entrypoints()
        .map(|(name, g)| (name.to_string(), g.ukey, g.runtime.clone()))
        .collect();

    match mode {
        RuntimeChunkMode::Embedded => {
            for (_, group, _) in entrypoints {
                if let Some(main) = chunks.group_main_chunk(group) {
                    chunks.set_runtime_chunk(group, main);
                }
            }
        }
        RuntimeChunkMode::Single => {
            let mut by_runtime: IndexMap<RuntimeName, ChunkUkey> = IndexMap::new();
            for (_, group, runtime) in entrypoints {
                let chunk = *by_runtime.entry(runtime.clone()).or_insert_with(|| {
                    chunks.add_chunk(
                        Some(runtime.as_str().to_string()),
                        ChunkKind::Runtime,
                        runtime.clone(),
                        false,
                    )
                });
                chunks.set_runtime_chunk(group, chunk);
            }
        }
        RuntimeChunkMode::PerEntry => {
            for (name, group, runtime) in entrypoints {
                let chunk = chunks.add_chunk(Some(name), ChunkKind::Runtime, runtime, false);
                chunks.set_runtime_chunk(group, chunk);
            }
        }
    }
}
