//! Shared chunk extraction.
//!
//! Modules are grouped by the set of chunks they sit in, once per cache
//! group, into candidates keyed by `(cache group, runtime, source chunks)`.
//! The best candidate is applied, candidates are recomputed, and this repeats
//! until none qualifies. Moved modules land in a `Shared` chunk, which is
//! never a split source itself, so the loop terminates.
//!
//! Candidates are ranked by, in order: higher cache-group priority, larger
//! total size, cache-group key, then the sorted labels of the source chunks.
//!
//! A concatenated scope moves as one unit with its root.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use bale_config::{CacheGroup, ChunkSelection, SplitChunksConfig};
use bale_graph::{ModuleGraph, ModuleIdentifier, RuntimeName};

use crate::chunk_graph::{ChunkGraph, ChunkKind, ChunkUkey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Names of chunks created (or extended) by cache groups, in order.
    pub created: Vec<String>,
    /// Module moves, counting each module once per application.
    pub moved_modules: usize,
    /// Extra chunks produced by `max_size` splitting.
    pub max_size_parts: usize,
    /// Chunks dropped because they ended up empty.
    pub removed_empty: usize,
}

/// Modules that move together: a concatenated scope or a single module.
#[derive(Debug, Clone)]
struct Unit {
    root: ModuleIdentifier,
    modules: Vec<ModuleIdentifier>,
    size: usize,
}

#[derive(Debug)]
struct Candidate<'a> {
    group: &'a CacheGroup,
    runtime: RuntimeName,
    sources: Vec<ChunkUkey>,
    labels: Vec<String>,
    units: Vec<ModuleIdentifier>,
    size: usize,
}

impl Candidate<'_> {
    fn rank(&self) -> (Reverse<i32>, Reverse<usize>, &str, &[String], &str) {
        (
            Reverse(self.group.priority),
            Reverse(self.size),
            &self.group.key,
            &self.labels,
            self.runtime.as_str(),
        )
    }

    fn chunk_name(&self) -> String {
        match &self.group.name {
            Some(name) => name.clone(),
            None => {
                let mut name = self.group.key.clone();
                for label in &self.labels {
                    name.push('~');
                    name.push_str(label);
                }
                name
            }
        }
    }
}

#[tracing::instrument(skip_all, fields(cache_groups = config.cache_groups.len()))]
pub fn split_chunks(
    graph: &ModuleGraph,
    chunks: &mut ChunkGraph,
    config: &SplitChunksConfig,
    remove_empty: bool,
) -> SplitReport {
    let mut report = SplitReport::default();

    if config.enabled {
        while let Some(applied) = apply_best_candidate(graph, chunks, config) {
            report.moved_modules += applied.1;
            if !report.created.contains(&applied.0) {
                report.created.push(applied.0);
            }
        }
        report.max_size_parts = enforce_max_size(graph, chunks, config);
    }

    if remove_empty {
        report.removed_empty = remove_empty_chunks(chunks);
    }

    tracing::debug!(
        created = report.created.len(),
        moved = report.moved_modules,
        parts = report.max_size_parts,
        removed = report.removed_empty,
        "split chunks finished"
    );
    report
}

/// Units of every placed module, keyed by root.
fn units(graph: &ModuleGraph, chunks: &ChunkGraph) -> BTreeMap<ModuleIdentifier, Unit> {
    let mut units = BTreeMap::new();
    for module in chunks.modules() {
        if chunks.is_concatenated_inner(&module) {
            continue;
        }
        let modules = chunks
            .concatenation_of(&module)
            .map(|c| c.modules().cloned().collect::<Vec<_>>())
            .unwrap_or_else(|| vec![module.clone()]);
        let size = modules
            .iter()
            .filter_map(|m| graph.module(m))
            .map(|m| m.size())
            .sum();
        units.insert(
            module.clone(),
            Unit {
                root: module,
                modules,
                size,
            },
        );
    }
    units
}

fn selectable(chunks: &ChunkGraph, chunk: ChunkUkey, selection: ChunkSelection) -> bool {
    let Some(c) = chunks.chunk(chunk) else {
        return false;
    };
    if !c.shareable {
        return false;
    }
    match (c.kind, selection) {
        (ChunkKind::Shared | ChunkKind::Runtime, _) => false,
        (ChunkKind::Entry, ChunkSelection::All | ChunkSelection::Initial) => true,
        (ChunkKind::Async, ChunkSelection::All | ChunkSelection::Async) => true,
        _ => false,
    }
}

fn collect_candidates<'a>(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    config: &'a SplitChunksConfig,
) -> Vec<Candidate<'a>> {
    let units = units(graph, chunks);
    let mut candidates = Vec::new();

    for group in &config.cache_groups {
        let min_size = group.min_size.unwrap_or(config.min_size);
        let mut by_key: BTreeMap<(RuntimeName, Vec<ChunkUkey>), (Vec<ModuleIdentifier>, usize)> =
            BTreeMap::new();

        for unit in units.values() {
            if !group.matches(unit.root.as_str()) {
                continue;
            }
            let mut per_runtime: BTreeMap<RuntimeName, Vec<ChunkUkey>> = BTreeMap::new();
            for chunk in chunks.module_chunks(&unit.root) {
                if !selectable(chunks, chunk, group.chunks) {
                    continue;
                }
                if let Some(c) = chunks.chunk(chunk) {
                    per_runtime.entry(c.runtime.clone()).or_default().push(chunk);
                }
            }
            for (runtime, sources) in per_runtime {
                if sources.len() < group.min_chunks {
                    continue;
                }
                let slot = by_key.entry((runtime, sources)).or_default();
                slot.0.push(unit.root.clone());
                slot.1 += unit.size;
            }
        }

        for ((runtime, sources), (units, size)) in by_key {
            if size < min_size {
                continue;
            }
            let mut labels: Vec<String> = sources.iter().map(|c| chunks.chunk_label(*c)).collect();
            labels.sort();
            candidates.push(Candidate {
                group,
                runtime,
                sources,
                labels,
                units,
                size,
            });
        }
    }
    candidates
}

/// Apply the best candidate. Returns the target chunk name and the number
/// of modules moved.
fn apply_best_candidate(
    graph: &ModuleGraph,
    chunks: &mut ChunkGraph,
    config: &SplitChunksConfig,
) -> Option<(String, usize)> {
    let candidates = collect_candidates(graph, chunks, config);
    let best = candidates.iter().min_by(|a, b| a.rank().cmp(&b.rank()))?;

    let name = best.chunk_name();
    let existing = chunks
        .chunks()
        .find(|c| {
            c.kind == ChunkKind::Shared
                && c.runtime == best.runtime
                && c.name.as_deref() == Some(name.as_str())
        })
        .map(|c| c.ukey);
    let target = match existing {
        Some(existing) => existing,
        None => {
            let ukey = chunks.add_chunk(
                Some(name.clone()),
                ChunkKind::Shared,
                best.runtime.clone(),
                false,
            );
            if let Some(chunk) = chunks.chunk_mut(ukey) {
                chunk.cache_group = Some(best.group.key.clone());
            }
            ukey
        }
    };

    for source in &best.sources {
        let groups: Vec<_> = chunks
            .chunk(*source)
            .map(|c| c.groups().collect())
            .unwrap_or_default();
        for group in groups {
            chunks.connect_chunk_and_group(target, group);
        }
    }

    let mut moved = 0;
    for root in &best.units {
        let members = chunks
            .concatenation_of(root)
            .map(|c| c.modules().cloned().collect::<Vec<_>>())
            .unwrap_or_else(|| vec![root.clone()]);
        for module in members {
            for source in &best.sources {
                chunks.disconnect_chunk_and_module(*source, &module);
            }
            chunks.connect_chunk_and_module(target, module);
            moved += 1;
        }
    }

    tracing::debug!(
        cache_group = %best.group.key,
        chunk = %name,
        sources = best.sources.len(),
        modules = moved,
        "extracted shared chunk"
    );
    Some((name, moved))
}

/// Split chunks above their size limit into parts of whole units, filled in
/// identifier order. Returns the number of parts created.
fn enforce_max_size(graph: &ModuleGraph, chunks: &mut ChunkGraph, config: &SplitChunksConfig) -> usize {
    let mut created = 0;
    for ukey in chunks.chunk_keys() {
        let Some(chunk) = chunks.chunk(ukey) else {
            continue;
        };
        let limit = chunk
            .cache_group
            .as_ref()
            .and_then(|key| config.cache_groups.iter().find(|g| &g.key == key))
            .and_then(|g| g.max_size)
            .or(config.max_size);
        let Some(limit) = limit else {
            continue;
        };
        if chunk.kind == ChunkKind::Runtime || chunks.chunk_size(ukey, graph) <= limit {
            continue;
        }
        let runtime = chunk.runtime.clone();
        let groups: Vec<_> = chunk.groups().collect();
        let label = chunks.chunk_label(ukey);

        let members: BTreeSet<ModuleIdentifier> = chunks.chunk_modules(ukey).into_iter().collect();
        let units: Vec<Unit> = units(graph, chunks)
            .into_values()
            .filter(|u| members.contains(&u.root))
            .collect();
        if units.len() < 2 {
            continue;
        }

        let mut parts: Vec<Vec<&Unit>> = vec![Vec::new()];
        let mut current = 0;
        for unit in &units {
            let fits = current + unit.size <= limit;
            let last = parts.len() - 1;
            if !fits && !parts[last].is_empty() {
                parts.push(Vec::new());
                current = 0;
            }
            let last = parts.len() - 1;
            parts[last].push(unit);
            current += unit.size;
        }

        for (index, part) in parts.iter().enumerate().skip(1) {
            let part_chunk = chunks.add_chunk(
                Some(format!("{label}-{index}")),
                ChunkKind::Shared,
                runtime.clone(),
                false,
            );
            for group in &groups {
                chunks.connect_chunk_and_group(part_chunk, *group);
            }
            for unit in part {
                for module in &unit.modules {
                    chunks.disconnect_chunk_and_module(ukey, module);
                    chunks.connect_chunk_and_module(part_chunk, module.clone());
                }
            }
            created += 1;
        }
        tracing::debug!(chunk = %label, parts = parts.len(), limit, "split oversized chunk");
    }
    created
}

/// Drop async and shared chunks without modules.
fn remove_empty_chunks(chunks: &mut ChunkGraph) -> usize {
    let empty: Vec<_> = chunks
        .chunks()
        .filter(|c| matches!(c.kind, ChunkKind::Async | ChunkKind::Shared))
        .filter(|c| chunks.chunk_module_count(c.ukey) == 0)
        .map(|c| c.ukey)
        .collect();
    for ukey in &empty {
        chunks.remove_chunk(*ukey);
    }
    empty.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_graph::build_chunk_graph;
    use crate::entry::EntryOptions;
    use crate::optimize::concatenate_modules;
    use crate::test_support::{link, sized};
    use bale_config::RuntimeChunkMode;
    use bale_graph::Dependency;

    fn id(s: &str) -> ModuleIdentifier {
        ModuleIdentifier::new(s)
    }

    fn only_shared() -> SplitChunksConfig {
        SplitChunksConfig {
            cache_groups: vec![CacheGroup::shared()],
            ..SplitChunksConfig::default()
        }
    }

    fn two_entries_sharing_m() -> (ModuleGraph, Vec<EntryOptions>) {
        let entries = vec![
            EntryOptions::new("a", "a.js"),
            EntryOptions::new("b", "b.js"),
        ];
        let graph = link(
            vec![
                sized("a.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized("b.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized("m.js", 50, vec![]),
            ],
            &entries,
        );
        (graph, entries)
    }

    #[test]
    fn module_shared_by_two_entries_is_extracted_once() {
        let (graph, entries) = two_entries_sharing_m();
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);

        let report = split_chunks(&graph, &mut chunks, &only_shared(), true);
        assert_eq!(report.created, vec!["shared~a~b".to_string()]);

        let holders = chunks.module_chunks(&id("m.js"));
        assert_eq!(holders.len(), 1);
        let shared = chunks.chunk(holders[0]).unwrap();
        assert_eq!(shared.kind, ChunkKind::Shared);
        assert_eq!(shared.cache_group.as_deref(), Some("shared"));
        for name in ["a", "b"] {
            let group = chunks.entrypoint(name).unwrap();
            assert!(group.chunks().contains(&holders[0]));
        }
        chunks.validate(&graph).unwrap();
    }

    #[test]
    fn min_size_blocks_small_candidates() {
        let (graph, entries) = two_entries_sharing_m();
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        let config = SplitChunksConfig {
            min_size: 100,
            ..only_shared()
        };

        let report = split_chunks(&graph, &mut chunks, &config, true);
        assert!(report.created.is_empty());
        assert_eq!(chunks.module_chunks(&id("m.js")).len(), 2);
    }

    #[test]
    fn standalone_entries_keep_their_modules() {
        let entries = vec![
            EntryOptions::new("a", "a.js").standalone(),
            EntryOptions::new("b", "b.js"),
        ];
        let graph = link(
            vec![
                sized("a.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized("b.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized("m.js", 50, vec![]),
            ],
            &entries,
        );
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);

        let report = split_chunks(&graph, &mut chunks, &only_shared(), true);
        assert!(report.created.is_empty());
    }

    #[test]
    fn higher_priority_group_claims_first() {
        let entries = vec![
            EntryOptions::new("a", "a.js"),
            EntryOptions::new("b", "b.js"),
        ];
        let graph = link(
            vec![
                sized(
                    "a.js",
                    10,
                    vec![Dependency::static_import("./node_modules/lib/index.js", ["x"])],
                ),
                sized(
                    "b.js",
                    10,
                    vec![Dependency::static_import("./node_modules/lib/index.js", ["x"])],
                ),
                sized("node_modules/lib/index.js", 10, vec![]),
            ],
            &entries,
        );
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);

        let report = split_chunks(&graph, &mut chunks, &SplitChunksConfig::default(), true);
        assert_eq!(report.created, vec!["vendors~a~b".to_string()]);
        chunks.validate(&graph).unwrap();
    }

    #[test]
    fn named_group_reuses_its_chunk_across_source_sets() {
        let entries = vec![
            EntryOptions::new("a", "a.js"),
            EntryOptions::new("b", "b.js"),
            EntryOptions::new("c", "c.js"),
        ];
        let graph = link(
            vec![
                sized("a.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized(
                    "b.js",
                    10,
                    vec![
                        Dependency::static_import("./m.js", ["m"]),
                        Dependency::static_import("./n.js", ["n"]),
                    ],
                ),
                sized("c.js", 10, vec![Dependency::static_import("./n.js", ["n"])]),
                sized("m.js", 50, vec![]),
                sized("n.js", 40, vec![]),
            ],
            &entries,
        );
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        let config = SplitChunksConfig {
            cache_groups: vec![CacheGroup {
                name: Some("common".into()),
                ..CacheGroup::shared()
            }],
            ..SplitChunksConfig::default()
        };

        let report = split_chunks(&graph, &mut chunks, &config, true);
        assert_eq!(report.created, vec!["common".to_string()]);
        let common = chunks.chunk_by_name("common").unwrap().ukey;
        assert_eq!(chunks.module_chunks(&id("m.js")), vec![common]);
        assert_eq!(chunks.module_chunks(&id("n.js")), vec![common]);
        for name in ["a", "b", "c"] {
            assert!(chunks.entrypoint(name).unwrap().chunks().contains(&common));
        }
        chunks.validate(&graph).unwrap();
    }

    #[test]
    fn concatenated_scopes_move_as_a_unit() {
        let entries = vec![
            EntryOptions::new("a", "a.js"),
            EntryOptions::new("b", "b.js"),
        ];
        let graph = link(
            vec![
                sized("a.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized("b.js", 10, vec![Dependency::static_import("./m.js", ["m"])]),
                sized("m.js", 10, vec![Dependency::static_import("./inner.js", ["i"])]),
                sized("inner.js", 10, vec![]),
            ],
            &entries,
        );
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        concatenate_modules(&graph, &mut chunks, &[]);
        assert!(chunks.is_concatenated_inner(&id("inner.js")));

        split_chunks(&graph, &mut chunks, &only_shared(), true);
        assert_eq!(
            chunks.module_chunks(&id("m.js")),
            chunks.module_chunks(&id("inner.js"))
        );
        chunks.validate(&graph).unwrap();
    }

    #[test]
    fn oversized_chunks_split_by_identifier() {
        let entries = vec![EntryOptions::new("main", "index.js")];
        let graph = link(
            vec![
                sized(
                    "index.js",
                    10,
                    vec![
                        Dependency::static_import("./b.js", ["b"]),
                        Dependency::static_import("./a.js", ["a"]),
                    ],
                ),
                sized("a.js", 40, vec![]),
                sized("b.js", 40, vec![]),
            ],
            &entries,
        );
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        let config = SplitChunksConfig {
            max_size: Some(60),
            cache_groups: Vec::new(),
            ..SplitChunksConfig::default()
        };

        let report = split_chunks(&graph, &mut chunks, &config, true);
        assert_eq!(report.max_size_parts, 1);
        let main = chunks.chunk_by_name("main").unwrap().ukey;
        assert_eq!(chunks.chunk_modules(main), vec![id("a.js")]);
        let part = chunks.chunk_by_name("main-1").unwrap().ukey;
        assert_eq!(chunks.chunk_modules(part), vec![id("b.js"), id("index.js")]);
        chunks.validate(&graph).unwrap();
    }
}
