//! Module and chunk id assignment.
//!
//! Runs after every optimisation pass, so ids depend only on the final
//! graph. Strategies:
//!
//! - `natural`: position in first-reachable order;
//! - `named`: the module identifier or chunk name;
//! - `deterministic`: blake3 of the name, truncated to `hash_length` hex
//!   characters and extended one character at a time for keys that collide.

use std::collections::BTreeMap;

use bale_config::IdStrategy;
use bale_graph::{ModuleGraph, ModuleIdentifier};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::chunk_graph::ChunkGraph;

const FULL_HASH_LEN: usize = 64;

pub fn assign_module_ids(
    graph: &ModuleGraph,
    chunks: &mut ChunkGraph,
    strategy: IdStrategy,
    hash_length: usize,
) {
    let placed = chunks.modules();
    let ids: Vec<(ModuleIdentifier, String)> = match strategy {
        IdStrategy::Natural => natural_module_order(graph, chunks, &placed)
            .into_iter()
            .enumerate()
            .map(|(i, m)| (m, i.to_string()))
            .collect(),
        IdStrategy::Named => placed
            .into_iter()
            .map(|m| {
                let id = m.as_str().to_string();
                (m, id)
            })
            .collect(),
        IdStrategy::Deterministic => {
            let keys: Vec<String> = placed.iter().map(|m| m.as_str().to_string()).collect();
            let mut ids = deterministic_ids(&keys, hash_length);
            placed
                .into_iter()
                .filter_map(|m| ids.remove(m.as_str()).map(|id| (m, id)))
                .collect()
        }
    };
    tracing::debug!(modules = ids.len(), ?strategy, "assigned module ids");
    for (module, id) in ids {
        chunks.set_module_id(module, id);
    }
}

/// Placed modules in first-reachable order from the entrypoints, followed by
/// any placed module the walk missed, sorted.
fn natural_module_order(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    placed: &[ModuleIdentifier],
) -> Vec<ModuleIdentifier> {
    let roots: Vec<_> = chunks.entrypoints().map(|(_, g)| g.root.clone()).collect();
    let placed_set: FxHashSet<_> = placed.iter().collect();
    let mut order: Vec<_> = graph
        .reachable_from(&roots, None)
        .into_iter()
        .filter(|m| placed_set.contains(m))
        .collect();
    let seen: FxHashSet<_> = order.iter().cloned().collect();
    order.extend(placed.iter().filter(|m| !seen.contains(*m)).cloned());
    order
}

pub fn assign_chunk_ids(chunks: &mut ChunkGraph, strategy: IdStrategy, hash_length: usize) {
    let keys = chunks.chunk_keys();
    let ids: Vec<String> = match strategy {
        IdStrategy::Natural => (0..keys.len()).map(|i| i.to_string()).collect(),
        IdStrategy::Named => {
            let mut taken = FxHashSet::default();
            keys.iter()
                .map(|ukey| {
                    let label = chunks.chunk_label(*ukey);
                    let kind = chunks.chunk(*ukey).map(|c| c.kind.as_str()).unwrap_or("chunk");
                    unique_name(&mut taken, label, kind)
                })
                .collect()
        }
        IdStrategy::Deterministic => {
            let names = disambiguate(keys.iter().map(|ukey| chunk_key(chunks, *ukey)).collect());
            let ids = deterministic_ids(&names, hash_length);
            names
                .iter()
                .map(|name| match ids.get(name) {
                    Some(id) => id.clone(),
                    None => blake3::hash(name.as_bytes()).to_hex()[..FULL_HASH_LEN].to_string(),
                })
                .collect()
        }
    };
    for (ukey, id) in keys.into_iter().zip(ids) {
        if let Some(chunk) = chunks.chunk_mut(ukey) {
            chunk.id = Some(id);
        }
    }
    tracing::debug!(chunks = chunks.chunk_count(), ?strategy, "assigned chunk ids");
}

/// Stable hashing key of a chunk: kind, runtime and owning entry plus the
/// name, or the sorted module identifiers when unnamed.
fn chunk_key(chunks: &ChunkGraph, ukey: crate::chunk_graph::ChunkUkey) -> String {
    let Some(chunk) = chunks.chunk(ukey) else {
        return ukey.to_string();
    };
    let owner = chunk
        .groups()
        .find_map(|g| chunks.group(g).and_then(|g| g.owner.clone()))
        .unwrap_or_default();
    let body = match &chunk.name {
        Some(name) => name.clone(),
        None => {
            let modules = chunks.chunk_modules(ukey);
            if modules.is_empty() {
                chunks.chunk_label(ukey)
            } else {
                modules
                    .iter()
                    .map(ModuleIdentifier::as_str)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    };
    format!("{}:{}:{owner}:{body}", chunk.kind.as_str(), chunk.runtime)
}

/// Suffix repeated keys with an occurrence number so every chunk hashes
/// from a distinct key. The first occurrence keeps its key.
fn disambiguate(keys: Vec<String>) -> Vec<String> {
    let mut taken: FxHashSet<String> = keys.iter().cloned().collect();
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    keys.into_iter()
        .map(|key| {
            let count = seen.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                return key;
            }
            let mut n = *count;
            loop {
                let candidate = format!("{key}#{n}");
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn unique_name(taken: &mut FxHashSet<String>, label: String, kind: &str) -> String {
    if taken.insert(label.clone()) {
        return label;
    }
    let with_kind = format!("{label}~{kind}");
    if taken.insert(with_kind.clone()) {
        return with_kind;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{with_kind}-{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Short unique hash ids for `keys`.
///
/// Keys are processed in sorted order. Every key starts at `length` hex
/// characters; keys whose prefix collides with another key's are extended
/// together until each prefix is unique. Equal keys share one id, so
/// callers pass distinct keys.
///
/// ```
/// let keys = vec!["src/a.js".to_string(), "src/b.js".to_string()];
/// let ids = bale_bundler::ids::deterministic_ids(&keys, 4);
/// assert_eq!(ids["src/a.js"].len(), 4);
/// assert_ne!(ids["src/a.js"], ids["src/b.js"]);
/// ```
pub fn deterministic_ids(keys: &[String], length: usize) -> BTreeMap<String, String> {
    let mut sorted: Vec<&String> = keys.iter().collect();
    sorted.sort();
    sorted.dedup();
    let hashes: BTreeMap<&String, String> = sorted
        .iter()
        .map(|k| (*k, blake3::hash(k.as_bytes()).to_hex().to_string()))
        .collect();

    let mut assigned = BTreeMap::new();
    let mut taken: FxHashSet<String> = FxHashSet::default();
    let mut remaining = sorted;
    let mut len = length.clamp(1, FULL_HASH_LEN);

    while !remaining.is_empty() {
        if len > FULL_HASH_LEN {
            for (i, key) in remaining.into_iter().enumerate() {
                assigned.insert(key.clone(), format!("{}-{i}", hashes[key]));
            }
            break;
        }
        let mut by_prefix: BTreeMap<String, Vec<&String>> = BTreeMap::new();
        for key in &remaining {
            by_prefix
                .entry(hashes[*key][..len].to_string())
                .or_default()
                .push(*key);
        }
        let mut next = Vec::new();
        for (prefix, group) in by_prefix {
            if group.len() == 1 && !taken.contains(&prefix) {
                taken.insert(prefix.clone());
                assigned.insert(group[0].clone(), prefix);
            } else {
                next.extend(group);
            }
        }
        remaining = next;
        len += 1;
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_graph::build_chunk_graph;
    use crate::entry::EntryOptions;
    use crate::test_support::{link, sized};
    use bale_config::RuntimeChunkMode;
    use bale_graph::Dependency;

    fn fixture() -> (ModuleGraph, ChunkGraph) {
        let entries = [EntryOptions::new("main", "index.js")];
        let graph = link(
            vec![
                sized(
                    "index.js",
                    10,
                    vec![
                        Dependency::static_import("./z.js", ["z"]),
                        Dependency::dynamic_import("./a.js"),
                    ],
                ),
                sized("z.js", 10, vec![]),
                sized("a.js", 10, vec![]),
            ],
            &entries,
        );
        let chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        (graph, chunks)
    }

    #[test]
    fn natural_ids_follow_reachability() {
        let (graph, mut chunks) = fixture();
        assign_module_ids(&graph, &mut chunks, IdStrategy::Natural, 4);
        assert_eq!(chunks.module_id(&"index.js".into()), Some("0"));
        assert_eq!(chunks.module_id(&"z.js".into()), Some("1"));
        assert_eq!(chunks.module_id(&"a.js".into()), Some("2"));
    }

    #[test]
    fn named_ids_use_identifiers_and_names() {
        let (graph, mut chunks) = fixture();
        assign_module_ids(&graph, &mut chunks, IdStrategy::Named, 4);
        assign_chunk_ids(&mut chunks, IdStrategy::Named, 4);
        assert_eq!(chunks.module_id(&"z.js".into()), Some("z.js"));
        assert!(chunks.chunk_by_id("main").is_some());
        assert!(chunks.chunk_by_id("a").is_some());
    }

    #[test]
    fn deterministic_ids_are_stable() {
        let (graph, mut first) = fixture();
        let (_, mut second) = fixture();
        assign_module_ids(&graph, &mut first, IdStrategy::Deterministic, 4);
        assign_module_ids(&graph, &mut second, IdStrategy::Deterministic, 4);
        assign_chunk_ids(&mut first, IdStrategy::Deterministic, 4);
        assign_chunk_ids(&mut second, IdStrategy::Deterministic, 4);
        for module in first.modules() {
            assert_eq!(first.module_id(&module), second.module_id(&module));
            assert_eq!(first.module_id(&module).map(str::len), Some(4));
        }
        let ids = |c: &ChunkGraph| c.chunks().map(|c| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn collisions_extend_only_colliding_keys() {
        // 17 keys over 16 one-character prefixes must collide.
        let keys: Vec<String> = (0..17).map(|i| format!("module-{i}.js")).collect();
        let ids = deterministic_ids(&keys, 1);
        assert_eq!(ids.len(), 17);
        let unique: FxHashSet<_> = ids.values().collect();
        assert_eq!(unique.len(), 17);
        assert!(ids.values().any(|id| id.len() > 1));
        for (key, id) in &ids {
            let full = blake3::hash(key.as_bytes()).to_hex().to_string();
            assert!(full.starts_with(id.as_str()));
        }
    }

    #[test]
    fn standalone_entries_sharing_a_dynamic_import_get_hashed_ids() {
        let entries = [
            EntryOptions::new("a", "a.js").standalone(),
            EntryOptions::new("b", "b.js").standalone(),
        ];
        let graph = link(
            vec![
                sized("a.js", 1, vec![Dependency::dynamic_import("./lazy.js")]),
                sized("b.js", 1, vec![Dependency::dynamic_import("./lazy.js")]),
                sized("lazy.js", 1, vec![Dependency::static_import("./dep.js", ["d"])]),
                sized("dep.js", 1, vec![]),
            ],
            &entries,
        );
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        assign_chunk_ids(&mut chunks, IdStrategy::Deterministic, 4);

        let ids: Vec<String> = chunks.chunks().filter_map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 4);
        let unique: FxHashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 4);
        for id in &ids {
            assert!(id.len() <= 8, "{id:?} is not a short hash");
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()), "{id:?}");
        }
    }

    #[test]
    fn repeated_keys_are_made_distinct() {
        let keys = vec!["k".to_string(), "k".to_string(), "k#2".to_string()];
        let distinct = disambiguate(keys);
        assert_eq!(distinct[0], "k");
        assert_eq!(distinct[2], "k#2");
        assert_eq!(distinct[1], "k#3");
    }

    #[test]
    fn same_name_of_different_kinds_gets_distinct_ids() {
        let mut taken = FxHashSet::default();
        assert_eq!(unique_name(&mut taken, "main".into(), "entry"), "main");
        assert_eq!(unique_name(&mut taken, "main".into(), "runtime"), "main~runtime");
    }
}
