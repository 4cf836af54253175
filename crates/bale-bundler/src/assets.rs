//! Chunk rendering and content hashing.
//!
//! File names are decided before code generation with a placeholder where
//! the content hash goes, so a chunk can name the files it loads without
//! knowing their hashes. After rendering, each chunk's own hash covers its
//! placeholder content; its final hash combines that with the own hashes of
//! every chunk it transitively references. Placeholders are substituted last.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use bale_config::OutputConfig;
use bale_graph::{ModuleGraph, ModuleIdentifier};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::cache::{CacheLookup, CachedChunk, Etag, IncrementalCache};
use crate::chunk_graph::{ChunkGraph, ChunkKind, ChunkUkey};
use crate::codegen::{CodeGenerationResults, RuntimeRequirement};
use crate::runtime::{CHUNK_REGISTRY, RUNTIME_FINGERPRINT, render_runtime};

/// One emitted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub filename: String,
    pub chunk_id: String,
    pub content: String,
    /// Final content hash, truncated to the configured length.
    pub hash: String,
    pub modules: Vec<ModuleIdentifier>,
    /// Content came from the incremental cache.
    pub cached: bool,
}

#[derive(Debug, Default)]
pub struct RenderedAssets {
    /// Sorted by file name.
    pub assets: Vec<Asset>,
    pub rendered: usize,
    pub reused: usize,
    /// Corrupt chunk entries that were rendered again.
    pub recovered: usize,
}

/// Placeholder for the content hash of the chunk with id `chunk_id`.
///
/// Fixed width, so no placeholder is a prefix of another.
pub fn hash_placeholder(chunk_id: &str) -> String {
    let digest = blake3::hash(chunk_id.as_bytes()).to_hex();
    format!("__BALE_HASH_{}__", &digest[..16])
}

/// File name of every chunk with the content hash left as a placeholder.
///
/// Chunk ids must be assigned.
pub fn chunk_filenames(chunks: &ChunkGraph, output: &OutputConfig) -> FxHashMap<ChunkUkey, String> {
    chunks
        .chunks()
        .map(|chunk| {
            let template = match chunk.kind {
                ChunkKind::Entry => &output.filename,
                ChunkKind::Runtime => &output.runtime_filename,
                ChunkKind::Async | ChunkKind::Shared => &output.chunk_filename,
            };
            let id = chunk.id_or_key();
            let filename = template
                .replace("[name]", &chunks.chunk_label(chunk.ukey))
                .replace("[id]", &id)
                .replace("[contenthash]", &hash_placeholder(&id));
            (chunk.ukey, filename)
        })
        .collect()
}

/// Inputs of [`render_assets`].
pub struct AssetContext<'a> {
    pub graph: &'a ModuleGraph,
    pub chunks: &'a ChunkGraph,
    pub codegen: &'a CodeGenerationResults,
    pub output: &'a OutputConfig,
    pub filenames: &'a FxHashMap<ChunkUkey, String>,
    /// Etag of the configuration and code generator. Part of every chunk etag.
    pub fingerprint: &'a Etag,
}

/// Chunk rendered with placeholders still in place.
struct Rendered {
    id: String,
    filename: String,
    cached: CachedChunk,
    from_cache: bool,
}

/// Render every chunk, reusing cached renderings whose etag matches.
#[tracing::instrument(skip_all, fields(chunks = ctx.chunks.chunk_count()))]
pub fn render_assets(
    ctx: &AssetContext<'_>,
    mut cache: Option<&mut IncrementalCache>,
) -> crate::Result<RenderedAssets> {
    let mut report = RenderedAssets::default();
    let hosted = hosted_requirements(ctx);

    let mut rendered = Vec::new();
    for ukey in ctx.chunks.chunk_keys() {
        let Some(chunk) = ctx.chunks.chunk(ukey) else {
            continue;
        };
        let id = chunk.id_or_key();
        let filename = ctx.filenames.get(&ukey).cloned().unwrap_or_else(|| id.clone());
        let runtime = hosted.get(&ukey);
        let startup = startup_call(ctx, ukey);
        let etag = chunk_etag(ctx, ukey, runtime, startup.as_deref());

        let lookup = cache
            .as_deref_mut()
            .map_or(CacheLookup::Miss, |c| c.get_chunk(&etag));
        let (cached, from_cache) = match lookup {
            CacheLookup::Hit(cached) => (cached, true),
            other => {
                if matches!(other, CacheLookup::Corrupt(_)) {
                    report.recovered += 1;
                }
                let fresh = render_chunk(ctx, ukey, &id, runtime, startup.as_deref());
                if let Some(cache) = cache.as_deref_mut() {
                    cache.put_chunk(etag, &fresh)?;
                }
                (fresh, false)
            }
        };
        if from_cache {
            report.reused += 1;
        } else {
            report.rendered += 1;
        }
        rendered.push(Rendered {
            id,
            filename,
            cached,
            from_cache,
        });
    }

    let hashes = final_hashes(&rendered, ctx.output.hash_length);
    let placeholders: Vec<(String, &str)> = hashes
        .iter()
        .map(|(id, hash)| (hash_placeholder(id), hash.as_str()))
        .collect();

    for chunk in rendered {
        let mut content = chunk.cached.content;
        let mut filename = chunk.filename;
        for (placeholder, hash) in &placeholders {
            if content.contains(placeholder.as_str()) {
                content = content.replace(placeholder.as_str(), hash);
            }
            if filename.contains(placeholder.as_str()) {
                filename = filename.replace(placeholder.as_str(), hash);
            }
        }
        let hash = hashes.get(&chunk.id).cloned().unwrap_or_default();
        report.assets.push(Asset {
            filename,
            chunk_id: chunk.id,
            content,
            hash,
            modules: chunk.cached.modules,
            cached: chunk.from_cache,
        });
    }
    report.assets.sort_by(|a, b| a.filename.cmp(&b.filename));

    tracing::debug!(
        rendered = report.rendered,
        reused = report.reused,
        "assets rendered"
    );
    Ok(report)
}

/// Runtime requirements of each chunk that hosts a runtime: the union over
/// every chunk of the groups it serves and their descendants.
fn hosted_requirements(ctx: &AssetContext<'_>) -> BTreeMap<ChunkUkey, BTreeSet<RuntimeRequirement>> {
    let mut hosted: BTreeMap<ChunkUkey, BTreeSet<RuntimeRequirement>> = BTreeMap::new();
    for group in ctx.chunks.groups() {
        let Some(host) = group.runtime_chunk() else {
            continue;
        };
        let requirements = hosted.entry(host).or_default();
        requirements.insert(RuntimeRequirement::Startup);
        for descendant in ctx.chunks.descendant_groups(group.ukey) {
            let Some(g) = ctx.chunks.group(descendant) else {
                continue;
            };
            for chunk in g.chunks() {
                requirements.extend(chunk_requirements(ctx, *chunk));
            }
        }
    }
    hosted
}

fn chunk_requirements(ctx: &AssetContext<'_>, ukey: ChunkUkey) -> BTreeSet<RuntimeRequirement> {
    let Some(chunk) = ctx.chunks.chunk(ukey) else {
        return BTreeSet::new();
    };
    rendered_modules(ctx.chunks, ukey)
        .iter()
        .filter_map(|m| ctx.codegen.get(m, &chunk.runtime))
        .flat_map(|r| r.runtime_requirements.iter().copied())
        .collect()
}

/// Modules a chunk emits, by module id. Absorbed modules are emitted by
/// their scope root.
fn rendered_modules(chunks: &ChunkGraph, ukey: ChunkUkey) -> Vec<ModuleIdentifier> {
    let mut modules: Vec<_> = chunks
        .chunk_modules(ukey)
        .into_iter()
        .filter(|m| !chunks.is_concatenated_inner(m))
        .collect();
    modules.sort_by_cached_key(|m| chunks.module_id(m).unwrap_or(m.as_str()).to_string());
    modules
}

/// Startup call for the main chunk of an entrypoint.
fn startup_call(ctx: &AssetContext<'_>, ukey: ChunkUkey) -> Option<String> {
    let (_, group) = ctx
        .chunks
        .entrypoints()
        .find(|(_, g)| ctx.chunks.group_main_chunk(g.ukey) == Some(ukey))?;
    let mut ids: Vec<String> = group
        .chunks()
        .iter()
        .filter_map(|c| ctx.chunks.chunk(*c))
        .map(|c| c.id_or_key())
        .collect();
    ids.sort();
    let ids = serde_json::to_string(&ids).ok()?;
    let entry = ctx
        .chunks
        .module_id(&group.root)
        .unwrap_or(group.root.as_str());
    let entry = serde_json::to_string(entry).ok()?;
    Some(format!(
        "(__bale_require__) => __bale_require__.x({ids}, {entry})"
    ))
}

fn chunk_etag(
    ctx: &AssetContext<'_>,
    ukey: ChunkUkey,
    runtime: Option<&BTreeSet<RuntimeRequirement>>,
    startup: Option<&str>,
) -> Etag {
    let Some(chunk) = ctx.chunks.chunk(ukey) else {
        return Etag::builder().finish();
    };
    let members: Vec<Etag> = rendered_modules(ctx.chunks, ukey)
        .iter()
        .map(|m| {
            let source = ctx
                .codegen
                .get(m, &chunk.runtime)
                .map(|r| r.source.as_str())
                .unwrap_or_default();
            Etag::builder()
                .str(m.as_str())
                .str(ctx.chunks.module_id(m).unwrap_or_default())
                .str(source)
                .finish()
        })
        .collect();

    let mut builder = Etag::builder()
        .str(Etag::combine(&members).as_hex())
        .str(ctx.fingerprint.as_hex())
        .str(&chunk.id_or_key())
        .str(chunk.kind.as_str())
        .str(startup.unwrap_or_default());
    if let Some(requirements) = runtime {
        builder = builder.str(RUNTIME_FINGERPRINT);
        for requirement in requirements {
            builder = builder.str(requirement.as_str());
        }
    }
    builder.finish()
}

fn render_chunk(
    ctx: &AssetContext<'_>,
    ukey: ChunkUkey,
    id: &str,
    runtime: Option<&BTreeSet<RuntimeRequirement>>,
    startup: Option<&str>,
) -> CachedChunk {
    let mut content = String::new();
    let mut requirements = BTreeSet::new();
    let mut references = BTreeSet::new();
    let modules = rendered_modules(ctx.chunks, ukey);
    let chunk_runtime = ctx
        .chunks
        .chunk(ukey)
        .map(|c| c.runtime.clone())
        .unwrap_or_default();

    if let Some(runtime) = runtime {
        content.push_str(&render_runtime(runtime));
    }

    let quote = |value: &str| serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""));
    let _ = writeln!(
        content,
        "(self.{CHUNK_REGISTRY} = self.{CHUNK_REGISTRY} || []).push([{}, {{",
        quote(id)
    );
    for module in &modules {
        let Some(result) = ctx.codegen.get(module, &chunk_runtime) else {
            continue;
        };
        requirements.extend(result.runtime_requirements.iter().copied());
        for referenced in &result.referenced_chunks {
            if let Some(c) = ctx.chunks.chunk(*referenced) {
                references.insert(c.id_or_key());
            }
        }
        let module_id = ctx.chunks.module_id(module).unwrap_or(module.as_str());
        let _ = writeln!(
            content,
            "{}: function(module, exports, __bale_require__) {{\n{}}},",
            quote(module_id),
            result.source
        );
    }
    match startup {
        Some(startup) => {
            let _ = writeln!(content, "}}, {startup}]);");
        }
        None => content.push_str("}]);\n"),
    }
    references.remove(id);

    CachedChunk {
        own_hash: blake3::hash(content.as_bytes()).to_hex().to_string(),
        modules: ctx.chunks.chunk_modules(ukey),
        content,
        references: references.into_iter().collect(),
        runtime_requirements: requirements,
    }
}

/// Final hash of every chunk: its own hash combined with the own hashes of
/// all chunks it reaches through references. Cycles are fine; each chunk is
/// counted once.
fn final_hashes(rendered: &[Rendered], length: usize) -> BTreeMap<String, String> {
    let by_id: BTreeMap<&str, &CachedChunk> = rendered
        .iter()
        .map(|r| (r.id.as_str(), &r.cached))
        .collect();

    by_id
        .iter()
        .map(|(id, chunk)| {
            let mut reached = BTreeSet::new();
            let mut stack: Vec<&str> = chunk.references.iter().map(String::as_str).collect();
            while let Some(next) = stack.pop() {
                if next == *id || !reached.insert(next) {
                    continue;
                }
                if let Some(c) = by_id.get(next) {
                    stack.extend(c.references.iter().map(String::as_str));
                }
            }

            let mut hasher = blake3::Hasher::new();
            hasher.update(chunk.own_hash.as_bytes());
            for other in &reached {
                if let Some(c) = by_id.get(other) {
                    hasher.update(other.as_bytes());
                    hasher.update(c.own_hash.as_bytes());
                }
            }
            let hex = hasher.finalize().to_hex();
            (id.to_string(), hex[..length.min(hex.len())].to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(id: &str, content: &str, references: &[&str]) -> Rendered {
        Rendered {
            id: id.to_string(),
            filename: format!("{id}.{}.js", hash_placeholder(id)),
            cached: CachedChunk {
                modules: Vec::new(),
                content: content.to_string(),
                own_hash: blake3::hash(content.as_bytes()).to_hex().to_string(),
                references: references.iter().map(|s| s.to_string()).collect(),
                runtime_requirements: BTreeSet::new(),
            },
            from_cache: false,
        }
    }

    #[test]
    fn placeholders_have_a_fixed_width() {
        assert_eq!(hash_placeholder("a").len(), hash_placeholder("a-long-id").len());
        assert_ne!(hash_placeholder("a"), hash_placeholder("b"));
    }

    #[test]
    fn referenced_changes_propagate_to_referrers() {
        let before = final_hashes(
            &[rendered("a", "A", &["b"]), rendered("b", "B", &[]), rendered("c", "C", &[])],
            8,
        );
        let after = final_hashes(
            &[rendered("a", "A", &["b"]), rendered("b", "B2", &[]), rendered("c", "C", &[])],
            8,
        );
        assert_ne!(before["a"], after["a"]);
        assert_ne!(before["b"], after["b"]);
        assert_eq!(before["c"], after["c"]);
        assert_eq!(before["a"].len(), 8);
    }

    #[test]
    fn circular_references_terminate() {
        let hashes = final_hashes(
            &[rendered("p", "P", &["q"]), rendered("q", "Q", &["p"])],
            10,
        );
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes["p"], hashes["q"]);
    }

    #[test]
    fn reference_order_does_not_matter() {
        let one = final_hashes(
            &[rendered("a", "A", &["b", "c"]), rendered("b", "B", &[]), rendered("c", "C", &[])],
            8,
        );
        let two = final_hashes(
            &[rendered("a", "A", &["c", "b"]), rendered("b", "B", &[]), rendered("c", "C", &[])],
            8,
        );
        assert_eq!(one["a"], two["a"]);
    }
}
