//! One build generation: make, then seal.
//!
//! A compilation owns its module graph and chunk graph. Collaborators
//! (factory, code generator, rules, cache) are shared through `Arc`, so
//! concurrent compilations only share inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use bale_config::BundleConfig;
use bale_graph::{ModuleGraph, ModuleIdentifier, RuntimeName};
use parking_lot::Mutex;
use serde::Serialize;

use crate::assets::{Asset, AssetContext, chunk_filenames, render_assets};
use crate::cache::{
    CachedModule, ChangeDetector, ChangeSet, Etag, IncrementalCache, build_options_etag,
};
use crate::chunk_graph::{ChunkGraph, ChunkKind, build_chunk_graph};
use crate::codegen::{CodeGenerator, DefaultCodeGenerator, generate_modules};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::entry::EntryOptions;
use crate::error::ModuleError;
use crate::factory::ModuleFactory;
use crate::ids::{assign_chunk_ids, assign_module_ids};
use crate::make::{CancellationToken, MakeCoordinator, MakeOptions, MakeStats, default_parallelism};
use crate::optimize::{concatenate_modules, propagate_usage, split_chunks};
use crate::plugins::PluginRegistry;
use crate::{Error, Result};

/// Shared inputs of a compilation.
#[derive(Clone)]
pub struct CompilationOptions {
    pub config: Arc<BundleConfig>,
    pub factory: Arc<dyn ModuleFactory>,
    pub generator: Arc<dyn CodeGenerator>,
    pub plugins: PluginRegistry,
    /// Consulted only when `config.cache.enabled` is set.
    pub cache: Option<Arc<Mutex<IncrementalCache>>>,
}

impl CompilationOptions {
    /// Default code generator, no rules, and a fresh in-memory cache.
    pub fn new(config: BundleConfig, factory: Arc<dyn ModuleFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            generator: Arc::new(DefaultCodeGenerator),
            plugins: PluginRegistry::new(),
            cache: Some(Arc::new(Mutex::new(IncrementalCache::new()))),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<Mutex<IncrementalCache>>>) -> Self {
        self.cache = cache;
        self
    }

    fn active_cache(&self) -> Option<&Arc<Mutex<IncrementalCache>>> {
        self.cache.as_ref().filter(|_| self.config.cache.enabled)
    }
}

impl std::fmt::Debug for CompilationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationOptions")
            .field("config", &self.config)
            .field("plugins", &self.plugins)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Made,
    Sealed,
    Disposed,
}

/// Chunk as reported in [`SealOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub id: String,
    pub name: Option<String>,
    pub kind: ChunkKind,
    pub runtime: RuntimeName,
    pub files: Vec<String>,
    /// Member modules, sorted.
    pub modules: Vec<ModuleIdentifier>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SealStats {
    pub make: MakeStats,
    pub usage_changes: usize,
    pub concatenated_roots: usize,
    pub absorbed_modules: usize,
    pub split_chunks_created: usize,
    pub modules_generated: usize,
    pub modules_reused: usize,
    pub chunks_rendered: usize,
    pub chunks_reused: usize,
}

/// Everything a seal produces.
#[derive(Debug, Clone)]
pub struct SealOutput {
    /// Sorted by chunk id.
    pub chunks: Vec<ChunkSummary>,
    /// Sorted by file name.
    pub assets: Vec<Asset>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Exports unused in every runtime their module runs in.
    pub unused_exports: BTreeMap<ModuleIdentifier, Vec<String>>,
    pub stats: SealStats,
    /// Module changes since the previous generation.
    pub changes: ChangeSet,
}

impl SealOutput {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn asset(&self, filename: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.filename == filename)
    }

    /// Asset of the chunk with id `chunk_id`.
    pub fn chunk_asset(&self, chunk_id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.chunk_id == chunk_id)
    }
}

/// Build state of one generation.
///
/// ```no_run
/// use std::sync::Arc;
/// use bale_bundler::{Compilation, CompilationOptions, EntryOptions, MemoryModuleFactory};
/// use bale_config::BundleConfig;
/// use bale_graph::Module;
///
/// # async fn run() -> bale_bundler::Result<()> {
/// let factory = MemoryModuleFactory::with_modules([
///     Module::builder("src/index.js".into()).source("console.log(1);").build(),
/// ]);
/// let options = CompilationOptions::new(BundleConfig::default(), Arc::new(factory));
/// let mut compilation = Compilation::new(options);
/// let output = compilation.build(&[EntryOptions::new("main", "src/index.js")]).await?;
/// for asset in &output.assets {
///     println!("{} ({} bytes)", asset.filename, asset.content.len());
/// }
/// # Ok(()) }
/// ```
pub struct Compilation {
    options: CompilationOptions,
    token: CancellationToken,
    state: Lifecycle,
    previous: ChangeDetector,
    module_graph: ModuleGraph,
    chunk_graph: ChunkGraph,
    module_etags: BTreeMap<ModuleIdentifier, Etag>,
    make_errors: Vec<ModuleError>,
    make_stats: MakeStats,
    changes: ChangeSet,
}

impl Compilation {
    pub fn new(options: CompilationOptions) -> Self {
        Self::with_parts(options, CancellationToken::new(), ChangeDetector::default())
    }

    /// Compilation that observes `token` and diffs against `previous`.
    pub fn with_parts(
        options: CompilationOptions,
        token: CancellationToken,
        previous: ChangeDetector,
    ) -> Self {
        Self {
            options,
            token,
            state: Lifecycle::Created,
            previous,
            module_graph: ModuleGraph::new(),
            chunk_graph: ChunkGraph::new(),
            module_etags: BTreeMap::new(),
            make_errors: Vec::new(),
            make_stats: MakeStats::default(),
            changes: ChangeSet::default(),
        }
    }

    pub fn module_graph(&self) -> &ModuleGraph {
        &self.module_graph
    }

    pub fn chunk_graph(&self) -> &ChunkGraph {
        &self.chunk_graph
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn make_errors(&self) -> &[ModuleError] {
        &self.make_errors
    }

    /// Module etags of this generation, for diffing the next one.
    pub fn change_detector(&self) -> ChangeDetector {
        ChangeDetector::new(self.module_etags.clone())
    }

    /// Grow the module graph from `entries`.
    ///
    /// Module failures are collected, not returned. The graph is only
    /// replaced when the whole phase completes; a cancelled run leaves the
    /// compilation as it was.
    #[tracing::instrument(name = "make", skip_all, fields(entries = entries.len()))]
    pub async fn make(&mut self, entries: &[EntryOptions]) -> Result<MakeStats> {
        match self.state {
            Lifecycle::Created | Lifecycle::Made => {}
            Lifecycle::Sealed => return Err(Error::Lifecycle("make after seal")),
            Lifecycle::Disposed => return Err(Error::Lifecycle("make after dispose")),
        }

        let config = &self.options.config;
        let make_options = MakeOptions {
            parallelism: config.parallelism.unwrap_or_else(default_parallelism),
            build_options: build_options_etag(
                &config.cache.version,
                &self.options.factory.options_fingerprint(),
            ),
        };
        let artifact = MakeCoordinator::new(
            Arc::clone(&self.options.factory),
            self.options.active_cache().cloned(),
            self.token.clone(),
            make_options,
        )
        .run(entries)
        .await?;

        let changes = self
            .previous
            .detect(&artifact.module_etags, &artifact.module_graph);
        if let Some(cache) = self.options.active_cache() {
            let mut cache = cache.lock();
            for id in changes.modified.iter().chain(&changes.removed) {
                cache.invalidate_module(id);
            }
            for (id, etag) in &artifact.module_etags {
                let graph = &artifact.module_graph;
                let (Some(module), Some(exports_info)) = (graph.module(id), graph.exports_info(id))
                else {
                    continue;
                };
                cache.put_module(
                    etag.clone(),
                    &CachedModule {
                        module: (*module).clone(),
                        exports_info,
                    },
                )?;
            }
        }

        self.module_graph = artifact.module_graph;
        self.module_etags = artifact.module_etags;
        self.make_errors = artifact.errors;
        self.make_stats = artifact.stats;
        self.changes = changes;
        self.state = Lifecycle::Made;
        Ok(self.make_stats)
    }

    /// Freeze the graph and run every seal step in order.
    #[tracing::instrument(name = "seal", skip_all, fields(entries = entries.len()))]
    pub fn seal(&mut self, entries: &[EntryOptions]) -> Result<SealOutput> {
        match self.state {
            Lifecycle::Made => {}
            Lifecycle::Created => return Err(Error::Lifecycle("seal before make")),
            Lifecycle::Sealed => return Err(Error::Lifecycle("seal called twice")),
            Lifecycle::Disposed => return Err(Error::Lifecycle("seal after dispose")),
        }
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let config = Arc::clone(&self.options.config);
        let optimization = &config.optimization;
        let graph = &self.module_graph;
        graph.freeze();
        graph.reset_usage();

        let mut chunks = build_chunk_graph(graph, entries, optimization.runtime_chunk);
        let usage = propagate_usage(
            graph,
            &chunks,
            self.options.plugins.usage_rules(),
            optimization.tree_shaking,
        )?;
        let concatenation = if optimization.concatenate_modules {
            concatenate_modules(graph, &mut chunks, self.options.plugins.concatenation_rules())
        } else {
            Default::default()
        };
        let split = split_chunks(
            graph,
            &mut chunks,
            &optimization.split_chunks,
            optimization.remove_empty_chunks,
        );
        assign_module_ids(graph, &mut chunks, config.ids.module_ids, config.ids.hash_length);
        assign_chunk_ids(&mut chunks, config.ids.chunk_ids, config.ids.hash_length);
        chunks.validate(graph)?;

        let filenames = chunk_filenames(&chunks, &config.output);
        let codegen = generate_modules(graph, &chunks, self.options.generator.as_ref(), &filenames)?;
        let fingerprint = self.seal_fingerprint();
        let ctx = AssetContext {
            graph,
            chunks: &chunks,
            codegen: &codegen,
            output: &config.output,
            filenames: &filenames,
            fingerprint: &fingerprint,
        };

        let mut warnings = Vec::new();
        let rendered = match self.options.active_cache() {
            Some(cache) => {
                let mut cache = cache.lock();
                let rendered = render_assets(&ctx, Some(&mut *cache))?;
                cache.sweep_chunks();
                warnings.extend(cache.take_warnings().into_iter().map(|message| {
                    Diagnostic::warning(DiagnosticKind::CacheCorruption, message)
                        .with_help("The entry was discarded and rebuilt.")
                }));
                rendered
            }
            None => render_assets(&ctx, None)?,
        };

        for entry in entries {
            if chunks.entrypoint(&entry.name).is_none() {
                warnings.push(
                    Diagnostic::warning(
                        DiagnosticKind::MissingEntrypoint,
                        format!("entrypoint `{}` produced no chunks", entry.name),
                    )
                    .with_help("Its entry module failed to resolve or build."),
                );
            }
        }

        let mut summaries: Vec<ChunkSummary> = chunks
            .chunks()
            .map(|chunk| ChunkSummary {
                id: chunk.id_or_key(),
                name: chunk.name.clone(),
                kind: chunk.kind,
                runtime: chunk.runtime.clone(),
                files: rendered
                    .assets
                    .iter()
                    .filter(|a| a.chunk_id == chunk.id_or_key())
                    .map(|a| a.filename.clone())
                    .collect(),
                modules: chunks.chunk_modules(chunk.ukey),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));

        let stats = SealStats {
            make: self.make_stats,
            usage_changes: usage.changes,
            concatenated_roots: concatenation.roots.len(),
            absorbed_modules: concatenation.absorbed,
            split_chunks_created: split.created.len(),
            modules_generated: codegen.generated,
            modules_reused: codegen.reused,
            chunks_rendered: rendered.rendered,
            chunks_reused: rendered.reused,
        };
        tracing::info!(
            chunks = summaries.len(),
            assets = rendered.assets.len(),
            errors = self.make_errors.len(),
            warnings = warnings.len(),
            "seal finished"
        );

        self.chunk_graph = chunks;
        self.state = Lifecycle::Sealed;
        Ok(SealOutput {
            chunks: summaries,
            assets: rendered.assets,
            errors: self.make_errors.iter().map(Diagnostic::from).collect(),
            warnings,
            unused_exports: usage.unused,
            stats,
            changes: self.changes.clone(),
        })
    }

    /// Make, then seal.
    pub async fn build(&mut self, entries: &[EntryOptions]) -> Result<SealOutput> {
        self.make(entries).await?;
        self.seal(entries)
    }

    /// Release both graphs and cancel anything still running. Later calls
    /// fail with [`Error::Lifecycle`].
    pub fn dispose(&mut self) {
        self.token.cancel(Some("compilation disposed".to_string()));
        self.module_graph = ModuleGraph::new();
        self.chunk_graph = ChunkGraph::new();
        self.module_etags.clear();
        self.make_errors.clear();
        self.state = Lifecycle::Disposed;
    }

    /// Etag of everything outside the module sources that shapes a chunk.
    fn seal_fingerprint(&self) -> Etag {
        let config = &self.options.config;
        Etag::builder()
            .str(env!("CARGO_PKG_VERSION"))
            .str(&config.cache.version)
            .str(self.options.generator.fingerprint())
            .str(&config.output.filename)
            .str(&config.output.chunk_filename)
            .str(&config.output.runtime_filename)
            .u64(config.output.hash_length as u64)
            .finish()
    }
}

impl std::fmt::Debug for Compilation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compilation")
            .field("state", &self.state)
            .field("modules", &self.module_graph.module_count())
            .field("chunks", &self.chunk_graph.chunk_count())
            .finish_non_exhaustive()
    }
}
