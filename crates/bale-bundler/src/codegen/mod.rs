//! Code generation driver.
//!
//! Generation runs once per placed module and runtime. When a module's used
//! export set and its dynamic-import targets are identical in two runtimes,
//! the first result is reused for the second.
//!
//! A [`CodeGenerator`] turns one module into a source fragment plus the
//! runtime helpers the fragment calls. [`DefaultCodeGenerator`] is the
//! reference format; embedders can supply their own.

mod javascript;

pub use javascript::DefaultCodeGenerator;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bale_graph::{Module, ModuleGraph, ModuleIdentifier, RuntimeName, UsageFingerprint, UsageState};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::chunk_graph::{ChunkGraph, ChunkUkey, ConcatenatedModule};

/// Helpers of the bootstrap code that generated modules depend on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeRequirement {
    /// Module registry and `__bale_require__`.
    Require,
    /// `__bale_require__.d`: define getters for named exports.
    DefineExports,
    /// `__bale_require__.e`: load chunks on demand.
    LoadChunk,
    /// `__bale_require__.p`: public path prefix of emitted files.
    PublicPath,
    /// `__bale_require__.n`: wrap a CommonJS module for ESM importers.
    InteropRequire,
    /// `__bale_require__.s`: append a stylesheet to the document.
    InjectStyle,
    /// `__bale_require__.g`: read an external from the global scope.
    External,
    /// `__bale_require__.x`: run an entry once its chunks are registered.
    Startup,
}

impl RuntimeRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Require => "require",
            Self::DefineExports => "define_exports",
            Self::LoadChunk => "load_chunk",
            Self::PublicPath => "public_path",
            Self::InteropRequire => "interop_require",
            Self::InjectStyle => "inject_style",
            Self::External => "external",
            Self::Startup => "startup",
        }
    }

    /// Helpers this one calls.
    pub fn implied(&self) -> &'static [RuntimeRequirement] {
        match self {
            Self::LoadChunk => &[Self::PublicPath, Self::Require],
            Self::Startup | Self::DefineExports | Self::InteropRequire => &[Self::Require],
            _ => &[],
        }
    }
}

/// Close `requirements` over [`RuntimeRequirement::implied`].
pub fn with_implied(requirements: &BTreeSet<RuntimeRequirement>) -> BTreeSet<RuntimeRequirement> {
    let mut all = requirements.clone();
    let mut stack: Vec<_> = requirements.iter().copied().collect();
    while let Some(req) = stack.pop() {
        for implied in req.implied() {
            if all.insert(*implied) {
                stack.push(*implied);
            }
        }
    }
    all
}

/// Everything a generator may look at for one module in one runtime.
pub struct CodeGenerationContext<'a> {
    pub module: &'a Module,
    pub runtime: &'a RuntimeName,
    pub graph: &'a ModuleGraph,
    pub chunks: &'a ChunkGraph,
    /// Set when `module` is the root of a concatenated scope.
    pub concatenation: Option<&'a ConcatenatedModule>,
    pub used_exports: &'a UsageFingerprint,
    /// Chunks to load for each dynamic import, keyed by importing module and
    /// dependency index.
    pub dynamic_imports: &'a BTreeMap<(ModuleIdentifier, usize), Vec<ChunkUkey>>,
    /// File name of every chunk with its content hash still a placeholder.
    pub chunk_filenames: &'a FxHashMap<ChunkUkey, String>,
}

impl CodeGenerationContext<'_> {
    pub fn module_id(&self, module: &ModuleIdentifier) -> String {
        self.chunks
            .module_id(module)
            .map(str::to_string)
            .unwrap_or_else(|| module.as_str().to_string())
    }

    /// Whether `module` is generated inside this module's scope.
    pub fn in_scope(&self, module: &ModuleIdentifier) -> bool {
        self.concatenation
            .is_some_and(|c| c.contains(module))
    }

    pub fn is_export_used(&self, name: &str) -> bool {
        self.used_exports.other.is_used() || self.used_exports.used.iter().any(|n| n == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeGenerationResult {
    pub source: String,
    pub runtime_requirements: BTreeSet<RuntimeRequirement>,
    /// Chunks whose file names appear in `source`.
    pub referenced_chunks: BTreeSet<ChunkUkey>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot generate code for {module}: {message}")]
pub struct CodeGenerationError {
    pub module: ModuleIdentifier,
    pub message: String,
}

pub trait CodeGenerator: Send + Sync {
    fn generate(
        &self,
        ctx: &CodeGenerationContext<'_>,
    ) -> Result<CodeGenerationResult, CodeGenerationError>;

    /// Mixed into chunk etags; change it whenever the output format changes.
    fn fingerprint(&self) -> &str {
        ""
    }
}

/// Results of one code generation run.
#[derive(Default)]
pub struct CodeGenerationResults {
    results: FxHashMap<(ModuleIdentifier, RuntimeName), Arc<CodeGenerationResult>>,
    pub generated: usize,
    pub reused: usize,
}

impl CodeGenerationResults {
    pub fn get(
        &self,
        module: &ModuleIdentifier,
        runtime: &RuntimeName,
    ) -> Option<&Arc<CodeGenerationResult>> {
        self.results.get(&(module.clone(), runtime.clone()))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl fmt::Debug for CodeGenerationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeGenerationResults")
            .field("results", &self.results.len())
            .field("generated", &self.generated)
            .field("reused", &self.reused)
            .finish()
    }
}

/// Generate every placed module that is not absorbed into another scope.
#[tracing::instrument(skip_all)]
pub fn generate_modules(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    generator: &dyn CodeGenerator,
    chunk_filenames: &FxHashMap<ChunkUkey, String>,
) -> Result<CodeGenerationResults, CodeGenerationError> {
    let mut results = CodeGenerationResults::default();

    for module_id in chunks.modules() {
        if chunks.is_concatenated_inner(&module_id) {
            continue;
        }
        let Some(module) = graph.module(&module_id) else {
            continue;
        };
        let concatenation = chunks.concatenation_of(&module_id);
        let scope: Vec<ModuleIdentifier> = concatenation
            .map(|c| c.modules().cloned().collect::<Vec<_>>())
            .unwrap_or_else(|| vec![module_id.clone()]);
        let exports = graph.exports_info(&module_id);

        let mut by_key: Vec<(
            (UsageFingerprint, BTreeMap<(ModuleIdentifier, usize), Vec<ChunkUkey>>),
            Arc<CodeGenerationResult>,
        )> = Vec::new();

        for runtime in chunks.module_runtimes(&module_id) {
            let fingerprint = exports
                .as_ref()
                .map(|info| info.usage_fingerprint(&runtime))
                .unwrap_or_else(fallback_fingerprint);
            let dynamic_imports = dynamic_import_chunks(graph, chunks, &scope, &runtime);
            let key = (fingerprint, dynamic_imports);

            if let Some((_, existing)) = by_key.iter().find(|(k, _)| *k == key) {
                results.reused += 1;
                results
                    .results
                    .insert((module_id.clone(), runtime), Arc::clone(existing));
                continue;
            }

            let ctx = CodeGenerationContext {
                module: &module,
                runtime: &runtime,
                graph,
                chunks,
                concatenation,
                used_exports: &key.0,
                dynamic_imports: &key.1,
                chunk_filenames,
            };
            let generated = Arc::new(generator.generate(&ctx)?);
            results.generated += 1;
            results
                .results
                .insert((module_id.clone(), runtime), Arc::clone(&generated));
            by_key.push((key, generated));
        }
    }

    tracing::debug!(
        generated = results.generated,
        reused = results.reused,
        "code generation finished"
    );
    Ok(results)
}

/// Chunks of the async group each dynamic import in `scope` loads.
fn dynamic_import_chunks(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    scope: &[ModuleIdentifier],
    runtime: &RuntimeName,
) -> BTreeMap<(ModuleIdentifier, usize), Vec<ChunkUkey>> {
    let mut imports = BTreeMap::new();
    for origin in scope {
        for connection in graph.active_connections(origin, runtime) {
            if !connection.dependency.is_async() {
                continue;
            }
            let Some(group) = chunks.async_group_for(origin, &connection.target, runtime) else {
                continue;
            };
            let loaded = chunks
                .group(group)
                .map(|g| g.chunks().to_vec())
                .unwrap_or_default();
            imports.insert((origin.clone(), connection.dependency_index), loaded);
        }
    }
    imports
}

/// Usage a module gets when no exports info exists.
fn fallback_fingerprint() -> UsageFingerprint {
    UsageFingerprint {
        used: Vec::new(),
        other: UsageState::Unknown,
    }
}
