#![cfg_attr(docsrs, feature(doc_cfg))]

//! # bale-bundler
//!
//! Make/seal pipeline on top of the `bale-graph` module graph.
//!
//! A [`Compilation`] grows a module graph from entry requests (make), then
//! freezes it and turns it into chunks and assets (seal):
//!
//! ```text
//! entries ─▶ make ─▶ freeze ─▶ chunk graph ─▶ usage ─▶ concatenation
//!                                                         │
//!   cache ◀─ assets ◀─ codegen ◀─ ids ◀─ split chunks ◀───┘
//! ```
//!
//! A [`Compiler`] runs compilations back to back and keeps the incremental
//! cache between them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bale_bundler::{Compiler, EntryOptions, MemoryModuleFactory};
//! use bale_config::BundleConfig;
//! use bale_graph::{Dependency, Module};
//!
//! # async fn run() -> bale_bundler::Result<()> {
//! let factory = MemoryModuleFactory::with_modules([
//!     Module::builder("src/index.js".into())
//!         .dependencies(vec![Dependency::static_import("./util", ["format"])])
//!         .build(),
//!     Module::builder("src/util.js".into()).exports(["format", "parse"]).build(),
//! ]);
//! let compiler = Compiler::new(BundleConfig::default(), Arc::new(factory))?;
//! let output = compiler.run(&[EntryOptions::new("main", "src/index.js")]).await?;
//! assert_eq!(output.unused_exports.values().flatten().count(), 1);
//! # Ok(()) }
//! ```

pub mod assets;
pub mod cache;
pub mod chunk_graph;
pub mod codegen;
pub mod compilation;
pub mod compiler;
pub mod diagnostics;
pub mod entry;
pub mod error;
pub mod factory;
pub mod ids;
pub mod make;
pub mod optimize;
pub mod plugins;
pub mod runtime;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

#[cfg(test)]
mod test_support;

pub use assets::Asset;
pub use cache::{CacheError, CacheStore, ChangeSet, Etag, IncrementalCache};
pub use chunk_graph::{Chunk, ChunkGraph, ChunkGroup, ChunkKind, GraphInvariantError};
pub use codegen::{CodeGenerationError, CodeGenerator, DefaultCodeGenerator, RuntimeRequirement};
pub use compilation::{ChunkSummary, Compilation, CompilationOptions, SealOutput, SealStats};
pub use compiler::Compiler;
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSeverity};
pub use entry::EntryOptions;
pub use error::ModuleError;
pub use factory::{FactoryContext, FactoryError, MemoryModuleFactory, ModuleFactory, ResolvedModule};
pub use make::{CancellationToken, MakeStats};
pub use plugins::{ConcatenationRule, PluginRegistry, UsageRule};

/// Error types for bale-bundler operations.
///
/// Per-module failures are not errors at this level; they are collected
/// as [`ModuleError`]s and reported in [`SealOutput::errors`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The chunk graph disagrees with the module graph after seal.
    #[error("chunk graph invariant violated: {0}")]
    GraphInvariant(#[from] GraphInvariantError),

    /// A newer compilation superseded this one, or it was disposed.
    #[error("compilation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(#[from] bale_config::ConfigError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("graph error: {0}")]
    Graph(#[from] bale_graph::Error),

    /// A lifecycle method was called out of order.
    #[error("invalid compilation lifecycle: {0}")]
    Lifecycle(&'static str),

    #[error(transparent)]
    CodeGeneration(#[from] CodeGenerationError),
}

/// Result type alias for bale-bundler operations.
pub type Result<T> = std::result::Result<T, Error>;

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::GraphInvariant(_) => "GRAPH_INVARIANT",
            Error::Cancelled => "CANCELLED",
            Error::Config(_) => "INVALID_CONFIG",
            Error::Cache(_) => "CACHE_ERROR",
            Error::Graph(_) => "GRAPH_ERROR",
            Error::Lifecycle(_) => "LIFECYCLE",
            Error::CodeGeneration(_) => "CODE_GENERATION",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self {
            Error::Cancelled => Some(miette::Severity::Warning),
            _ => Some(miette::Severity::Error),
        }
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::GraphInvariant(_) => Some(Box::new(
                "An optimization pass left the chunk graph inconsistent. Disable \
                 custom concatenation rules or split-chunks groups to narrow it down.",
            )),
            Error::Config(err) => err
                .hint()
                .map(|hint| Box::new(hint.to_string()) as Box<dyn std::fmt::Display>),
            Error::Cache(_) => Some(Box::new(
                "Delete the cache directory to start from a cold cache.",
            )),
            Error::Lifecycle(_) => Some(Box::new(
                "Call make before seal, and create a new compilation for every build.",
            )),
            _ => None,
        }
    }
}
