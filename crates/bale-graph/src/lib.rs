//! # bale-graph
//!
//! Pure graph data structures for module dependency graphs.
//!
//! This crate provides the `ModuleGraph` and the records it stores without any
//! I/O. Building a graph (resolving requests, reading sources) is the job of the
//! make phase in `bale-bundler`; everything here is plain data plus indices.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ModuleGraph                          │
//! │            (Arc<RwLock<GraphInner>>, cheap to clone)        │
//! └────────────────────┬────────────────────────────────────────┘
//!                      │
//!          ┌───────────┼───────────────┬───────────────┐
//!          ▼           ▼               ▼               ▼
//!    ┌─────────┐ ┌────────────┐ ┌─────────────┐ ┌─────────────┐
//!    │ Module  │ │ Connection │ │  outgoing / │ │ ExportsInfo │
//!    │ (Node)  │ │  (arena)   │ │  incoming   │ │  (usage)    │
//!    └─────────┘ └────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! Modules never point at each other. Every edge is a [`Connection`] stored in a
//! central arena and indexed from both ends, so cyclic imports are ordinary
//! edges rather than an ownership problem.
//!
//! ## Quick Start
//!
//! ```rust
//! use bale_graph::{Dependency, Module, ModuleGraph, ModuleIdentifier};
//!
//! # fn main() -> Result<(), bale_graph::Error> {
//! let graph = ModuleGraph::new();
//!
//! let index = ModuleIdentifier::new("src/index.js");
//! let util = ModuleIdentifier::new("src/util.js");
//!
//! let dep = Dependency::static_import("./util", ["format"]);
//! graph.add_module(
//!     Module::builder(index.clone())
//!         .source("import { format } from './util'")
//!         .dependencies(vec![dep.clone()])
//!         .build(),
//! )?;
//!
//! // The target does not have to be built yet.
//! let conn = graph.add_connection(index.clone(), 0, dep, util.clone())?;
//! assert!(graph.connection_target(conn)?.is_not_yet_built());
//!
//! graph.add_module(Module::builder(util.clone()).exports(["format"]).build())?;
//! assert_eq!(graph.dependencies(&index), vec![util]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Extension Trait Pattern
//!
//! Methods on `ModuleGraph` are split by concern:
//!
//! - `memory::construction` - creating and freezing graphs
//! - `memory::mutations` - adding modules and connections
//! - `memory::queries` - lookups through the maintained indices
//! - `memory::traversal` - reachability walks
//! - `memory::serialization` - DOT, JSON and binary snapshots
//! - `memory::statistics` - summary counts

pub mod connection;
pub mod dependency;
pub mod exports_info;
pub mod module;
pub mod module_id;
pub mod runtime;
pub mod span;

mod memory;

pub use connection::{Connection, ConnectionId, TargetState};
pub use dependency::{Dependency, DependencyKind, ReferencedExports};
pub use exports_info::{ExportInfo, ExportsInfo, UsageFingerprint, UsageState};
pub use memory::{GraphStatistics, ModuleGraph};
pub use module::{
    BuildInfo, ContentHash, ExportDefinition, ExportKind, Module, ModuleBuilder, ModuleFormat,
    ModuleKind,
};
pub use module_id::{ModuleIdError, ModuleIdentifier};
pub use runtime::RuntimeName;
pub use span::SourceSpan;

/// Error types for graph operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A module referenced by an operation is not part of the graph.
    #[error("module not found in graph: {0}")]
    ModuleNotFound(ModuleIdentifier),

    /// A connection id does not name a live connection.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The graph was frozen and no longer accepts structural changes.
    #[error("module graph is frozen; cannot {0}")]
    Frozen(&'static str),

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
