//! In-memory ModuleGraph implementation.
//!
//! A single `GraphInner` behind a `parking_lot::RwLock` holds the module map,
//! the connection arena and the two adjacency indices. Each submodule adds an
//! `impl ModuleGraph` block for one concern.

mod construction;
mod graph;
mod mutations;
mod queries;
mod serialization;
mod statistics;
mod traversal;

pub use graph::ModuleGraph;
pub use statistics::GraphStatistics;
