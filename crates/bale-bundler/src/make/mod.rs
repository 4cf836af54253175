//! Make phase: grow a module graph from entry requests.
//!
//! Every module moves through
//!
//! ```text
//! Pending -> Resolving -> (cache hit) ---------------> Connected
//!                      \-> Building -> Built --------> Connected
//!                                   \-> Failed
//! ```
//!
//! Resolution and building run as tasks on a bounded worker pool. One
//! coordinator owns the staging graph and applies task results in the order
//! they arrive, so no lock is held across an await. The staging graph only
//! replaces the compilation's graph when the whole phase succeeds.

mod cancel;
mod coordinator;

pub use cancel::CancellationToken;
pub(crate) use coordinator::MakeCoordinator;

use std::collections::BTreeMap;

use bale_graph::{ModuleGraph, ModuleIdentifier};
use serde::Serialize;

use crate::cache::Etag;
use crate::error::ModuleError;

/// Default worker count when the configuration leaves it open.
pub fn default_parallelism() -> usize {
    num_cpus::get().min(8)
}

#[derive(Debug, Clone)]
pub struct MakeOptions {
    pub parallelism: usize,
    /// Build-options half of every module etag.
    pub build_options: Etag,
}

/// Counters for one make run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MakeStats {
    /// Successful resolutions, including repeated requests.
    pub resolved: usize,
    /// Modules built by the factory.
    pub built: usize,
    /// Modules restored from the incremental cache.
    pub cache_hits: usize,
    pub failed: usize,
    pub modules: usize,
}

/// Everything the make phase produces.
#[derive(Debug, Clone)]
pub struct MakeArtifact {
    pub module_graph: ModuleGraph,
    /// Sorted by message for stable output.
    pub errors: Vec<ModuleError>,
    pub module_etags: BTreeMap<ModuleIdentifier, Etag>,
    pub stats: MakeStats,
}
