//! Statistics methods for ModuleGraph.

use serde::{Deserialize, Serialize};

use super::graph::ModuleGraph;
use crate::dependency::DependencyKind;
use crate::runtime::RuntimeName;

/// Summary counts for a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub module_count: usize,
    pub entry_count: usize,
    pub connection_count: usize,
    pub async_connection_count: usize,
    pub failed_count: usize,
    pub side_effect_module_count: usize,
    /// Provided exports unused in the default runtime.
    pub unused_export_count: usize,
    pub total_size: usize,
}

impl ModuleGraph {
    /// Compute a statistics snapshot.
    pub fn statistics(&self) -> GraphStatistics {
        let inner = self.inner.read();
        let live = || inner.connections.iter().flatten();
        let runtime = RuntimeName::default();

        GraphStatistics {
            module_count: inner.modules.len(),
            entry_count: inner.entry_connections.len(),
            connection_count: live().filter(|c| !c.is_entry()).count(),
            async_connection_count: live()
                .filter(|c| c.kind() == DependencyKind::Dynamic)
                .count(),
            failed_count: inner.failed.len(),
            side_effect_module_count: inner
                .modules
                .values()
                .filter(|m| m.has_side_effects())
                .count(),
            unused_export_count: inner
                .exports_info
                .values()
                .map(|info| info.unused_exports(&runtime).len())
                .sum(),
            total_size: inner.modules.values().map(|m| m.size()).sum(),
        }
    }
}
