//! Reachability walks for ModuleGraph.
//!
//! Every walk keeps a visited set, so cyclic imports terminate.

use std::collections::VecDeque;

use indexmap::IndexSet;

use super::graph::ModuleGraph;
use crate::module_id::ModuleIdentifier;
use crate::runtime::RuntimeName;

impl ModuleGraph {
    /// Every module `id` depends on directly or indirectly, in breadth-first
    /// order. `id` itself is included only when it sits on a cycle.
    pub fn transitive_dependencies(&self, id: &ModuleIdentifier) -> Vec<ModuleIdentifier> {
        let inner = self.inner.read();
        let mut seen = IndexSet::new();
        let mut queue = VecDeque::from([id.clone()]);

        while let Some(current) = queue.pop_front() {
            for connection in inner.outgoing(&current) {
                if seen.insert(connection.target.clone()) {
                    queue.push_back(connection.target.clone());
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Whether `from` reaches `to` through any chain of connections.
    pub fn depends_on(&self, from: &ModuleIdentifier, to: &ModuleIdentifier) -> bool {
        self.transitive_dependencies(from).contains(to)
    }

    /// Modules reachable from `entries` in first-reachable order.
    ///
    /// Connections are followed in declaration order, weak connections are
    /// skipped, and with a runtime only connections active for it count.
    /// Targets that are not built are not visited.
    pub fn reachable_from(
        &self,
        entries: &[ModuleIdentifier],
        runtime: Option<&RuntimeName>,
    ) -> Vec<ModuleIdentifier> {
        let inner = self.inner.read();
        let mut order = IndexSet::new();
        let mut queue = VecDeque::new();

        for entry in entries {
            if inner.modules.contains_key(entry) && order.insert(entry.clone()) {
                queue.push_back(entry.clone());
            }
        }

        while let Some(current) = queue.pop_front() {
            for connection in inner.outgoing(&current) {
                if connection.dependency.is_weak() {
                    continue;
                }
                if runtime.is_some_and(|rt| !connection.is_active(rt)) {
                    continue;
                }
                let target = &connection.target;
                if inner.modules.contains_key(target) && order.insert(target.clone()) {
                    queue.push_back(target.clone());
                }
            }
        }
        order.into_iter().collect()
    }
}
