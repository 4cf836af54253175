//! Query methods for ModuleGraph.

use std::sync::Arc;

use indexmap::IndexSet;

use super::graph::ModuleGraph;
use crate::connection::{Connection, ConnectionId, TargetState};
use crate::exports_info::ExportsInfo;
use crate::module::Module;
use crate::module_id::ModuleIdentifier;
use crate::runtime::RuntimeName;
use crate::Result;

impl ModuleGraph {
    pub fn module(&self, id: &ModuleIdentifier) -> Option<Arc<Module>> {
        self.inner.read().modules.get(id).cloned()
    }

    pub fn contains_module(&self, id: &ModuleIdentifier) -> bool {
        self.inner.read().modules.contains_key(id)
    }

    /// All modules sorted by identifier.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let inner = self.inner.read();
        let mut modules: Vec<_> = inner.modules.values().cloned().collect();
        modules.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        modules
    }

    /// All module identifiers, sorted.
    pub fn module_identifiers(&self) -> Vec<ModuleIdentifier> {
        let mut ids: Vec<_> = self.inner.read().modules.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn module_count(&self) -> usize {
        self.inner.read().modules.len()
    }

    pub fn is_failed(&self, id: &ModuleIdentifier) -> bool {
        self.inner.read().failed.contains(id)
    }

    /// Identifiers recorded as failed, sorted.
    pub fn failed_modules(&self) -> Vec<ModuleIdentifier> {
        let mut ids: Vec<_> = self.inner.read().failed.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connection(&self, id: ConnectionId) -> Result<Connection> {
        self.inner.read().connection(id).cloned()
    }

    /// Resolve what a connection points at. A target that has not been added
    /// yet is reported as [`TargetState::NotYetBuilt`], not as an error.
    pub fn connection_target(&self, id: ConnectionId) -> Result<TargetState> {
        let inner = self.inner.read();
        let target = &inner.connection(id)?.target;
        Ok(match inner.modules.get(target) {
            Some(module) => TargetState::Built(Arc::clone(module)),
            None if inner.failed.contains(target) => TargetState::Failed(target.clone()),
            None => TargetState::NotYetBuilt(target.clone()),
        })
    }

    /// Outgoing connections of `id` in dependency declaration order.
    pub fn connections(&self, id: &ModuleIdentifier) -> Vec<Connection> {
        self.inner.read().outgoing(id).cloned().collect()
    }

    /// Connections pointing at `id`, entry connections first, then by origin
    /// identifier and dependency index.
    pub fn incoming_connections(&self, id: &ModuleIdentifier) -> Vec<Connection> {
        let mut incoming: Vec<_> = self.inner.read().incoming(id).cloned().collect();
        incoming.sort_by(|a, b| {
            (&a.origin, a.dependency_index, a.id).cmp(&(&b.origin, b.dependency_index, b.id))
        });
        incoming
    }

    pub fn is_connection_active(&self, id: ConnectionId, runtime: &RuntimeName) -> Result<bool> {
        Ok(self.inner.read().connection(id)?.is_active(runtime))
    }

    /// Outgoing connections of `id` that are active for `runtime`.
    pub fn active_connections(
        &self,
        id: &ModuleIdentifier,
        runtime: &RuntimeName,
    ) -> Vec<Connection> {
        self.inner
            .read()
            .outgoing(id)
            .filter(|c| c.is_active(runtime))
            .cloned()
            .collect()
    }

    /// Entry connections in the order they were added.
    pub fn entry_connections(&self) -> Vec<(String, Connection)> {
        let inner = self.inner.read();
        inner
            .entry_connections
            .iter()
            .filter_map(|(name, cid)| {
                inner
                    .connection(*cid)
                    .ok()
                    .map(|c| (name.clone(), c.clone()))
            })
            .collect()
    }

    pub fn entry_connection(&self, name: &str) -> Option<Connection> {
        let inner = self.inner.read();
        let cid = inner.entry_connections.get(name)?;
        inner.connection(*cid).ok().cloned()
    }

    /// Distinct targets of `id`'s outgoing connections, in declaration order.
    pub fn dependencies(&self, id: &ModuleIdentifier) -> Vec<ModuleIdentifier> {
        let inner = self.inner.read();
        let targets: IndexSet<_> = inner.outgoing(id).map(|c| c.target.clone()).collect();
        targets.into_iter().collect()
    }

    /// Distinct modules with a connection to `id`, sorted.
    pub fn dependents(&self, id: &ModuleIdentifier) -> Vec<ModuleIdentifier> {
        let inner = self.inner.read();
        let mut origins: Vec<_> = inner
            .incoming(id)
            .filter_map(|c| c.origin.clone())
            .collect();
        origins.sort();
        origins.dedup();
        origins
    }

    /// Snapshot of a module's exports info.
    pub fn exports_info(&self, id: &ModuleIdentifier) -> Option<ExportsInfo> {
        self.inner.read().exports_info.get(id).cloned()
    }
}
