//! Mutation methods for ModuleGraph.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::graph::{GraphInner, ModuleGraph};
use crate::connection::{Connection, ConnectionId};
use crate::dependency::Dependency;
use crate::exports_info::ExportsInfo;
use crate::module::Module;
use crate::module_id::ModuleIdentifier;
use crate::runtime::RuntimeName;
use crate::{Error, Result};

impl ModuleGraph {
    /// Add a built module. Replacing an existing module resets its exports
    /// info and clears any failure mark.
    pub fn add_module(&self, module: Module) -> Result<()> {
        self.add_module_arc(Arc::new(module))
    }

    pub fn add_module_arc(&self, module: Arc<Module>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_mutable("add a module")?;

        let id = module.identifier.clone();
        inner
            .exports_info
            .insert(id.clone(), ExportsInfo::from_module(&module));
        inner.failed.remove(&id);
        inner.modules.insert(id, module);
        Ok(())
    }

    /// Add a resolved dependency of `origin`.
    ///
    /// The target does not need to exist yet. Adding the same
    /// `(origin, dependency_index)` twice returns the existing connection,
    /// retargeted if the target changed.
    pub fn add_connection(
        &self,
        origin: ModuleIdentifier,
        dependency_index: usize,
        dependency: Dependency,
        target: ModuleIdentifier,
    ) -> Result<ConnectionId> {
        let mut inner = self.inner.write();
        inner.ensure_mutable("add a connection")?;
        if !inner.modules.contains_key(&origin) {
            return Err(Error::ModuleNotFound(origin));
        }

        let key = (origin.clone(), dependency_index);
        if let Some(&existing) = inner.by_origin_index.get(&key) {
            retarget(&mut inner, existing, target)?;
            return Ok(existing);
        }

        let id = push_connection(&mut inner, Some(origin.clone()), dependency_index, dependency, target);
        inner.by_origin_index.insert(key, id);

        let GraphInner {
            outgoing,
            connections,
            ..
        } = &mut *inner;
        let list = outgoing.entry(origin).or_default();
        let pos = list.partition_point(|cid| {
            connections
                .get(cid.index())
                .and_then(Option::as_ref)
                .is_some_and(|c| c.dependency_index < dependency_index)
        });
        list.insert(pos, id);
        Ok(id)
    }

    /// Add (or retarget) the connection that starts entrypoint `name`.
    pub fn add_entry_connection(
        &self,
        name: impl Into<String>,
        dependency: Dependency,
        target: ModuleIdentifier,
    ) -> Result<ConnectionId> {
        let name = name.into();
        let mut inner = self.inner.write();
        inner.ensure_mutable("add an entry connection")?;

        if let Some(&existing) = inner.entry_connections.get(&name) {
            retarget(&mut inner, existing, target)?;
            return Ok(existing);
        }
        let id = push_connection(&mut inner, None, 0, dependency, target);
        inner.entry_connections.insert(name, id);
        Ok(id)
    }

    /// Switch a connection on or off for one runtime. Allowed on frozen graphs.
    pub fn set_connection_active(
        &self,
        id: ConnectionId,
        runtime: &RuntimeName,
        active: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let connection = inner.connection_mut(id)?;
        if active {
            connection.inactive.remove(runtime);
        } else {
            connection.inactive.insert(runtime.clone());
        }
        Ok(())
    }

    /// Remove a module with its outgoing connections and exports info.
    /// Connections pointing at it stay and report the target as not yet built.
    pub fn remove_module(&self, id: &ModuleIdentifier) -> Result<Arc<Module>> {
        let mut inner = self.inner.write();
        inner.ensure_mutable("remove a module")?;
        let module = inner
            .modules
            .remove(id)
            .ok_or_else(|| Error::ModuleNotFound(id.clone()))?;
        inner.exports_info.remove(id);

        for cid in inner.outgoing.remove(id).unwrap_or_default() {
            let Some(connection) = inner.connections.get_mut(cid.index()).and_then(Option::take)
            else {
                continue;
            };
            inner
                .by_origin_index
                .remove(&(id.clone(), connection.dependency_index));
            if let Some(list) = inner.incoming.get_mut(&connection.target) {
                list.retain(|c| *c != cid);
            }
        }
        Ok(module)
    }

    /// Record that `id` could not be resolved or built.
    pub fn mark_failed(&self, id: ModuleIdentifier) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_mutable("mark a module failed")?;
        inner.failed.insert(id);
        Ok(())
    }

    /// Replace the exports info of a module, e.g. when restoring from cache.
    pub fn set_exports_info(&self, id: &ModuleIdentifier, info: ExportsInfo) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.modules.contains_key(id) {
            return Err(Error::ModuleNotFound(id.clone()));
        }
        inner.exports_info.insert(id.clone(), info);
        Ok(())
    }

    /// Mutate the exports info of a module in place.
    pub fn with_exports_info_mut<R>(
        &self,
        id: &ModuleIdentifier,
        f: impl FnOnce(&mut ExportsInfo) -> R,
    ) -> Result<R> {
        let mut inner = self.inner.write();
        let info = inner
            .exports_info
            .get_mut(id)
            .ok_or_else(|| Error::ModuleNotFound(id.clone()))?;
        Ok(f(info))
    }

    /// Clear usage data of every module.
    pub fn reset_usage(&self) {
        let mut inner = self.inner.write();
        for info in inner.exports_info.values_mut() {
            info.reset_usage();
        }
    }
}

fn push_connection(
    inner: &mut GraphInner,
    origin: Option<ModuleIdentifier>,
    dependency_index: usize,
    dependency: Dependency,
    target: ModuleIdentifier,
) -> ConnectionId {
    let id = ConnectionId(inner.connections.len() as u32);
    inner.incoming.entry(target.clone()).or_default().push(id);
    inner.connections.push(Some(Connection {
        id,
        origin,
        dependency_index,
        dependency,
        target,
        inactive: BTreeSet::new(),
    }));
    id
}

fn retarget(inner: &mut GraphInner, id: ConnectionId, target: ModuleIdentifier) -> Result<()> {
    let connection = inner.connection_mut(id)?;
    if connection.target == target {
        return Ok(());
    }
    let previous = std::mem::replace(&mut connection.target, target.clone());
    if let Some(list) = inner.incoming.get_mut(&previous) {
        list.retain(|c| *c != id);
    }
    inner.incoming.entry(target).or_default().push(id);
    Ok(())
}
