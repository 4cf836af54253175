use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};

use crate::connection::{Connection, ConnectionId};
use crate::exports_info::ExportsInfo;
use crate::module::Module;
use crate::module_id::ModuleIdentifier;
use crate::{Error, Result};

/// Shared handle to a module graph.
///
/// Clones share the same storage. Use [`ModuleGraph::fork`] for an
/// independent copy.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    pub(super) inner: Arc<RwLock<GraphInner>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct GraphInner {
    pub modules: HashMap<ModuleIdentifier, Arc<Module>>,
    /// Connection arena. Removed connections leave a `None` slot so ids stay
    /// stable.
    pub connections: Vec<Option<Connection>>,
    /// Origin to outgoing connections, kept sorted by dependency index.
    pub outgoing: HashMap<ModuleIdentifier, Vec<ConnectionId>>,
    /// Target to incoming connections, in insertion order.
    pub incoming: HashMap<ModuleIdentifier, Vec<ConnectionId>>,
    pub by_origin_index: HashMap<(ModuleIdentifier, usize), ConnectionId>,
    pub entry_connections: IndexMap<String, ConnectionId>,
    pub exports_info: HashMap<ModuleIdentifier, ExportsInfo>,
    pub failed: HashSet<ModuleIdentifier>,
    pub frozen: bool,
}

impl GraphInner {
    pub fn connection(&self, id: ConnectionId) -> Result<&Connection> {
        self.connections
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(Error::ConnectionNotFound(id))
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.connections
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(Error::ConnectionNotFound(id))
    }

    pub fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
        if self.frozen {
            Err(Error::Frozen(operation))
        } else {
            Ok(())
        }
    }

    pub fn outgoing(&self, id: &ModuleIdentifier) -> impl Iterator<Item = &Connection> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|cid| self.connections.get(cid.index()).and_then(Option::as_ref))
    }

    pub fn incoming(&self, id: &ModuleIdentifier) -> impl Iterator<Item = &Connection> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|cid| self.connections.get(cid.index()).and_then(Option::as_ref))
    }
}
