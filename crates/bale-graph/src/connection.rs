use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dependency::{Dependency, DependencyKind};
use crate::module::Module;
use crate::module_id::ModuleIdentifier;
use crate::runtime::RuntimeName;

/// Index of a connection in the graph's connection arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub(crate) u32);

impl ConnectionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolved dependency: `(origin, dependency, target)`.
///
/// Entry connections have no origin. A connection is active for every
/// runtime unless that runtime was explicitly switched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub origin: Option<ModuleIdentifier>,
    /// Position of `dependency` in the origin's dependency list.
    pub dependency_index: usize,
    pub dependency: Dependency,
    pub target: ModuleIdentifier,
    pub(crate) inactive: BTreeSet<RuntimeName>,
}

impl Connection {
    pub fn is_active(&self, runtime: &RuntimeName) -> bool {
        !self.inactive.contains(runtime)
    }

    pub fn is_entry(&self) -> bool {
        self.origin.is_none()
    }

    pub fn kind(&self) -> DependencyKind {
        self.dependency.kind
    }

    /// Runtimes this connection was deactivated for.
    pub fn inactive_runtimes(&self) -> impl Iterator<Item = &RuntimeName> {
        self.inactive.iter()
    }
}

/// What a connection currently points at.
#[derive(Debug, Clone)]
pub enum TargetState {
    Built(Arc<Module>),
    /// The target is known by identifier but has not been added yet.
    NotYetBuilt(ModuleIdentifier),
    /// Resolving or building the target failed.
    Failed(ModuleIdentifier),
}

impl TargetState {
    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built(_))
    }

    pub fn is_not_yet_built(&self) -> bool {
        matches!(self, Self::NotYetBuilt(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn module(&self) -> Option<&Arc<Module>> {
        match self {
            Self::Built(module) => Some(module),
            _ => None,
        }
    }

    pub fn identifier(&self) -> &ModuleIdentifier {
        match self {
            Self::Built(module) => &module.identifier,
            Self::NotYetBuilt(id) | Self::Failed(id) => id,
        }
    }
}
