//! Construction methods for ModuleGraph.

use std::sync::Arc;

use parking_lot::RwLock;

use super::graph::{GraphInner, ModuleGraph};
use crate::Result;
use crate::module::Module;

impl ModuleGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a graph from an iterator of modules (without connections).
    pub fn from_modules<I>(modules: I) -> Result<Self>
    where
        I: IntoIterator<Item = Module>,
    {
        let graph = Self::new();
        for module in modules {
            graph.add_module(module)?;
        }
        Ok(graph)
    }

    /// Deep copy that no longer shares storage with `self`.
    pub fn fork(&self) -> Self {
        let inner = self.inner.read().clone();
        Self::from_inner(inner)
    }

    pub(super) fn from_inner(inner: GraphInner) -> Self {
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Stop accepting structural changes. Connection activation and export
    /// usage stay writable.
    pub fn freeze(&self) {
        self.inner.write().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }
}
