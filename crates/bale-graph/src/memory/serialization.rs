//! Serialization methods for ModuleGraph.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::graph::{GraphInner, ModuleGraph};
use crate::connection::Connection;
use crate::module::Module;
use crate::module_id::ModuleIdentifier;
use crate::{Error, Result};

/// Binary snapshot format version. Bump on any change to `GraphInner`.
const FORMAT_VERSION: u32 = 1;

fn escape_label(label: &str) -> String {
    label.replace('"', "\\\"")
}

impl ModuleGraph {
    /// Export the graph as DOT for visualization. Dynamic imports are dashed,
    /// weak references dotted.
    pub fn to_dot_format(&self) -> String {
        let mut output = String::from("digraph ModuleGraph {\n");
        let modules = self.modules();

        for module in &modules {
            output.push_str(&format!(
                "    \"{}\";\n",
                escape_label(module.identifier.as_str())
            ));
        }
        for module in &modules {
            for connection in self.connections(&module.identifier) {
                let style = match connection.kind() {
                    crate::DependencyKind::Static => "",
                    crate::DependencyKind::Dynamic => " [style=dashed]",
                    crate::DependencyKind::Weak => " [style=dotted]",
                };
                output.push_str(&format!(
                    "    \"{}\" -> \"{}\"{style};\n",
                    escape_label(module.identifier.as_str()),
                    escape_label(connection.target.as_str()),
                ));
            }
        }

        output.push_str("}\n");
        output
    }

    /// Export modules, connections and entries as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct GraphJson {
            modules: Vec<Arc<Module>>,
            connections: Vec<Connection>,
            entries: Vec<(String, ModuleIdentifier)>,
            failed: Vec<ModuleIdentifier>,
        }

        let modules = self.modules();
        let connections = modules
            .iter()
            .flat_map(|m| self.connections(&m.identifier))
            .collect();
        let entries = self
            .entry_connections()
            .into_iter()
            .map(|(name, c)| (name, c.target))
            .collect();

        let json = GraphJson {
            modules,
            connections,
            entries,
            failed: self.failed_modules(),
        };
        serde_json::to_string_pretty(&json)
            .map_err(|e| Error::Serialization(format!("failed to serialize graph: {e}")))
    }

    /// Serialize the whole graph state with bincode.
    ///
    /// The payload starts with a format version; [`ModuleGraph::from_bytes`]
    /// rejects other versions.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SerializedGraph<'a> {
            version: u32,
            inner: &'a GraphInner,
        }

        let inner = self.inner.read();
        bincode::serialize(&SerializedGraph {
            version: FORMAT_VERSION,
            inner: &*inner,
        })
        .map_err(|e| Error::Serialization(format!("failed to serialize graph to bytes: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct SerializedGraph {
            version: u32,
            inner: GraphInner,
        }

        let serialized: SerializedGraph = bincode::deserialize(bytes).map_err(|e| {
            Error::Serialization(format!("failed to deserialize graph from bytes: {e}"))
        })?;
        if serialized.version != FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "incompatible graph format version: expected {FORMAT_VERSION}, got {}",
                serialized.version
            )));
        }
        Ok(Self::from_inner(serialized.inner))
    }
}
