use bale_graph::RuntimeName;
use serde::{Deserialize, Serialize};

/// One named entrypoint of a compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    pub name: String,
    /// Request resolved without an importer.
    pub request: String,
    /// Runtime the entry executes in. Entries sharing a runtime share usage
    /// data and, with `RuntimeChunkMode::Single`, a runtime chunk.
    pub runtime: RuntimeName,
    /// Whether this entry's chunks may share async groups and split chunks
    /// with other entries.
    pub share_chunks: bool,
}

impl EntryOptions {
    pub fn new(name: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: request.into(),
            runtime: RuntimeName::default(),
            share_chunks: true,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<RuntimeName>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Keep this entry's chunks to itself.
    pub fn standalone(mut self) -> Self {
        self.share_chunks = false;
        self
    }
}
