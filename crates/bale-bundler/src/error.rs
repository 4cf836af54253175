//! Per-module failures collected by the make phase.
//!
//! A module error never aborts a compilation. It is recorded here, the
//! failing target is marked in the graph, and the rest of the graph keeps
//! building.

use bale_graph::{ModuleIdentifier, SourceSpan};
use serde::{Deserialize, Serialize};

/// Failure attributed to one dependency or module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ModuleError {
    /// A request could not be turned into a module identifier.
    #[error("cannot resolve `{request}` from {}: {message}", origin_label(.origin))]
    Resolution {
        /// Importing module; `None` for entry requests.
        origin: Option<ModuleIdentifier>,
        request: String,
        span: SourceSpan,
        message: String,
    },

    /// The module was resolved but the factory failed to build it.
    #[error("failed to build {module}: {message}")]
    Build {
        module: ModuleIdentifier,
        /// First module that requested it.
        origin: Option<ModuleIdentifier>,
        message: String,
    },
}

impl ModuleError {
    /// The module the error is reported against.
    pub fn origin(&self) -> Option<&ModuleIdentifier> {
        match self {
            ModuleError::Resolution { origin, .. } | ModuleError::Build { origin, .. } => {
                origin.as_ref()
            }
        }
    }

    /// The failed module, when resolution got that far.
    pub fn module(&self) -> Option<&ModuleIdentifier> {
        match self {
            ModuleError::Resolution { .. } => None,
            ModuleError::Build { module, .. } => Some(module),
        }
    }
}

fn origin_label(origin: &Option<ModuleIdentifier>) -> String {
    origin
        .as_ref()
        .map_or_else(|| "<entry>".to_string(), ToString::to_string)
}
