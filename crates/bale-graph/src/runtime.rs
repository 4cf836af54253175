use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Name of an output runtime (one execution environment sharing a bootstrap).
///
/// Entries that share a runtime share module instances and, depending on the
/// runtime-chunk mode, a single runtime chunk. Connections and export usage
/// are tracked per runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeName(Arc<str>);

impl RuntimeName {
    pub const DEFAULT: &'static str = "main";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RuntimeName {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for RuntimeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuntimeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
