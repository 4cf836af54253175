use std::fmt;
use std::path::Path;
use std::sync::Arc;

use path_clean::PathClean;
use serde::{Deserialize, Serialize};

/// Stable identity of a module inside a compilation.
///
/// An identifier is not just a path. It may carry loader prefixes and query
/// state (`css!./a.css?inline`), so two requests for the same file with
/// different loaders are different modules. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleIdentifier(Arc<str>);

const VIRTUAL_PREFIX: &str = "virtual:";

impl ModuleIdentifier {
    /// Wrap an identifier string as-is.
    pub fn new(identifier: impl AsRef<str>) -> Self {
        Self(Arc::from(identifier.as_ref()))
    }

    /// Build an identifier from a file path, normalising `.` and `..`
    /// segments and separators. No file-system access happens here.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModuleIdError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ModuleIdError::EmptyPath);
        }
        let cleaned = path.to_path_buf().clean();
        let normalised = cleaned.to_string_lossy().replace('\\', "/");
        Ok(Self::new(normalised))
    }

    /// Identifier for a module that has no backing file.
    pub fn new_virtual(name: impl AsRef<str>) -> Self {
        Self::new(format!("{VIRTUAL_PREFIX}{}", name.as_ref()))
    }

    pub fn is_virtual(&self) -> bool {
        self.0.starts_with(VIRTUAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource part of the identifier with loader prefixes and query removed.
    ///
    /// `css!./a.css?inline` becomes `./a.css`.
    pub fn short_name(&self) -> &str {
        let resource = self.0.rsplit('!').next().unwrap_or(&self.0);
        match resource.find('?') {
            Some(idx) => &resource[..idx],
            None => resource,
        }
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ModuleIdentifier {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for ModuleIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors produced when deriving identifiers from paths.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModuleIdError {
    #[error("module path cannot be empty")]
    EmptyPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_normalises_segments() {
        let id = ModuleIdentifier::from_path("src/./lib/../index.js").unwrap();
        assert_eq!(id.as_str(), "src/index.js");
    }

    #[test]
    fn from_path_rejects_empty() {
        assert_eq!(
            ModuleIdentifier::from_path("").unwrap_err(),
            ModuleIdError::EmptyPath
        );
    }

    #[test]
    fn short_name_strips_loaders_and_query() {
        let id = ModuleIdentifier::new("style!css!./a.css?inline");
        assert_eq!(id.short_name(), "./a.css");
        assert_eq!(ModuleIdentifier::new("plain.js").short_name(), "plain.js");
    }

    #[test]
    fn virtual_identifiers() {
        let id = ModuleIdentifier::new_virtual("runtime");
        assert!(id.is_virtual());
        assert_eq!(id.to_string(), "virtual:runtime");
        assert!(!ModuleIdentifier::new("a.js").is_virtual());
    }
}
