//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: String, message: String },

    #[error("schema validation failed: {message}")]
    SchemaValidation {
        message: String,
        hint: Option<String>,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
}

impl ConfigError {
    pub(crate) fn schema(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Suggested fix, when one is known.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::SchemaValidation { hint, .. } => hint.as_deref(),
            Self::NotFound(_) => Some("Create bale.toml or pass an explicit config path"),
            Self::InvalidValue { .. } => Some("Check bale.toml syntax and BALE_* variables"),
            Self::Serialize(_) => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        let field = err
            .path
            .last()
            .cloned()
            .unwrap_or_else(|| "configuration".to_string());
        Self::InvalidValue {
            field,
            message: err.kind.to_string(),
        }
    }
}
