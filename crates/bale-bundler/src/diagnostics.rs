//! Structured diagnostics attached to a seal result.

use std::fmt;

use bale_graph::SourceSpan;
use serde::{Deserialize, Serialize};

use crate::error::ModuleError;

/// Diagnostic in a cloneable, serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: DiagnosticSeverity,
    pub message: String,
    /// Module the diagnostic is reported against.
    pub module: Option<String>,
    /// Request that failed, for resolution errors.
    pub request: Option<String>,
    pub span: Option<SourceSpan>,
    pub help: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnresolvedEntry,
    UnresolvedImport,
    BuildFailure,
    CacheCorruption,
    MissingEntrypoint,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, DiagnosticSeverity::Error, message)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, DiagnosticSeverity::Warning, message)
    }

    fn new(kind: DiagnosticKind, severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            module: None,
            request: None,
            span: None,
            help: None,
        }
    }

    pub fn with_module(mut self, module: impl ToString) -> Self {
        self.module = Some(module.to_string());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl From<&ModuleError> for Diagnostic {
    fn from(error: &ModuleError) -> Self {
        match error {
            ModuleError::Resolution {
                origin,
                request,
                span,
                ..
            } => {
                let kind = if origin.is_some() {
                    DiagnosticKind::UnresolvedImport
                } else {
                    DiagnosticKind::UnresolvedEntry
                };
                Diagnostic {
                    module: origin.as_ref().map(ToString::to_string),
                    request: Some(request.clone()),
                    span: Some(*span),
                    help: Some(
                        "Check the request path and that the target exists.".to_string(),
                    ),
                    ..Diagnostic::error(kind, error.to_string())
                }
            }
            ModuleError::Build { module, .. } => {
                Diagnostic::error(DiagnosticKind::BuildFailure, error.to_string())
                    .with_module(module)
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
        };
        write!(f, "{level}: {}", self.message)?;
        if let Some(help) = &self.help {
            write!(f, " (help: {help})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_graph::ModuleIdentifier;

    #[test]
    fn import_resolution_failures_point_at_the_importer() {
        let err = ModuleError::Resolution {
            origin: Some(ModuleIdentifier::new("src/a.js")),
            request: "./gone".to_string(),
            span: SourceSpan::new(4, 12),
            message: "not found".to_string(),
        };
        let diagnostic = Diagnostic::from(&err);
        assert_eq!(diagnostic.kind, DiagnosticKind::UnresolvedImport);
        assert_eq!(diagnostic.module.as_deref(), Some("src/a.js"));
        assert_eq!(diagnostic.span, Some(SourceSpan::new(4, 12)));
        assert!(diagnostic.is_error());
    }

    #[test]
    fn serializes_kind_in_snake_case() {
        let diagnostic = Diagnostic::warning(DiagnosticKind::CacheCorruption, "bad entry");
        let json = serde_json::to_string(&diagnostic).unwrap();
        assert!(json.contains("\"cache_corruption\""));
        assert!(json.contains("\"warning\""));
    }
}
