use serde::{Deserialize, Serialize};

use crate::span::SourceSpan;

/// How a dependency is loaded at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyKind {
    /// `import x from './x'`: the target is needed before the origin runs.
    Static,
    /// `import('./x')`: a split point; the target loads on demand.
    Dynamic,
    /// A reference that never pulls the target into the output by itself.
    Weak,
}

/// Which exports of the target an import reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferencedExports {
    /// Specific named bindings.
    Names(Vec<String>),
    /// The whole namespace object (`import * as ns`, dynamic import).
    Namespace,
    /// Nothing is read (`import './polyfill'`).
    None,
}

/// Unresolved edge descriptor as extracted from a module's source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub request: String,
    pub kind: DependencyKind,
    pub referenced_exports: ReferencedExports,
    /// The import sits in code that only runs under some condition.
    pub conditional: bool,
    pub span: SourceSpan,
}

impl Dependency {
    fn with_kind(
        request: impl Into<String>,
        kind: DependencyKind,
        referenced_exports: ReferencedExports,
    ) -> Self {
        Self {
            request: request.into(),
            kind,
            referenced_exports,
            conditional: false,
            span: SourceSpan::default(),
        }
    }

    /// Static import of the given named bindings.
    pub fn static_import<I, S>(request: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        Self::with_kind(
            request,
            DependencyKind::Static,
            ReferencedExports::Names(names),
        )
    }

    /// `import * as ns from '...'`.
    pub fn namespace_import(request: impl Into<String>) -> Self {
        Self::with_kind(request, DependencyKind::Static, ReferencedExports::Namespace)
    }

    /// `import '...'` evaluated only for its side effects.
    pub fn side_effect_import(request: impl Into<String>) -> Self {
        Self::with_kind(request, DependencyKind::Static, ReferencedExports::None)
    }

    /// `import('...')`. The resolved namespace is handed to the caller, so every
    /// export counts as read.
    pub fn dynamic_import(request: impl Into<String>) -> Self {
        Self::with_kind(request, DependencyKind::Dynamic, ReferencedExports::Namespace)
    }

    pub fn weak(request: impl Into<String>) -> Self {
        Self::with_kind(request, DependencyKind::Weak, ReferencedExports::None)
    }

    /// Dependency that starts an entrypoint.
    pub fn entry(request: impl Into<String>) -> Self {
        Self::with_kind(request, DependencyKind::Static, ReferencedExports::Namespace)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = span;
        self
    }

    /// Mark the dependency as sitting inside conditionally executed code.
    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    pub fn is_async(&self) -> bool {
        self.kind == DependencyKind::Dynamic
    }

    pub fn is_weak(&self) -> bool {
        self.kind == DependencyKind::Weak
    }
}
