use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::module_id::ModuleIdentifier;

/// blake3 digest of a module's source.
pub type ContentHash = [u8; 32];

/// Built module as produced by a module factory.
///
/// Modules are immutable once built and shared through `Arc`. They never refer
/// to other modules directly; edges live in the graph's connection arena.
/// Heavy collections are wrapped in `Arc` so cloning a module is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub identifier: ModuleIdentifier,
    pub kind: ModuleKind,
    pub source: Arc<str>,
    /// Raw dependency list in declaration order. Connection dependency
    /// indices point into this list.
    pub dependencies: Arc<Vec<Dependency>>,
    pub build_info: BuildInfo,
}

/// Metadata gathered while building a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub exports: Vec<ExportDefinition>,
    /// Dependency indices of `export * from '...'` statements.
    pub star_exports: Vec<usize>,
    pub format: ModuleFormat,
    pub side_effects: bool,
    pub size: usize,
    pub content_hash: ContentHash,
}

/// One named export of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportDefinition {
    pub name: String,
    pub kind: ExportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportKind {
    /// Declared in this module.
    Local,
    /// `export { imported as name } from '...'`. `imported` is `*` for
    /// `export * as name from '...'`.
    ReExport { dependency: usize, imported: String },
}

impl ExportDefinition {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExportKind::Local,
        }
    }

    pub fn re_export(name: impl Into<String>, dependency: usize, imported: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExportKind::ReExport {
                dependency,
                imported: imported.into(),
            },
        }
    }
}

/// Closed set of module kinds. Each kind has its own code generation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleKind {
    JavaScript,
    Json,
    Css,
    Asset,
    /// Provided by the host environment at runtime; never bundled.
    External,
}

impl ModuleKind {
    /// Infer the kind from the extension of an identifier's resource part.
    pub fn from_identifier(identifier: &ModuleIdentifier) -> Self {
        let name = identifier.short_name();
        let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        match ext {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "cts" | "tsx" => Self::JavaScript,
            "json" => Self::Json,
            "css" => Self::Css,
            "" => Self::JavaScript,
            _ => Self::Asset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Json => "json",
            Self::Css => "css",
            Self::Asset => "asset",
            Self::External => "external",
        }
    }
}

/// Module definition format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleFormat {
    Esm,
    CommonJs,
    Unknown,
}

impl Module {
    /// Create a builder with defaults: kind inferred from the identifier,
    /// ESM format, no side effects, empty source.
    pub fn builder(identifier: ModuleIdentifier) -> ModuleBuilder {
        let kind = ModuleKind::from_identifier(&identifier);
        ModuleBuilder {
            identifier,
            kind,
            source: Arc::from(""),
            dependencies: Vec::new(),
            exports: Vec::new(),
            star_exports: Vec::new(),
            format: ModuleFormat::Esm,
            side_effects: false,
        }
    }

    /// Names of every export this module provides itself (locals and named
    /// re-exports), in declaration order.
    pub fn provided_exports(&self) -> impl Iterator<Item = &str> {
        self.build_info.exports.iter().map(|e| e.name.as_str())
    }

    pub fn export(&self, name: &str) -> Option<&ExportDefinition> {
        self.build_info.exports.iter().find(|e| e.name == name)
    }

    pub fn dependency(&self, index: usize) -> Option<&Dependency> {
        self.dependencies.get(index)
    }

    pub fn has_side_effects(&self) -> bool {
        self.build_info.side_effects
    }

    pub fn is_esm(&self) -> bool {
        self.build_info.format == ModuleFormat::Esm
    }

    pub fn size(&self) -> usize {
        self.build_info.size
    }

    pub fn content_hash_hex(&self) -> String {
        blake3::Hash::from(self.build_info.content_hash)
            .to_hex()
            .to_string()
    }
}

/// Builder for `Module`. Size and content hash are derived from the source
/// in [`ModuleBuilder::build`].
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    identifier: ModuleIdentifier,
    kind: ModuleKind,
    source: Arc<str>,
    dependencies: Vec<Dependency>,
    exports: Vec<ExportDefinition>,
    star_exports: Vec<usize>,
    format: ModuleFormat,
    side_effects: bool,
}

impl ModuleBuilder {
    pub fn kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn source(mut self, source: impl AsRef<str>) -> Self {
        self.source = Arc::from(source.as_ref());
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Declare local exports by name.
    pub fn exports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exports
            .extend(names.into_iter().map(ExportDefinition::local));
        self
    }

    pub fn export_definition(mut self, definition: ExportDefinition) -> Self {
        self.exports.push(definition);
        self
    }

    /// `export { imported as name } from` the dependency at `dependency`.
    pub fn re_export(
        self,
        name: impl Into<String>,
        dependency: usize,
        imported: impl Into<String>,
    ) -> Self {
        self.export_definition(ExportDefinition::re_export(name, dependency, imported))
    }

    /// `export * from` the dependency at `dependency`.
    pub fn star_export(mut self, dependency: usize) -> Self {
        self.star_exports.push(dependency);
        self
    }

    pub fn format(mut self, format: ModuleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn side_effects(mut self, side_effects: bool) -> Self {
        self.side_effects = side_effects;
        self
    }

    pub fn build(self) -> Module {
        let content_hash = *blake3::hash(self.source.as_bytes()).as_bytes();
        Module {
            identifier: self.identifier,
            kind: self.kind,
            dependencies: Arc::new(self.dependencies),
            build_info: BuildInfo {
                exports: self.exports,
                star_exports: self.star_exports,
                format: self.format,
                side_effects: self.side_effects,
                size: self.source.len(),
                content_hash,
            },
            source: self.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_inferred_from_resource() {
        let kind = |s: &str| ModuleKind::from_identifier(&ModuleIdentifier::new(s));
        assert_eq!(kind("src/a.ts"), ModuleKind::JavaScript);
        assert_eq!(kind("css!./a.css?inline"), ModuleKind::Css);
        assert_eq!(kind("data.json"), ModuleKind::Json);
        assert_eq!(kind("logo.png"), ModuleKind::Asset);
    }

    #[test]
    fn build_derives_size_and_hash() {
        let a = Module::builder("a.js".into()).source("export const a = 1;").build();
        let b = Module::builder("b.js".into()).source("export const a = 1;").build();
        assert_eq!(a.size(), 19);
        assert_eq!(a.build_info.content_hash, b.build_info.content_hash);
        assert_eq!(a.content_hash_hex().len(), 64);
    }

    #[test]
    fn provided_exports_include_re_exports() {
        let module = Module::builder("a.js".into())
            .exports(["x"])
            .re_export("y", 0, "z")
            .build();
        let names: Vec<_> = module.provided_exports().collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(matches!(
            module.export("y").map(|e| &e.kind),
            Some(ExportKind::ReExport { dependency: 0, .. })
        ));
    }
}
