//! Reference output format.
//!
//! Every module becomes the body of
//! `function(module, exports, __bale_require__) { ... }`, wrapped by the
//! chunk renderer. Imports turn into `__bale_dep_<member>_<index>__`
//! bindings, dynamic imports into loaders that fetch the target's chunks by
//! file name. Sources are copied verbatim; no syntax is rewritten.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use bale_graph::{DependencyKind, ExportKind, Module, ModuleIdentifier, ModuleKind};

use super::{
    CodeGenerationContext, CodeGenerationError, CodeGenerationResult, CodeGenerator,
    RuntimeRequirement,
};

const FORMAT_FINGERPRINT: &str = "bale-default-v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodeGenerator;

impl CodeGenerator for DefaultCodeGenerator {
    fn generate(
        &self,
        ctx: &CodeGenerationContext<'_>,
    ) -> Result<CodeGenerationResult, CodeGenerationError> {
        let mut out = Output::new(ctx.module);
        match ctx.module.kind {
            ModuleKind::JavaScript => javascript(ctx, &mut out)?,
            ModuleKind::Json => {
                let body = ctx.module.source.trim();
                let body = if body.is_empty() { "{}" } else { body };
                out.line(format!("module.exports = {body};"));
            }
            ModuleKind::Css => {
                let css = out.quote(&ctx.module.source)?;
                out.require(RuntimeRequirement::InjectStyle);
                out.line(format!("__bale_require__.s({css});"));
            }
            ModuleKind::Asset => {
                let file = out.quote(ctx.module.identifier.short_name())?;
                out.require(RuntimeRequirement::PublicPath);
                out.line(format!("module.exports = __bale_require__.p + {file};"));
            }
            ModuleKind::External => {
                let name = out.quote(ctx.module.identifier.short_name())?;
                out.require(RuntimeRequirement::External);
                out.line(format!("module.exports = __bale_require__.g({name});"));
            }
        }
        Ok(out.finish())
    }

    fn fingerprint(&self) -> &str {
        FORMAT_FINGERPRINT
    }
}

struct Output {
    module: ModuleIdentifier,
    source: String,
    requirements: BTreeSet<RuntimeRequirement>,
    referenced: BTreeSet<crate::chunk_graph::ChunkUkey>,
}

impl Output {
    fn new(module: &Module) -> Self {
        Self {
            module: module.identifier.clone(),
            source: String::new(),
            requirements: BTreeSet::new(),
            referenced: BTreeSet::new(),
        }
    }

    fn line(&mut self, line: impl AsRef<str>) {
        self.source.push_str(line.as_ref());
        self.source.push('\n');
    }

    fn require(&mut self, requirement: RuntimeRequirement) {
        self.requirements.insert(requirement);
    }

    fn quote(&self, value: &str) -> Result<String, CodeGenerationError> {
        serde_json::to_string(value).map_err(|e| CodeGenerationError {
            module: self.module.clone(),
            message: e.to_string(),
        })
    }

    fn finish(self) -> CodeGenerationResult {
        CodeGenerationResult {
            source: self.source,
            runtime_requirements: self.requirements,
            referenced_chunks: self.referenced,
        }
    }
}

fn binding(member: usize, dependency: usize) -> String {
    format!("__bale_dep_{member}_{dependency}__")
}

fn javascript(
    ctx: &CodeGenerationContext<'_>,
    out: &mut Output,
) -> Result<(), CodeGenerationError> {
    let members: Vec<ModuleIdentifier> = match ctx.concatenation {
        Some(scope) => scope.modules().cloned().collect(),
        None => vec![ctx.module.identifier.clone()],
    };

    define_exports(ctx, out)?;

    // Inner modules first, deepest absorbed last in declared order.
    let order: Vec<usize> = (1..members.len()).rev().chain(std::iter::once(0)).collect();
    for index in order {
        let member_id = &members[index];
        let Some(member) = ctx.graph.module(member_id) else {
            continue;
        };
        if index > 0 {
            out.line(format!("/* concatenated {member_id} */"));
        }
        imports(ctx, out, index, &member)?;
        out.line(member.source.trim_end());
    }
    Ok(())
}

/// Getter map of the used exports of the scope root.
fn define_exports(
    ctx: &CodeGenerationContext<'_>,
    out: &mut Output,
) -> Result<(), CodeGenerationError> {
    let module = ctx.module;
    if !module.is_esm() || module.build_info.exports.is_empty() {
        return Ok(());
    }

    let mut getters = Vec::new();
    let mut unused = Vec::new();
    for definition in &module.build_info.exports {
        if !ctx.is_export_used(&definition.name) {
            unused.push(definition.name.as_str());
            continue;
        }
        let key = out.quote(&definition.name)?;
        let value = match &definition.kind {
            ExportKind::Local => definition.name.clone(),
            ExportKind::ReExport {
                dependency,
                imported,
            } => {
                let target = module
                    .dependency(*dependency)
                    .and_then(|_| {
                        ctx.graph
                            .connections(&module.identifier)
                            .into_iter()
                            .find(|c| c.dependency_index == *dependency)
                    })
                    .map(|c| c.target);
                match target {
                    Some(t) if ctx.in_scope(&t) => imported.clone(),
                    _ if imported == "*" => binding(0, *dependency),
                    _ => format!("{}[{}]", binding(0, *dependency), out.quote(imported)?),
                }
            }
        };
        getters.push(format!("{key}: () => {value}"));
    }

    if !getters.is_empty() {
        out.require(RuntimeRequirement::DefineExports);
        out.line(format!(
            "__bale_require__.d(exports, {{ {} }});",
            getters.join(", ")
        ));
    }
    if !unused.is_empty() {
        out.line(format!("/* unused exports: {} */", unused.join(", ")));
    }
    Ok(())
}

fn imports(
    ctx: &CodeGenerationContext<'_>,
    out: &mut Output,
    member_index: usize,
    member: &Module,
) -> Result<(), CodeGenerationError> {
    for connection in ctx.graph.connections(&member.identifier) {
        let request = &connection.dependency.request;
        let name = binding(member_index, connection.dependency_index);

        if ctx.in_scope(&connection.target) {
            out.line(format!("/* inlined {request} */"));
            continue;
        }
        if connection.kind() == DependencyKind::Weak {
            out.line(format!("/* weak {request} */"));
            continue;
        }
        if !connection.is_active(ctx.runtime) {
            out.line(format!("/* inactive in {}: {request} */", ctx.runtime));
            continue;
        }
        let Some(target) = ctx.graph.module(&connection.target) else {
            let message = out.quote(&format!("Cannot find module '{request}'"))?;
            out.line(format!(
                "var {name} = (() => {{ throw new Error({message}); }})();"
            ));
            continue;
        };
        let target_id = out.quote(&ctx.module_id(&target.identifier))?;

        match connection.kind() {
            DependencyKind::Dynamic => {
                let chunks = ctx
                    .dynamic_imports
                    .get(&(member.identifier.clone(), connection.dependency_index))
                    .cloned()
                    .unwrap_or_default();
                let mut files = String::new();
                for (i, chunk) in chunks.iter().enumerate() {
                    let (Some(file), Some(c)) =
                        (ctx.chunk_filenames.get(chunk), ctx.chunks.chunk(*chunk))
                    else {
                        continue;
                    };
                    if i > 0 {
                        files.push_str(", ");
                    }
                    let _ = write!(files, "{}: {}", out.quote(&c.id_or_key())?, out.quote(file)?);
                    out.referenced.insert(*chunk);
                }
                out.require(RuntimeRequirement::LoadChunk);
                out.line(format!(
                    "var {name} = () => __bale_require__.e({{ {files} }}).then(() => __bale_require__({target_id}));"
                ));
            }
            DependencyKind::Static | DependencyKind::Weak => {
                out.require(RuntimeRequirement::Require);
                if member.is_esm() && !target.is_esm() {
                    out.require(RuntimeRequirement::InteropRequire);
                    out.line(format!(
                        "var {name} = __bale_require__.n(__bale_require__({target_id}));"
                    ));
                } else {
                    out.line(format!("var {name} = __bale_require__({target_id});"));
                }
            }
        }
    }

    if member_index == 0 && member.is_esm() && ctx.used_exports.other.is_used() {
        for dependency in &member.build_info.star_exports {
            let name = binding(0, *dependency);
            out.require(RuntimeRequirement::DefineExports);
            out.line(format!(
                "for (const k in {name}) if (!(k in exports)) __bale_require__.d(exports, {{ [k]: () => {name}[k] }});"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_graph::build_chunk_graph;
    use crate::codegen::generate_modules;
    use crate::entry::EntryOptions;
    use crate::ids::{assign_chunk_ids, assign_module_ids};
    use crate::optimize::{concatenate_modules, propagate_usage};
    use crate::test_support::link;
    use bale_config::{IdStrategy, RuntimeChunkMode};
    use bale_graph::{Dependency, RuntimeName};
    use rustc_hash::FxHashMap;

    fn generate(modules: Vec<Module>, concatenate: bool) -> (Vec<(String, CodeGenerationResult)>, crate::chunk_graph::ChunkGraph) {
        let entries = [EntryOptions::new("main", "index.js")];
        let graph = link(modules, &entries);
        let mut chunks = build_chunk_graph(&graph, &entries, RuntimeChunkMode::Embedded);
        propagate_usage(&graph, &chunks, &[], true).unwrap();
        if concatenate {
            concatenate_modules(&graph, &mut chunks, &[]);
        }
        assign_module_ids(&graph, &mut chunks, IdStrategy::Named, 4);
        assign_chunk_ids(&mut chunks, IdStrategy::Named, 4);
        let filenames: FxHashMap<_, _> = chunks
            .chunks()
            .map(|c| (c.ukey, format!("{}.[hash].js", c.id_or_key())))
            .collect();
        let results = generate_modules(&graph, &chunks, &DefaultCodeGenerator, &filenames).unwrap();
        let rt = RuntimeName::default();
        let out = chunks
            .modules()
            .into_iter()
            .filter_map(|m| {
                results
                    .get(&m, &rt)
                    .map(|r| (m.as_str().to_string(), (**r).clone()))
            })
            .collect();
        (out, chunks)
    }

    #[test]
    fn unused_exports_are_left_out_of_the_getter_map() {
        let (results, _) = generate(
            vec![
                Module::builder("index.js".into())
                    .dependencies(vec![Dependency::static_import("./lib.js", ["a"])])
                    .build(),
                Module::builder("lib.js".into())
                    .source("export const a = 1; export const b = 2;")
                    .exports(["a", "b"])
                    .build(),
            ],
            false,
        );
        let lib = &results.iter().find(|(id, _)| id == "lib.js").unwrap().1;
        assert!(lib.source.contains("\"a\": () => a"));
        assert!(!lib.source.contains("\"b\": () => b"));
        assert!(lib.source.contains("/* unused exports: b */"));
        assert!(lib.runtime_requirements.contains(&RuntimeRequirement::DefineExports));
    }

    #[test]
    fn dynamic_imports_reference_target_chunks() {
        let (results, chunks) = generate(
            vec![
                Module::builder("index.js".into())
                    .dependencies(vec![Dependency::dynamic_import("./lazy.js")])
                    .build(),
                Module::builder("lazy.js".into()).exports(["x"]).build(),
            ],
            false,
        );
        let index = &results.iter().find(|(id, _)| id == "index.js").unwrap().1;
        let lazy_chunk = chunks.module_chunks(&"lazy.js".into())[0];
        assert!(index.referenced_chunks.contains(&lazy_chunk));
        assert!(index.source.contains("__bale_require__.e({ \"lazy\": \"lazy.[hash].js\" })"));
        assert!(index.runtime_requirements.contains(&RuntimeRequirement::LoadChunk));
    }

    #[test]
    fn concatenated_scope_is_emitted_by_its_root() {
        let (results, _) = generate(
            vec![
                Module::builder("index.js".into())
                    .source("console.log(a);")
                    .dependencies(vec![Dependency::static_import("./a.js", ["a"])])
                    .build(),
                Module::builder("a.js".into())
                    .source("export const a = 1;")
                    .exports(["a"])
                    .build(),
            ],
            true,
        );
        assert_eq!(results.len(), 1);
        let index = &results[0].1;
        assert!(index.source.contains("/* concatenated a.js */"));
        assert!(index.source.contains("/* inlined ./a.js */"));
        let inner = index.source.find("export const a = 1;").unwrap();
        let root = index.source.find("console.log(a);").unwrap();
        assert!(inner < root);
    }

    #[test]
    fn commonjs_targets_get_interop() {
        let (results, _) = generate(
            vec![
                Module::builder("index.js".into())
                    .dependencies(vec![Dependency::static_import("./legacy.js", ["x"])])
                    .build(),
                Module::builder("legacy.js".into())
                    .format(bale_graph::ModuleFormat::CommonJs)
                    .build(),
            ],
            false,
        );
        let index = &results.iter().find(|(id, _)| id == "index.js").unwrap().1;
        assert!(index.source.contains("__bale_require__.n(__bale_require__(\"legacy.js\"))"));
        assert!(index.runtime_requirements.contains(&RuntimeRequirement::InteropRequire));
    }

    #[test]
    fn css_modules_inject_styles() {
        let (results, _) = generate(
            vec![
                Module::builder("index.js".into())
                    .dependencies(vec![Dependency::side_effect_import("./a.css")])
                    .build(),
                Module::builder("a.css".into()).source("a { color: red }").build(),
            ],
            false,
        );
        let css = &results.iter().find(|(id, _)| id == "a.css").unwrap().1;
        assert_eq!(css.source, "__bale_require__.s(\"a { color: red }\");\n");
    }
}
