//! Export usage propagation.
//!
//! Usage is tracked per runtime and only ever grows. Seeds:
//!
//! - entry modules have their whole namespace used;
//! - every active, non-weak connection whose origin sits in a chunk of the
//!   runtime marks the exports its import statement reads;
//! - modules that are not ESM cannot be analysed and get their unknown
//!   exports marked `Unknown`;
//! - registered [`UsageRule`]s.
//!
//! A worklist then pushes usage backwards through re-export definitions and
//! star re-exports until nothing changes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use bale_graph::{
    ExportKind, ModuleGraph, ModuleIdentifier, ReferencedExports, RuntimeName, UsageState,
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::chunk_graph::ChunkGraph;
use crate::plugins::UsageRule;

/// Outcome of one propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    /// Provided exports no runtime uses, per module.
    pub unused: BTreeMap<ModuleIdentifier, Vec<String>>,
    /// Number of usage flags raised. Zero on a repeated run.
    pub changes: usize,
}

/// Propagate export usage for every runtime in `chunks`.
///
/// With `tree_shaking` off every placed module is treated as fully used.
#[tracing::instrument(skip_all, fields(tree_shaking = tree_shaking))]
pub fn propagate_usage(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    rules: &[Arc<dyn UsageRule>],
    tree_shaking: bool,
) -> bale_graph::Result<UsageReport> {
    let mut report = UsageReport::default();

    for runtime in chunks.runtimes() {
        let modules = runtime_modules(chunks, &runtime);
        if tree_shaking {
            let mut pass = RuntimePass::new(graph, runtime.clone());
            pass.seed(chunks, &modules, rules)?;
            pass.run()?;
            report.changes += pass.changes;
        } else {
            for module in &modules {
                if graph.with_exports_info_mut(module, |info| info.set_all_used(&runtime))? {
                    report.changes += 1;
                }
            }
        }
    }

    for module in chunks.modules() {
        let runtimes = chunks.module_runtimes(&module);
        let Some(info) = graph.exports_info(&module) else {
            continue;
        };
        let unused = info.unused_in_all(&runtimes);
        if !unused.is_empty() {
            report.unused.insert(module, unused);
        }
    }

    tracing::debug!(
        changes = report.changes,
        modules_with_unused = report.unused.len(),
        "usage propagation finished"
    );
    Ok(report)
}

/// Modules placed in any chunk of `runtime`, sorted.
fn runtime_modules(chunks: &ChunkGraph, runtime: &RuntimeName) -> BTreeSet<ModuleIdentifier> {
    chunks
        .chunks()
        .filter(|c| &c.runtime == runtime)
        .flat_map(|c| chunks.chunk_modules(c.ukey))
        .collect()
}

struct RuntimePass<'a> {
    graph: &'a ModuleGraph,
    runtime: RuntimeName,
    /// Names requested from each module, including ones it does not provide
    /// itself and may forward through star re-exports.
    requested: FxHashMap<ModuleIdentifier, BTreeSet<String>>,
    queue: VecDeque<ModuleIdentifier>,
    queued: FxHashSet<ModuleIdentifier>,
    changes: usize,
}

impl<'a> RuntimePass<'a> {
    fn new(graph: &'a ModuleGraph, runtime: RuntimeName) -> Self {
        Self {
            graph,
            runtime,
            requested: FxHashMap::default(),
            queue: VecDeque::new(),
            queued: FxHashSet::default(),
            changes: 0,
        }
    }

    fn seed(
        &mut self,
        chunks: &ChunkGraph,
        modules: &BTreeSet<ModuleIdentifier>,
        rules: &[Arc<dyn UsageRule>],
    ) -> bale_graph::Result<()> {
        let entry_roots: Vec<_> = chunks
            .entrypoints()
            .filter(|(_, g)| g.runtime == self.runtime)
            .map(|(_, g)| g.root.clone())
            .collect();
        for root in entry_roots {
            self.mark(&root, &ReferencedExports::Namespace, UsageState::Used)?;
        }

        for module_id in modules {
            let Some(module) = self.graph.module(module_id) else {
                continue;
            };
            if !module.is_esm() {
                let runtime = self.runtime.clone();
                if self.graph.with_exports_info_mut(module_id, |info| {
                    info.set_other_used(&runtime, UsageState::Unknown)
                })? {
                    self.changes += 1;
                }
            }
            for connection in self.graph.active_connections(module_id, &self.runtime) {
                if connection.dependency.is_weak()
                    || !self.graph.contains_module(&connection.target)
                {
                    continue;
                }
                self.mark(
                    &connection.target,
                    &connection.dependency.referenced_exports,
                    UsageState::Used,
                )?;
            }
            for rule in rules {
                let referenced = rule.referenced_exports(&module, &self.runtime);
                if referenced != ReferencedExports::None {
                    tracing::trace!(rule = rule.name(), module = %module_id, "usage rule matched");
                }
                self.mark(module_id, &referenced, UsageState::Used)?;
            }
            self.enqueue(module_id.clone());
        }
        Ok(())
    }

    fn run(&mut self) -> bale_graph::Result<()> {
        while let Some(module_id) = self.queue.pop_front() {
            self.queued.remove(&module_id);
            self.forward(&module_id)?;
        }
        Ok(())
    }

    /// Push the usage of `module_id` into the modules it re-exports from.
    fn forward(&mut self, module_id: &ModuleIdentifier) -> bale_graph::Result<()> {
        let (Some(module), Some(info)) = (
            self.graph.module(module_id),
            self.graph.exports_info(module_id),
        ) else {
            return Ok(());
        };
        let targets: FxHashMap<usize, ModuleIdentifier> = self
            .graph
            .active_connections(module_id, &self.runtime)
            .into_iter()
            .filter(|c| !c.dependency.is_weak() && self.graph.contains_module(&c.target))
            .map(|c| (c.dependency_index, c.target))
            .collect();

        for definition in &module.build_info.exports {
            let ExportKind::ReExport {
                dependency,
                imported,
            } = &definition.kind
            else {
                continue;
            };
            let state = info.usage(&definition.name, &self.runtime);
            if !state.is_used() {
                continue;
            }
            let Some(target) = targets.get(dependency) else {
                continue;
            };
            let referenced = if imported == "*" {
                ReferencedExports::Namespace
            } else {
                ReferencedExports::Names(vec![imported.clone()])
            };
            self.mark(target, &referenced, state)?;
        }

        if module.build_info.star_exports.is_empty() {
            return Ok(());
        }
        let other = info.other_usage(&self.runtime);
        let forwarded = if other.is_used() {
            ReferencedExports::Namespace
        } else {
            let names: Vec<String> = self
                .requested
                .get(module_id)
                .into_iter()
                .flatten()
                .filter(|name| !info.is_provided(name))
                .cloned()
                .collect();
            ReferencedExports::Names(names)
        };
        let state = if other.is_used() {
            other
        } else {
            UsageState::Used
        };
        for dependency in &module.build_info.star_exports {
            if let Some(target) = targets.get(dependency) {
                self.mark(target, &forwarded, state)?;
            }
        }
        Ok(())
    }

    /// Raise usage of `target`; requeue it when anything changed.
    fn mark(
        &mut self,
        target: &ModuleIdentifier,
        referenced: &ReferencedExports,
        state: UsageState,
    ) -> bale_graph::Result<()> {
        let runtime = self.runtime.clone();
        let (raised, grew) = match referenced {
            ReferencedExports::None => (false, false),
            ReferencedExports::Namespace => {
                let raised = self.graph.with_exports_info_mut(target, |info| {
                    if state == UsageState::Used {
                        info.set_all_used(&runtime)
                    } else {
                        info.set_other_used(&runtime, state)
                    }
                })?;
                (raised, false)
            }
            ReferencedExports::Names(names) => {
                let requested = self.requested.entry(target.clone()).or_default();
                let mut grew = false;
                for name in names {
                    grew |= requested.insert(name.clone());
                }
                let raised = self.graph.with_exports_info_mut(target, |info| {
                    names
                        .iter()
                        .fold(false, |acc, name| info.set_used(name, &runtime, state) | acc)
                })?;
                (raised, grew)
            }
        };
        if raised {
            self.changes += 1;
        }
        if raised || grew {
            self.enqueue(target.clone());
        }
        Ok(())
    }

    fn enqueue(&mut self, module: ModuleIdentifier) {
        if self.queued.insert(module.clone()) {
            self.queue.push_back(module);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_graph::{ChunkGroupKind, ChunkKind};
    use crate::plugins::KeepExportsRule;
    use bale_graph::{Dependency, Module};

    /// One entry chunk holding every module of `graph`, rooted at `entry`.
    fn single_chunk(graph: &ModuleGraph, entry: &str) -> ChunkGraph {
        let mut chunks = ChunkGraph::new();
        let rt = RuntimeName::default();
        let group = chunks.add_group(
            ChunkGroupKind::Entrypoint {
                name: "main".into(),
            },
            entry.into(),
            rt.clone(),
            None,
        );
        let chunk = chunks.add_chunk(Some("main".into()), ChunkKind::Entry, rt, true);
        chunks.connect_chunk_and_group(chunk, group);
        for module in graph.modules() {
            chunks.connect_chunk_and_module(chunk, module.identifier.clone());
        }
        chunks
    }

    fn add(graph: &ModuleGraph, module: Module) {
        let id = module.identifier.clone();
        let deps = module.dependencies.clone();
        graph.add_module(module).unwrap();
        for (index, dep) in deps.iter().enumerate() {
            let target = ModuleIdentifier::new(dep.request.trim_start_matches("./"));
            graph
                .add_connection(id.clone(), index, dep.clone(), target)
                .unwrap();
        }
    }

    #[test]
    fn unused_named_export_is_reported() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::static_import("./lib.js", ["a"])])
                .build(),
        );
        add(&graph, Module::builder("lib.js".into()).exports(["a", "b"]).build());
        let chunks = single_chunk(&graph, "index.js");

        let report = propagate_usage(&graph, &chunks, &[], true).unwrap();
        assert_eq!(
            report.unused.get(&ModuleIdentifier::new("lib.js")),
            Some(&vec!["b".to_string()])
        );
    }

    #[test]
    fn re_exports_forward_usage() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::static_import("./barrel.js", ["x"])])
                .build(),
        );
        add(
            &graph,
            Module::builder("barrel.js".into())
                .dependencies(vec![
                    Dependency::static_import("./x.js", Vec::<String>::new()),
                    Dependency::static_import("./rest.js", Vec::<String>::new()),
                ])
                .re_export("x", 0, "value")
                .star_export(1)
                .build(),
        );
        add(&graph, Module::builder("x.js".into()).exports(["value", "other"]).build());
        add(&graph, Module::builder("rest.js".into()).exports(["y", "z"]).build());
        let chunks = single_chunk(&graph, "index.js");

        let report = propagate_usage(&graph, &chunks, &[], true).unwrap();
        assert_eq!(
            report.unused.get(&ModuleIdentifier::new("x.js")),
            Some(&vec!["other".to_string()])
        );
        assert_eq!(
            report.unused.get(&ModuleIdentifier::new("rest.js")),
            Some(&vec!["y".to_string(), "z".to_string()])
        );
    }

    #[test]
    fn star_exports_forward_unprovided_names() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::static_import("./barrel.js", ["y"])])
                .build(),
        );
        add(
            &graph,
            Module::builder("barrel.js".into())
                .dependencies(vec![Dependency::static_import(
                    "./rest.js",
                    Vec::<String>::new(),
                )])
                .star_export(0)
                .build(),
        );
        add(&graph, Module::builder("rest.js".into()).exports(["y", "z"]).build());
        let chunks = single_chunk(&graph, "index.js");

        let report = propagate_usage(&graph, &chunks, &[], true).unwrap();
        assert_eq!(
            report.unused.get(&ModuleIdentifier::new("rest.js")),
            Some(&vec!["z".to_string()])
        );
    }

    #[test]
    fn second_run_changes_nothing() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::namespace_import("./lib.js")])
                .exports(["main"])
                .build(),
        );
        add(&graph, Module::builder("lib.js".into()).exports(["a"]).build());
        let chunks = single_chunk(&graph, "index.js");

        let first = propagate_usage(&graph, &chunks, &[], true).unwrap();
        let second = propagate_usage(&graph, &chunks, &[], true).unwrap();
        assert!(first.changes > 0);
        assert_eq!(second.changes, 0);
        assert_eq!(first.unused, second.unused);
    }

    #[test]
    fn rules_seed_extra_usage() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::side_effect_import("./routes/home.js")])
                .build(),
        );
        add(
            &graph,
            Module::builder("routes/home.js".into())
                .exports(["loader", "helper"])
                .build(),
        );
        let chunks = single_chunk(&graph, "index.js");
        let rules: Vec<Arc<dyn UsageRule>> =
            vec![Arc::new(KeepExportsRule::new("routes/", ["loader"]))];

        let report = propagate_usage(&graph, &chunks, &rules, true).unwrap();
        assert_eq!(
            report.unused.get(&ModuleIdentifier::new("routes/home.js")),
            Some(&vec!["helper".to_string()])
        );
    }

    #[test]
    fn disabled_tree_shaking_keeps_everything() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::static_import("./lib.js", ["a"])])
                .build(),
        );
        add(&graph, Module::builder("lib.js".into()).exports(["a", "b"]).build());
        let chunks = single_chunk(&graph, "index.js");

        let report = propagate_usage(&graph, &chunks, &[], false).unwrap();
        assert!(report.unused.is_empty());
    }

    #[test]
    fn commonjs_exports_stay_unknown() {
        let graph = ModuleGraph::new();
        add(
            &graph,
            Module::builder("index.js".into())
                .dependencies(vec![Dependency::side_effect_import("./legacy.js")])
                .build(),
        );
        add(
            &graph,
            Module::builder("legacy.js".into())
                .exports(["a"])
                .format(bale_graph::ModuleFormat::CommonJs)
                .build(),
        );
        let chunks = single_chunk(&graph, "index.js");

        let report = propagate_usage(&graph, &chunks, &[], true).unwrap();
        assert!(!report.unused.contains_key(&ModuleIdentifier::new("legacy.js")));
        let info = graph.exports_info(&"legacy.js".into()).unwrap();
        assert_eq!(
            info.usage("a", &RuntimeName::default()),
            UsageState::Unknown
        );
    }
}
