//! Graph fixtures for unit tests.

use bale_graph::{Dependency, Module, ModuleGraph, ModuleIdentifier};

use crate::entry::EntryOptions;

/// Add `modules` and connect every dependency to the identifier spelled by
/// its request without a leading `./`. Entries name their target module.
pub(crate) fn link(modules: Vec<Module>, entries: &[EntryOptions]) -> ModuleGraph {
    let graph = ModuleGraph::new();
    for module in modules {
        let id = module.identifier.clone();
        let deps = module.dependencies.clone();
        graph.add_module(module).unwrap();
        for (index, dep) in deps.iter().enumerate() {
            graph
                .add_connection(id.clone(), index, dep.clone(), target_of(&dep.request))
                .unwrap();
        }
    }
    for entry in entries {
        graph
            .add_entry_connection(
                entry.name.clone(),
                Dependency::entry(entry.request.clone()),
                target_of(&entry.request),
            )
            .unwrap();
    }
    graph.freeze();
    graph
}

pub(crate) fn target_of(request: &str) -> ModuleIdentifier {
    ModuleIdentifier::new(request.trim_start_matches("./"))
}

/// ESM module with a source of `size` bytes.
pub(crate) fn sized(id: &str, size: usize, deps: Vec<Dependency>) -> Module {
    Module::builder(id.into())
        .source("x".repeat(size))
        .dependencies(deps)
        .build()
}
