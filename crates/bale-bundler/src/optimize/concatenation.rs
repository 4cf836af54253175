//! Module concatenation.
//!
//! A module can be merged into the scope of its importer when it is
//! imported by that single module only, through static connections that are
//! active wherever the module runs. Both sides must be ESM JavaScript and
//! live in exactly the same chunks. A side-effectful module is never merged
//! across a conditional import, since merging would run its effects
//! unconditionally.
//!
//! Roots are tried in first-reachable order from the entrypoints. A root
//! absorbs eligible imports depth first, in the order its dependencies are
//! declared, and keeps absorbing through the modules it took in.

use std::sync::Arc;

use bale_graph::{DependencyKind, Module, ModuleGraph, ModuleIdentifier, ModuleKind};
use rustc_hash::FxHashSet;

use crate::chunk_graph::{ChunkGraph, ConcatenatedModule};
use crate::plugins::ConcatenationRule;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcatenationReport {
    /// Root of every concatenation formed, in formation order.
    pub roots: Vec<ModuleIdentifier>,
    /// Modules merged into another module's scope.
    pub absorbed: usize,
}

#[tracing::instrument(skip_all)]
pub fn concatenate_modules(
    graph: &ModuleGraph,
    chunks: &mut ChunkGraph,
    rules: &[Arc<dyn ConcatenationRule>],
) -> ConcatenationReport {
    let entry_roots: Vec<ModuleIdentifier> =
        chunks.entrypoints().map(|(_, g)| g.root.clone()).collect();
    let entries: FxHashSet<_> = entry_roots.iter().cloned().collect();
    let candidates = graph.reachable_from(&entry_roots, None);

    let mut claimed: FxHashSet<ModuleIdentifier> = FxHashSet::default();
    let mut report = ConcatenationReport::default();

    for candidate in candidates {
        if claimed.contains(&candidate) || chunks.module_chunks(&candidate).is_empty() {
            continue;
        }
        let Some(root) = graph.module(&candidate) else {
            continue;
        };
        if !is_scope_hoistable(&root) {
            continue;
        }

        let mut members = vec![candidate.clone()];
        let mut stack = vec![candidate.clone()];
        let mut in_scope: FxHashSet<ModuleIdentifier> = FxHashSet::from_iter([candidate.clone()]);

        while let Some(consumer_id) = stack.pop() {
            let Some(consumer) = graph.module(&consumer_id) else {
                continue;
            };
            // Reverse so the first declared dependency is visited first.
            let targets: Vec<_> = graph
                .connections(&consumer_id)
                .into_iter()
                .map(|c| c.target)
                .collect();
            for target in targets.into_iter().rev() {
                if claimed.contains(&target) || in_scope.contains(&target) || entries.contains(&target)
                {
                    continue;
                }
                if can_absorb(graph, chunks, rules, &consumer, &target) {
                    in_scope.insert(target.clone());
                    members.push(target.clone());
                    stack.push(target);
                }
            }
        }

        if members.len() > 1 {
            // Depth-first order: rebuild it from the scope so inner modules
            // appear in declared order under their consumer.
            let ordered = declared_order(graph, &candidate, &in_scope);
            tracing::debug!(root = %candidate, modules = ordered.len(), "concatenated modules");
            report.absorbed += ordered.len() - 1;
            report.roots.push(candidate.clone());
            claimed.extend(ordered.iter().cloned());
            chunks.add_concatenation(ConcatenatedModule::new(candidate.clone(), ordered));
        } else {
            claimed.insert(candidate);
        }
    }

    tracing::debug!(
        concatenations = report.roots.len(),
        absorbed = report.absorbed,
        "module concatenation finished"
    );
    report
}

fn is_scope_hoistable(module: &Module) -> bool {
    module.kind == ModuleKind::JavaScript && module.is_esm()
}

/// Whether `target` may join the scope that `consumer` belongs to.
fn can_absorb(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    rules: &[Arc<dyn ConcatenationRule>],
    consumer: &Module,
    target: &ModuleIdentifier,
) -> bool {
    let Some(module) = graph.module(target) else {
        return false;
    };
    if !is_scope_hoistable(&module) {
        return false;
    }

    let runtimes = chunks.module_runtimes(target);
    let incoming: Vec<_> = graph
        .incoming_connections(target)
        .into_iter()
        .filter(|c| !c.dependency.is_weak())
        .collect();
    if incoming.is_empty() {
        return false;
    }
    for connection in &incoming {
        if connection.origin.as_ref() != Some(&consumer.identifier)
            || connection.kind() != DependencyKind::Static
            || !runtimes.iter().all(|rt| connection.is_active(rt))
        {
            return false;
        }
        if module.has_side_effects() && connection.dependency.conditional {
            return false;
        }
    }

    if chunks.module_chunks(target) != chunks.module_chunks(&consumer.identifier) {
        return false;
    }
    rules.iter().all(|rule| {
        let allowed = rule.allow(consumer, &module);
        if !allowed {
            tracing::trace!(rule = rule.name(), module = %target, "concatenation vetoed");
        }
        allowed
    })
}

/// Scope members in depth-first declared order starting at `root`.
fn declared_order(
    graph: &ModuleGraph,
    root: &ModuleIdentifier,
    scope: &FxHashSet<ModuleIdentifier>,
) -> Vec<ModuleIdentifier> {
    let mut ordered = Vec::with_capacity(scope.len());
    let mut seen: FxHashSet<ModuleIdentifier> = FxHashSet::default();
    let mut stack = vec![root.clone()];
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let next: Vec<_> = graph
            .connections(&current)
            .into_iter()
            .map(|c| c.target)
            .filter(|t| scope.contains(t) && !seen.contains(t))
            .collect();
        ordered.push(current);
        stack.extend(next.into_iter().rev());
    }
    ordered
}
