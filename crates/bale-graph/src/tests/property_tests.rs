//! Property-based tests for bale-graph using proptest.
//!
//! Run with: cargo test --features proptest --package bale-graph property_tests

#![cfg(feature = "proptest")]

use crate::{Dependency, Module, ModuleGraph, ModuleIdentifier, RuntimeName};
use proptest::prelude::*;

/// Random graph: `n` modules and a list of `(from, to)` edges over them.
fn graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..=12).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..=30);
        (Just(n), edges)
    })
}

fn build(n: usize, edges: &[(usize, usize)]) -> ModuleGraph {
    let graph = ModuleGraph::new();
    let name = |i: usize| ModuleIdentifier::new(format!("m{i}.js"));

    let mut deps: Vec<Vec<(usize, Dependency)>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        let dep = Dependency::static_import(format!("./m{to}"), ["x"]);
        deps[from].push((to, dep));
    }
    for (i, list) in deps.iter().enumerate() {
        let module = Module::builder(name(i))
            .dependencies(list.iter().map(|(_, d)| d.clone()).collect())
            .exports(["x"])
            .build();
        graph.add_module(module).unwrap();
    }
    for (i, list) in deps.into_iter().enumerate() {
        for (index, (to, dep)) in list.into_iter().enumerate() {
            graph.add_connection(name(i), index, dep, name(to)).unwrap();
        }
    }
    graph
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// A depends on B directly iff B lists A as a dependent.
    #[test]
    fn prop_dependency_dependent_symmetry((n, edges) in graph_strategy()) {
        let graph = build(n, &edges);
        for a in graph.module_identifiers() {
            for b in graph.dependencies(&a) {
                prop_assert!(graph.dependents(&b).contains(&a));
            }
        }
    }

    /// Reachability terminates on arbitrary cyclic graphs and never repeats.
    #[test]
    fn prop_reachability_visits_each_module_once((n, edges) in graph_strategy()) {
        let graph = build(n, &edges);
        let start = [ModuleIdentifier::new("m0.js")];
        let order = graph.reachable_from(&start, Some(&RuntimeName::default()));
        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), order.len());
        prop_assert!(order.len() <= n);
    }

    /// Binary snapshots preserve every adjacency list.
    #[test]
    fn prop_snapshot_preserves_adjacency((n, edges) in graph_strategy()) {
        let graph = build(n, &edges);
        let restored = ModuleGraph::from_bytes(&graph.to_bytes().unwrap()).unwrap();
        for id in graph.module_identifiers() {
            prop_assert_eq!(graph.connections(&id), restored.connections(&id));
            prop_assert_eq!(graph.incoming_connections(&id), restored.incoming_connections(&id));
        }
    }
}
