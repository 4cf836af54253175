//! Change detection between two builds.
//!
//! Compares module etags from the previous build with the current ones and
//! expands the direct changes to every module that imports them, directly or
//! transitively.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use bale_graph::{ModuleGraph, ModuleIdentifier};

use super::etag::Etag;

/// Module etags recorded at the end of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDetector {
    pub module_etags: BTreeMap<ModuleIdentifier, Etag>,
}

/// Set of changed modules and their transitive dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Etag differs from the previous build.
    pub modified: BTreeSet<ModuleIdentifier>,
    /// Not present in the previous build.
    pub added: BTreeSet<ModuleIdentifier>,
    /// Present in the previous build only.
    pub removed: BTreeSet<ModuleIdentifier>,
    /// `modified` and `added` plus every module that imports any changed or
    /// removed module, directly or transitively.
    pub affected: BTreeSet<ModuleIdentifier>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.modified.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn affected_count(&self) -> usize {
        self.affected.len()
    }
}

impl ChangeDetector {
    pub fn new(module_etags: BTreeMap<ModuleIdentifier, Etag>) -> Self {
        Self { module_etags }
    }

    /// Diff `current` against the recorded etags. `graph` is the current
    /// module graph and supplies the dependents.
    pub fn detect(
        &self,
        current: &BTreeMap<ModuleIdentifier, Etag>,
        graph: &ModuleGraph,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (id, etag) in current {
            match self.module_etags.get(id) {
                None => {
                    changes.added.insert(id.clone());
                }
                Some(previous) if previous != etag => {
                    changes.modified.insert(id.clone());
                }
                Some(_) => {}
            }
        }
        changes.removed = self
            .module_etags
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();

        let mut queue: VecDeque<_> = changes
            .modified
            .iter()
            .chain(&changes.added)
            .chain(&changes.removed)
            .cloned()
            .collect();
        changes.affected = changes.modified.union(&changes.added).cloned().collect();
        while let Some(id) = queue.pop_front() {
            for dependent in graph.dependents(&id) {
                if changes.affected.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_graph::{Dependency, Module};

    fn etag(value: &str) -> Etag {
        Etag::builder().str(value).finish()
    }

    fn chain_graph() -> ModuleGraph {
        // a -> b -> c
        let graph = ModuleGraph::new();
        for id in ["a.js", "b.js", "c.js"] {
            graph.add_module(Module::builder(id.into()).build()).unwrap();
        }
        graph
            .add_connection("a.js".into(), 0, Dependency::namespace_import("./b"), "b.js".into())
            .unwrap();
        graph
            .add_connection("b.js".into(), 0, Dependency::namespace_import("./c"), "c.js".into())
            .unwrap();
        graph
    }

    #[test]
    fn modified_leaf_affects_its_importers() {
        let previous = BTreeMap::from([
            ("a.js".into(), etag("a")),
            ("b.js".into(), etag("b")),
            ("c.js".into(), etag("c")),
        ]);
        let mut current = previous.clone();
        current.insert("c.js".into(), etag("c2"));

        let changes = ChangeDetector::new(previous).detect(&current, &chain_graph());
        assert!(changes.has_changes());
        assert_eq!(changes.modified, BTreeSet::from(["c.js".into()]));
        assert_eq!(changes.affected_count(), 3);
    }

    #[test]
    fn identical_builds_have_no_changes() {
        let etags = BTreeMap::from([("a.js".into(), etag("a"))]);
        let changes = ChangeDetector::new(etags.clone()).detect(&etags, &chain_graph());
        assert!(!changes.has_changes());
        assert!(changes.affected.is_empty());
    }

    #[test]
    fn removed_modules_affect_their_former_importers() {
        let previous = BTreeMap::from([("b.js".into(), etag("b")), ("gone.js".into(), etag("g"))]);
        let current = BTreeMap::from([("b.js".into(), etag("b"))]);
        let changes = ChangeDetector::new(previous).detect(&current, &chain_graph());
        assert_eq!(changes.removed, BTreeSet::from(["gone.js".into()]));
        assert!(changes.affected.is_empty());
    }
}
