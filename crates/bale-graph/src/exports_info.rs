//! Per-module export usage, filled in by usage propagation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::module::Module;
use crate::runtime::RuntimeName;

/// How an export is used. Ordered: a state may only move to a greater one
/// while propagation runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum UsageState {
    #[default]
    Unused,
    Used,
    /// Usage cannot be determined; the export must be kept.
    Unknown,
}

impl UsageState {
    pub fn is_used(self) -> bool {
        self != Self::Unused
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportInfo {
    /// The module declares this export. Names read through star re-exports
    /// are tracked too but are not provided.
    pub provided: bool,
    used: BTreeMap<RuntimeName, UsageState>,
}

impl ExportInfo {
    pub fn usage(&self, runtime: &RuntimeName) -> UsageState {
        self.used.get(runtime).copied().unwrap_or_default()
    }
}

/// Usage snapshot for one runtime. Two runtimes with equal fingerprints can
/// share generated code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageFingerprint {
    pub used: Vec<String>,
    pub other: UsageState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportsInfo {
    exports: BTreeMap<String, ExportInfo>,
    /// Usage of exports not listed in `exports`.
    other_exports: BTreeMap<RuntimeName, UsageState>,
}

impl ExportsInfo {
    /// Fresh record with every provided export unused.
    pub fn from_module(module: &Module) -> Self {
        let exports = module
            .provided_exports()
            .map(|name| {
                (
                    name.to_string(),
                    ExportInfo {
                        provided: true,
                        used: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self {
            exports,
            other_exports: BTreeMap::new(),
        }
    }

    pub fn provided_exports(&self) -> impl Iterator<Item = &str> {
        self.exports
            .iter()
            .filter(|(_, info)| info.provided)
            .map(|(name, _)| name.as_str())
    }

    pub fn is_provided(&self, name: &str) -> bool {
        self.exports.get(name).is_some_and(|info| info.provided)
    }

    pub fn export(&self, name: &str) -> Option<&ExportInfo> {
        self.exports.get(name)
    }

    /// Effective usage of `name`, taking "other exports" usage into account.
    pub fn usage(&self, name: &str, runtime: &RuntimeName) -> UsageState {
        let own = self
            .exports
            .get(name)
            .map(|info| info.usage(runtime))
            .unwrap_or_default();
        own.max(self.other_usage(runtime))
    }

    pub fn other_usage(&self, runtime: &RuntimeName) -> UsageState {
        self.other_exports.get(runtime).copied().unwrap_or_default()
    }

    /// Raise the usage of `name` to at least `state`. Returns whether anything
    /// changed. Usage never decreases here.
    pub fn set_used(&mut self, name: &str, runtime: &RuntimeName, state: UsageState) -> bool {
        let info = self.exports.entry(name.to_string()).or_default();
        raise(info.used.entry(runtime.clone()).or_default(), state)
    }

    /// Mark every export, known or not, as used (namespace access).
    pub fn set_all_used(&mut self, runtime: &RuntimeName) -> bool {
        let mut changed = false;
        for info in self.exports.values_mut() {
            changed |= raise(info.used.entry(runtime.clone()).or_default(), UsageState::Used);
        }
        changed |= self.set_other_used(runtime, UsageState::Used);
        changed
    }

    /// Raise usage of exports not listed by name.
    pub fn set_other_used(&mut self, runtime: &RuntimeName, state: UsageState) -> bool {
        raise(self.other_exports.entry(runtime.clone()).or_default(), state)
    }

    /// Provided exports whose effective usage is not `Unused`, sorted.
    pub fn used_exports(&self, runtime: &RuntimeName) -> Vec<String> {
        self.provided_exports()
            .filter(|name| self.usage(name, runtime).is_used())
            .map(str::to_string)
            .collect()
    }

    /// Provided exports nobody reads in `runtime`, sorted.
    pub fn unused_exports(&self, runtime: &RuntimeName) -> Vec<String> {
        self.provided_exports()
            .filter(|name| !self.usage(name, runtime).is_used())
            .map(str::to_string)
            .collect()
    }

    /// Provided exports unused in every one of `runtimes`.
    pub fn unused_in_all(&self, runtimes: &[RuntimeName]) -> Vec<String> {
        self.provided_exports()
            .filter(|name| runtimes.iter().all(|rt| !self.usage(name, rt).is_used()))
            .map(str::to_string)
            .collect()
    }

    pub fn usage_fingerprint(&self, runtime: &RuntimeName) -> UsageFingerprint {
        UsageFingerprint {
            used: self.used_exports(runtime),
            other: self.other_usage(runtime),
        }
    }

    /// Drop all usage information, keeping the provided set.
    pub fn reset_usage(&mut self) {
        self.exports.retain(|_, info| info.provided);
        for info in self.exports.values_mut() {
            info.used.clear();
        }
        self.other_exports.clear();
    }
}

fn raise(slot: &mut UsageState, state: UsageState) -> bool {
    if state > *slot {
        *slot = state;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ExportsInfo {
        let module = Module::builder("m.js".into()).exports(["a", "b"]).build();
        ExportsInfo::from_module(&module)
    }

    #[test]
    fn usage_only_grows() {
        let rt = RuntimeName::default();
        let mut info = info();
        assert!(info.set_used("a", &rt, UsageState::Unknown));
        assert!(!info.set_used("a", &rt, UsageState::Used));
        assert_eq!(info.usage("a", &rt), UsageState::Unknown);
    }

    #[test]
    fn unused_exports_are_sorted_and_per_runtime() {
        let main = RuntimeName::default();
        let worker = RuntimeName::new("worker");
        let mut info = info();
        info.set_used("a", &main, UsageState::Used);
        assert_eq!(info.unused_exports(&main), vec!["b".to_string()]);
        assert_eq!(info.unused_exports(&worker), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(info.unused_in_all(&[main, worker]), vec!["b".to_string()]);
    }

    #[test]
    fn namespace_access_covers_unknown_names() {
        let rt = RuntimeName::default();
        let mut info = info();
        assert!(info.set_all_used(&rt));
        assert!(!info.set_all_used(&rt));
        assert_eq!(info.usage("never_declared", &rt), UsageState::Used);
        assert!(info.unused_exports(&rt).is_empty());
    }

    #[test]
    fn reset_drops_unprovided_names() {
        let rt = RuntimeName::default();
        let mut info = info();
        info.set_used("via_star", &rt, UsageState::Used);
        info.reset_usage();
        assert!(info.export("via_star").is_none());
        assert_eq!(info.used_exports(&rt), Vec::<String>::new());
    }
}
