//! Ordered rule lists per seal pass.

use std::fmt;
use std::sync::Arc;

use super::{ConcatenationRule, UsageRule};

/// Rules for the seal passes, kept in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    usage_rules: Vec<Arc<dyn UsageRule>>,
    concatenation_rules: Vec<Arc<dyn ConcatenationRule>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_usage_rule<R: UsageRule + 'static>(&mut self, rule: R) -> &mut Self {
        self.usage_rules.push(Arc::new(rule));
        self
    }

    pub fn add_concatenation_rule<R: ConcatenationRule + 'static>(&mut self, rule: R) -> &mut Self {
        self.concatenation_rules.push(Arc::new(rule));
        self
    }

    pub fn usage_rules(&self) -> &[Arc<dyn UsageRule>] {
        &self.usage_rules
    }

    pub fn concatenation_rules(&self) -> &[Arc<dyn ConcatenationRule>] {
        &self.concatenation_rules
    }

    pub fn len(&self) -> usize {
        self.usage_rules.len() + self.concatenation_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field(
                "usage_rules",
                &self.usage_rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field(
                "concatenation_rules",
                &self
                    .concatenation_rules
                    .iter()
                    .map(|r| r.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{KeepExportsRule, NoConcatenateRule};

    #[test]
    fn rules_keep_registration_order() {
        let mut registry = PluginRegistry::new();
        registry
            .add_usage_rule(KeepExportsRule::new("src/a", ["x"]))
            .add_usage_rule(KeepExportsRule::new("src/b", ["y"]))
            .add_concatenation_rule(NoConcatenateRule::new("vendor/"));

        assert_eq!(registry.len(), 3);
        let prefixes: Vec<_> = registry
            .usage_rules()
            .iter()
            .map(|r| r.description())
            .collect();
        assert_eq!(prefixes, vec!["src/a", "src/b"]);
        assert!(format!("{registry:?}").contains("NoConcatenateRule"));
    }
}
