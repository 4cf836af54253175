//! Rules shipped with the bundler.

use bale_graph::{Module, ReferencedExports, RuntimeName};

use super::{ConcatenationRule, UsageRule};

/// Keeps named exports of every module whose identifier starts with a prefix.
/// A name of `*` keeps the whole namespace.
#[derive(Debug, Clone)]
pub struct KeepExportsRule {
    prefix: String,
    names: Vec<String>,
}

impl KeepExportsRule {
    pub fn new<I, S>(prefix: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl UsageRule for KeepExportsRule {
    fn referenced_exports(&self, module: &Module, _runtime: &RuntimeName) -> ReferencedExports {
        if !module.identifier.as_str().starts_with(&self.prefix) {
            return ReferencedExports::None;
        }
        if self.names.iter().any(|n| n == "*") {
            return ReferencedExports::Namespace;
        }
        ReferencedExports::Names(self.names.clone())
    }

    fn name(&self) -> &'static str {
        "KeepExportsRule"
    }

    fn description(&self) -> &str {
        &self.prefix
    }
}

/// Never concatenates modules whose identifier contains a pattern.
#[derive(Debug, Clone)]
pub struct NoConcatenateRule {
    pattern: String,
}

impl NoConcatenateRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl ConcatenationRule for NoConcatenateRule {
    fn allow(&self, _consumer: &Module, module: &Module) -> bool {
        !module.identifier.as_str().contains(&self.pattern)
    }

    fn name(&self) -> &'static str {
        "NoConcatenateRule"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_exports_matches_prefix() {
        let rule = KeepExportsRule::new("src/routes/", ["loader"]);
        let rt = RuntimeName::default();
        let route = Module::builder("src/routes/home.js".into()).build();
        let other = Module::builder("src/lib.js".into()).build();
        assert_eq!(
            rule.referenced_exports(&route, &rt),
            ReferencedExports::Names(vec!["loader".to_string()])
        );
        assert_eq!(rule.referenced_exports(&other, &rt), ReferencedExports::None);
    }

    #[test]
    fn star_keeps_namespace() {
        let rule = KeepExportsRule::new("", ["*"]);
        let module = Module::builder("a.js".into()).build();
        assert_eq!(
            rule.referenced_exports(&module, &RuntimeName::default()),
            ReferencedExports::Namespace
        );
    }

    #[test]
    fn no_concatenate_vetoes_matches() {
        let rule = NoConcatenateRule::new("legacy/");
        let consumer = Module::builder("src/a.js".into()).build();
        let legacy = Module::builder("src/legacy/b.js".into()).build();
        let modern = Module::builder("src/b.js".into()).build();
        assert!(!rule.allow(&consumer, &legacy));
        assert!(rule.allow(&consumer, &modern));
    }
}
