//! Seal hooks.
//!
//! Extension points are typed rule objects registered per pass and invoked
//! in registration order:
//!
//! - [`UsageRule`] seeds export usage that no import expresses, such as
//!   exports a host framework calls by convention.
//! - [`ConcatenationRule`] may veto merging one module into another.

mod builtin;
mod registry;

pub use builtin::{KeepExportsRule, NoConcatenateRule};
pub use registry::PluginRegistry;

use bale_graph::{Module, ReferencedExports, RuntimeName};

/// Marks exports used that no connection references.
///
/// # Example
///
/// ```
/// use bale_bundler::plugins::UsageRule;
/// use bale_graph::{Module, ReferencedExports, RuntimeName};
///
/// struct LoaderExports;
///
/// impl UsageRule for LoaderExports {
///     fn referenced_exports(&self, module: &Module, _runtime: &RuntimeName) -> ReferencedExports {
///         if module.identifier.as_str().starts_with("src/routes/") {
///             ReferencedExports::Names(vec!["loader".to_string()])
///         } else {
///             ReferencedExports::None
///         }
///     }
///
///     fn name(&self) -> &'static str {
///         "LoaderExports"
///     }
/// }
/// ```
pub trait UsageRule: Send + Sync {
    /// Exports of `module` to treat as used in `runtime`.
    fn referenced_exports(&self, module: &Module, runtime: &RuntimeName) -> ReferencedExports;

    /// Human-readable name for the rule (used in logs).
    fn name(&self) -> &'static str;

    /// What the rule matches.
    fn description(&self) -> &str {
        ""
    }
}

/// Vetoes module concatenation.
pub trait ConcatenationRule: Send + Sync {
    /// Whether `module` may be merged into the scope of `consumer`.
    fn allow(&self, consumer: &Module, module: &Module) -> bool;

    fn name(&self) -> &'static str;
}
