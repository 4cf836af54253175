//! Pluggable config validation strategies.

use std::collections::BTreeSet;

use crate::config::BundleConfig;
use crate::error::{ConfigError, Result};
use crate::split_chunks::CacheGroup;

/// Trait for pluggable config validation strategies.
pub trait ConfigValidator {
    fn validate(&self, config: &BundleConfig) -> Result<()>;
}

/// Schema-only validation: checks that values make sense together. No file
/// system access.
///
/// ```
/// use bale_config::{BundleConfig, ConfigValidator, SchemaValidator};
///
/// SchemaValidator.validate(&BundleConfig::default()).unwrap();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

const TEMPLATE_PLACEHOLDERS: [&str; 2] = ["[name]", "[id]"];

impl ConfigValidator for SchemaValidator {
    fn validate(&self, config: &BundleConfig) -> Result<()> {
        if config.parallelism == Some(0) {
            return Err(ConfigError::schema(
                "parallelism must be at least 1",
                "Remove `parallelism` to use the number of CPUs",
            ));
        }

        if !(1..=64).contains(&config.ids.hash_length) {
            return Err(ConfigError::schema(
                format!("ids.hash_length {} is out of range", config.ids.hash_length),
                "Use a value between 1 and 64",
            ));
        }
        if !(4..=64).contains(&config.output.hash_length) {
            return Err(ConfigError::schema(
                format!(
                    "output.hash_length {} is out of range",
                    config.output.hash_length
                ),
                "Use a value between 4 and 64",
            ));
        }

        for (field, template) in [
            ("output.filename", &config.output.filename),
            ("output.chunk_filename", &config.output.chunk_filename),
            ("output.runtime_filename", &config.output.runtime_filename),
        ] {
            if !TEMPLATE_PLACEHOLDERS.iter().any(|p| template.contains(p)) {
                return Err(ConfigError::schema(
                    format!("{field} `{template}` would give every chunk the same name"),
                    "Include [name] or [id] in the template",
                ));
            }
        }

        let split = &config.optimization.split_chunks;
        check_size_bounds("optimization.split_chunks", split.min_size, split.max_size)?;

        if let Some(key) = duplicate_key(&split.cache_groups) {
            return Err(ConfigError::schema(
                format!("cache group `{key}` is defined more than once"),
                "Give every cache group a unique key",
            ));
        }
        for group in &split.cache_groups {
            validate_group(group, split.min_size)?;
        }

        Ok(())
    }
}

fn validate_group(group: &CacheGroup, default_min: usize) -> Result<()> {
    if group.key.trim().is_empty() {
        return Err(ConfigError::schema(
            "cache group key cannot be empty",
            "Set `key` on every cache group",
        ));
    }
    if group.min_chunks == 0 {
        return Err(ConfigError::schema(
            format!("cache group `{}` has min_chunks = 0", group.key),
            "Use min_chunks >= 1",
        ));
    }
    if group.test.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::schema(
            format!("cache group `{}` has an empty test", group.key),
            "Remove `test` to match every module",
        ));
    }
    check_size_bounds(
        &format!("cache group `{}`", group.key),
        group.min_size.unwrap_or(default_min),
        group.max_size,
    )
}

fn check_size_bounds(what: &str, min: usize, max: Option<usize>) -> Result<()> {
    match max {
        Some(max) if min > max => Err(ConfigError::schema(
            format!("{what}: min_size {min} is larger than max_size {max}"),
            "Lower min_size or raise max_size",
        )),
        Some(0) => Err(ConfigError::schema(
            format!("{what}: max_size cannot be 0"),
            "Remove max_size for unbounded chunks",
        )),
        _ => Ok(()),
    }
}

/// First cache group key that appears twice.
fn duplicate_key(groups: &[CacheGroup]) -> Option<&str> {
    let mut seen = BTreeSet::new();
    groups
        .iter()
        .map(|g| g.key.as_str())
        .find(|key| !seen.insert(*key))
}
