//! Layered configuration loading.
//!
//! Priority, lowest first: built-in defaults, `bale.json`, `bale.toml`,
//! `BALE_*` environment variables. Nested keys use a double underscore in
//! variable names: `BALE_OPTIMIZATION__TREE_SHAKING=false`.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format as _, Json, Serialized, Toml};

use crate::config::BundleConfig;
use crate::error::{ConfigError, Result};

pub const TOML_FILE: &str = "bale.toml";
pub const JSON_FILE: &str = "bale.json";
pub const ENV_PREFIX: &str = "BALE_";

/// Builds the figment for a project root.
///
/// # Example
///
/// ```no_run
/// use bale_config::ConfigLoader;
///
/// let config = ConfigLoader::new(".").load().unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    root: PathBuf,
    explicit: Option<PathBuf>,
    env: bool,
}

impl ConfigLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            explicit: None,
            env: true,
        }
    }

    /// Use this file instead of discovering one. It must exist.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip the environment layer.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Config files that will be read, in merge order.
    pub fn discover(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.explicit {
            return vec![path.clone()];
        }
        [JSON_FILE, TOML_FILE]
            .iter()
            .map(|name| self.root.join(name))
            .filter(|path| path.exists())
            .collect()
    }

    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(BundleConfig::default()));

        if let Some(path) = self.explicit.as_ref().filter(|p| !p.exists()) {
            return Err(ConfigError::NotFound(path.clone()));
        }

        for path in self.discover() {
            tracing::debug!(path = %path.display(), "loading bale config file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment)
    }

    pub fn load(&self) -> Result<BundleConfig> {
        Ok(self.figment()?.extract()?)
    }
}

impl BundleConfig {
    /// Load from `root` with discovery and environment overrides.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new(root).load()
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(source))
            .extract()?)
    }
}
