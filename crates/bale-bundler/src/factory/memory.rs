use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bale_graph::{Dependency, Module, ModuleIdentifier};
use parking_lot::{Mutex, RwLock};

use super::{FactoryContext, FactoryError, ModuleFactory, ResolvedModule};

const EXTENSIONS: [&str; 2] = ["", ".js"];
const INDEX_FILE: &str = "index.js";
const PACKAGE_DIR: &str = "node_modules";

/// Factory backed by a map of prebuilt modules.
///
/// Resolution follows file-system conventions on identifiers without touching
/// the disk: relative requests are joined to the importer's directory, bare
/// requests are looked up as-is and then under `node_modules/`, and each
/// candidate is tried with a `.js` extension and as a directory `index.js`.
///
/// Every successful build is counted, which lets callers observe cache hits.
#[derive(Debug, Default)]
pub struct MemoryModuleFactory {
    modules: RwLock<BTreeMap<ModuleIdentifier, Module>>,
    failures: RwLock<BTreeMap<ModuleIdentifier, String>>,
    latency: Option<Duration>,
    fingerprint: String,
    builds: AtomicUsize,
    built: Mutex<Vec<ModuleIdentifier>>,
}

impl MemoryModuleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules(modules: impl IntoIterator<Item = Module>) -> Self {
        let factory = Self::new();
        for module in modules {
            factory.insert(module);
        }
        factory
    }

    /// Sleep this long in every build, yielding to the scheduler.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Add or replace a module. Replacing a module models an edit on disk.
    pub fn insert(&self, module: Module) {
        self.failures.write().remove(&module.identifier);
        self.modules
            .write()
            .insert(module.identifier.clone(), module);
    }

    pub fn remove(&self, identifier: &ModuleIdentifier) -> Option<Module> {
        self.modules.write().remove(identifier)
    }

    /// Make `identifier` resolvable but fail every build of it.
    pub fn fail_build(&self, identifier: impl Into<ModuleIdentifier>, message: impl Into<String>) {
        self.failures
            .write()
            .insert(identifier.into(), message.into());
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Identifiers built so far, in completion order.
    pub fn built_modules(&self) -> Vec<ModuleIdentifier> {
        self.built.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.builds.store(0, Ordering::SeqCst);
        self.built.lock().clear();
    }

    fn exists(&self, identifier: &ModuleIdentifier) -> bool {
        self.modules.read().contains_key(identifier) || self.failures.read().contains_key(identifier)
    }

    fn lookup(&self, origin: Option<&ModuleIdentifier>, request: &str) -> Option<ModuleIdentifier> {
        let relative = request.starts_with("./") || request.starts_with("../");
        let bases: Vec<PathBuf> = if relative {
            let dir = origin
                .and_then(|o| Path::new(o.short_name()).parent())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            vec![dir.join(request)]
        } else {
            vec![PathBuf::from(request), Path::new(PACKAGE_DIR).join(request)]
        };

        bases.iter().find_map(|base| {
            let direct = EXTENSIONS.iter().map(|ext| {
                let mut path = base.clone().into_os_string();
                path.push(ext);
                PathBuf::from(path)
            });
            direct
                .chain(std::iter::once(base.join(INDEX_FILE)))
                .filter_map(|path| ModuleIdentifier::from_path(path).ok())
                .find(|candidate| self.exists(candidate))
        })
    }
}

#[async_trait]
impl ModuleFactory for MemoryModuleFactory {
    async fn resolve(
        &self,
        context: &FactoryContext,
        dependency: &Dependency,
    ) -> Result<ResolvedModule, FactoryError> {
        let identifier = self
            .lookup(context.origin.as_ref(), &dependency.request)
            .ok_or_else(|| FactoryError::new(format!("module `{}` not found", dependency.request)))?;
        let content_hash = self
            .modules
            .read()
            .get(&identifier)
            .map(|m| m.build_info.content_hash)
            .unwrap_or_else(|| *blake3::hash(identifier.as_str().as_bytes()).as_bytes());
        Ok(ResolvedModule {
            identifier,
            content_hash,
        })
    }

    async fn build(
        &self,
        _context: &FactoryContext,
        resolved: &ResolvedModule,
    ) -> Result<Module, FactoryError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.failures.read().get(&resolved.identifier) {
            return Err(FactoryError::new(message.clone()));
        }
        let module = self
            .modules
            .read()
            .get(&resolved.identifier)
            .cloned()
            .ok_or_else(|| {
                FactoryError::new(format!("{} disappeared after resolving", resolved.identifier))
            })?;

        self.builds.fetch_add(1, Ordering::SeqCst);
        self.built.lock().push(resolved.identifier.clone());
        Ok(module)
    }

    fn options_fingerprint(&self) -> String {
        self.fingerprint.clone()
    }
}
