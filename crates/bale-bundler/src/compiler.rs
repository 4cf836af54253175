//! Long-lived driver across compilations.
//!
//! The compiler owns the incremental cache and the module etags of the last
//! successful run. Starting a compilation cancels the one before it, so in
//! watch mode only the newest generation finishes.

use std::sync::Arc;

use bale_config::BundleConfig;
use bale_graph::ModuleIdentifier;
use parking_lot::Mutex;

use crate::cache::{CacheStore, ChangeDetector, IncrementalCache, Invalidation};
use crate::codegen::CodeGenerator;
use crate::compilation::{Compilation, CompilationOptions, SealOutput};
use crate::entry::EntryOptions;
use crate::factory::ModuleFactory;
use crate::make::CancellationToken;
use crate::plugins::PluginRegistry;
use crate::Result;

pub struct Compiler {
    options: CompilationOptions,
    store: Option<CacheStore>,
    current: Mutex<Option<CancellationToken>>,
    previous: Mutex<ChangeDetector>,
}

impl Compiler {
    /// Validate `config` and restore the persistent cache when
    /// `cache.directory` is set.
    pub fn new(config: BundleConfig, factory: Arc<dyn ModuleFactory>) -> Result<Self> {
        config.validate()?;

        let (cache, store) = if !config.cache.enabled {
            (None, None)
        } else if let Some(dir) = &config.cache.directory {
            let store = CacheStore::open(dir)?;
            let cache = IncrementalCache::restore(&store)?;
            tracing::debug!(
                modules = cache.module_entry_count(),
                chunks = cache.chunk_entry_count(),
                "restored incremental cache"
            );
            (Some(cache), Some(store))
        } else {
            (Some(IncrementalCache::new()), None)
        };

        let options = CompilationOptions::new(config, factory)
            .with_cache(cache.map(|c| Arc::new(Mutex::new(c))));
        Ok(Self {
            options,
            store,
            current: Mutex::new(None),
            previous: Mutex::new(ChangeDetector::default()),
        })
    }

    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.options = self.options.with_generator(generator);
        self
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.options = self.options.with_plugins(plugins);
        self
    }

    pub fn config(&self) -> &BundleConfig {
        &self.options.config
    }

    pub fn cache(&self) -> Option<&Arc<Mutex<IncrementalCache>>> {
        self.options.cache.as_ref()
    }

    /// Start a new generation, cancelling the previous one if it is still
    /// running.
    pub fn create_compilation(&self) -> Compilation {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            if previous.cancel(Some("superseded by a newer compilation".to_string())) {
                tracing::debug!("cancelled running compilation");
            }
        }
        Compilation::with_parts(self.options.clone(), token, self.previous.lock().clone())
    }

    /// Build `entries` in a fresh compilation and persist the cache.
    pub async fn run(&self, entries: &[EntryOptions]) -> Result<SealOutput> {
        let mut compilation = self.create_compilation();
        let output = compilation.build(entries).await?;
        *self.previous.lock() = compilation.change_detector();
        self.persist()?;
        Ok(output)
    }

    /// Drop cache entries built from `modules`, e.g. after a watcher saw
    /// them change.
    pub fn invalidate(&self, modules: &[ModuleIdentifier]) -> Invalidation {
        let Some(cache) = self.cache() else {
            return Invalidation::default();
        };
        let mut cache = cache.lock();
        modules.iter().fold(Invalidation::default(), |acc, id| {
            let dropped = cache.invalidate_module(id);
            Invalidation {
                modules: acc.modules + dropped.modules,
                chunks: acc.chunks + dropped.chunks,
            }
        })
    }

    /// Write the cache to the persistent store, if there is one.
    pub fn persist(&self) -> Result<()> {
        if let (Some(store), Some(cache)) = (&self.store, self.cache()) {
            cache.lock().persist(store)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("options", &self.options)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
