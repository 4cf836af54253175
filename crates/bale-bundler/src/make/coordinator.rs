use std::collections::BTreeMap;
use std::sync::Arc;

use bale_graph::{Dependency, Module, ModuleGraph, ModuleIdentifier};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::{CancellationToken, MakeArtifact, MakeOptions, MakeStats};
use crate::cache::{CacheLookup, CachedModule, Etag, IncrementalCache};
use crate::entry::EntryOptions;
use crate::error::ModuleError;
use crate::factory::{FactoryContext, FactoryError, ModuleFactory, ResolvedModule};
use crate::{Error, Result};

/// A dependency waiting for resolution.
#[derive(Debug, Clone)]
struct PendingDependency {
    origin: Option<ModuleIdentifier>,
    entry: Option<String>,
    index: usize,
    dependency: Dependency,
}

#[derive(Debug)]
enum ModuleState {
    Building { origin: Option<ModuleIdentifier> },
    Connected,
    Failed,
}

enum TaskOutput {
    Resolved {
        pending: PendingDependency,
        result: std::result::Result<ResolvedModule, FactoryError>,
    },
    Built {
        identifier: ModuleIdentifier,
        result: std::result::Result<Module, FactoryError>,
    },
}

enum Step {
    Cancelled,
    Joined(Option<std::result::Result<TaskOutput, tokio::task::JoinError>>),
}

pub(crate) struct MakeCoordinator {
    factory: Arc<dyn ModuleFactory>,
    cache: Option<Arc<Mutex<IncrementalCache>>>,
    token: CancellationToken,
    options: MakeOptions,
    graph: ModuleGraph,
    states: FxHashMap<ModuleIdentifier, ModuleState>,
    etags: BTreeMap<ModuleIdentifier, Etag>,
    entry_targets: FxHashMap<String, (Dependency, ModuleIdentifier)>,
    deferred_weak: Vec<(PendingDependency, ModuleIdentifier)>,
    errors: Vec<ModuleError>,
    stats: MakeStats,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<TaskOutput>,
}

impl MakeCoordinator {
    pub(crate) fn new(
        factory: Arc<dyn ModuleFactory>,
        cache: Option<Arc<Mutex<IncrementalCache>>>,
        token: CancellationToken,
        options: MakeOptions,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
        Self {
            factory,
            cache,
            token,
            options,
            graph: ModuleGraph::new(),
            states: FxHashMap::default(),
            etags: BTreeMap::new(),
            entry_targets: FxHashMap::default(),
            deferred_weak: Vec::new(),
            errors: Vec::new(),
            stats: MakeStats::default(),
            semaphore,
            tasks: JoinSet::new(),
        }
    }

    #[tracing::instrument(skip_all, fields(entries = entries.len()))]
    pub(crate) async fn run(mut self, entries: &[EntryOptions]) -> Result<MakeArtifact> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        for entry in entries {
            self.spawn_resolve(PendingDependency {
                origin: None,
                entry: Some(entry.name.clone()),
                index: 0,
                dependency: Dependency::entry(&entry.request),
            });
        }

        let token = self.token.clone();
        loop {
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Cancelled,
                next = self.tasks.join_next() => Step::Joined(next),
            };
            match step {
                Step::Cancelled => {
                    self.tasks.abort_all();
                    tracing::debug!(reason = ?token.reason(), "make phase cancelled");
                    return Err(Error::Cancelled);
                }
                Step::Joined(None) => break,
                Step::Joined(Some(Ok(output))) => self.handle(output)?,
                Step::Joined(Some(Err(join_error))) => {
                    // The owning module is still `Building`; `finish` fails it.
                    tracing::error!("make task panicked: {join_error}");
                }
            }
        }

        self.finish(entries)
    }

    fn handle(&mut self, output: TaskOutput) -> Result<()> {
        match output {
            TaskOutput::Resolved { pending, result } => match result {
                Ok(resolved) => self.on_resolved(pending, resolved),
                Err(err) => {
                    tracing::debug!(request = %pending.dependency.request, "resolution failed");
                    self.errors.push(ModuleError::Resolution {
                        origin: pending.origin,
                        request: pending.dependency.request,
                        span: pending.dependency.span,
                        message: err.message,
                    });
                    Ok(())
                }
            },
            TaskOutput::Built { identifier, result } => match result {
                Ok(module) if module.identifier == identifier => {
                    self.stats.built += 1;
                    self.connect_module(module)
                }
                Ok(module) => self.on_build_failed(
                    identifier,
                    format!("factory returned {} instead", module.identifier),
                ),
                Err(err) => self.on_build_failed(identifier, err.message),
            },
        }
    }

    fn on_resolved(&mut self, pending: PendingDependency, resolved: ResolvedModule) -> Result<()> {
        self.stats.resolved += 1;
        let target = resolved.identifier.clone();

        if pending.dependency.is_weak() {
            self.deferred_weak.push((pending, target));
            return Ok(());
        }
        self.connect(&pending, target.clone())?;
        if self.states.contains_key(&target) {
            return Ok(());
        }

        let etag = Etag::for_module(&resolved.content_hash, &self.options.build_options);
        self.etags.insert(target.clone(), etag.clone());

        if let Some(cached) = self.lookup_cache(&etag, &target) {
            tracing::trace!(module = %target, "restored from cache");
            self.stats.cache_hits += 1;
            let CachedModule {
                module,
                exports_info,
            } = cached;
            self.connect_module(module)?;
            self.graph.set_exports_info(&target, exports_info)?;
            return Ok(());
        }

        self.states.insert(
            target,
            ModuleState::Building {
                origin: pending.origin.clone(),
            },
        );
        self.spawn_build(pending.origin, resolved);
        Ok(())
    }

    fn lookup_cache(&self, etag: &Etag, target: &ModuleIdentifier) -> Option<CachedModule> {
        let cache = self.cache.as_ref()?;
        match cache.lock().get_module(etag) {
            CacheLookup::Hit(cached) if cached.module.identifier == *target => Some(cached),
            _ => None,
        }
    }

    /// Add a built or restored module and queue its dependencies.
    fn connect_module(&mut self, module: Module) -> Result<()> {
        let identifier = module.identifier.clone();
        let dependencies = Arc::clone(&module.dependencies);
        self.graph.add_module(module)?;
        self.states
            .insert(identifier.clone(), ModuleState::Connected);

        for (index, dependency) in dependencies.iter().enumerate() {
            self.spawn_resolve(PendingDependency {
                origin: Some(identifier.clone()),
                entry: None,
                index,
                dependency: dependency.clone(),
            });
        }
        Ok(())
    }

    fn on_build_failed(&mut self, identifier: ModuleIdentifier, message: String) -> Result<()> {
        tracing::debug!(module = %identifier, "build failed: {message}");
        let origin = match self.states.insert(identifier.clone(), ModuleState::Failed) {
            Some(ModuleState::Building { origin }) => origin,
            _ => None,
        };
        self.graph.mark_failed(identifier.clone())?;
        self.errors.push(ModuleError::Build {
            module: identifier,
            origin,
            message,
        });
        Ok(())
    }

    fn connect(&mut self, pending: &PendingDependency, target: ModuleIdentifier) -> Result<()> {
        match (&pending.origin, &pending.entry) {
            (Some(origin), _) => {
                self.graph.add_connection(
                    origin.clone(),
                    pending.index,
                    pending.dependency.clone(),
                    target,
                )?;
            }
            (None, Some(name)) => {
                self.entry_targets
                    .insert(name.clone(), (pending.dependency.clone(), target));
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn spawn_resolve(&mut self, pending: PendingDependency) {
        let factory = Arc::clone(&self.factory);
        let semaphore = Arc::clone(&self.semaphore);
        self.tasks.spawn(async move {
            let _permit = semaphore.acquire().await.ok();
            let context = FactoryContext {
                origin: pending.origin.clone(),
            };
            let result = factory.resolve(&context, &pending.dependency).await;
            TaskOutput::Resolved { pending, result }
        });
    }

    fn spawn_build(&mut self, origin: Option<ModuleIdentifier>, resolved: ResolvedModule) {
        let factory = Arc::clone(&self.factory);
        let semaphore = Arc::clone(&self.semaphore);
        let span = tracing::debug_span!("build_module", module = %resolved.identifier);
        self.tasks.spawn(
            async move {
                let _permit = semaphore.acquire().await.ok();
                let context = FactoryContext { origin };
                let result = factory.build(&context, &resolved).await;
                TaskOutput::Built {
                    identifier: resolved.identifier,
                    result,
                }
            }
            .instrument(span),
        );
    }

    fn finish(mut self, entries: &[EntryOptions]) -> Result<MakeArtifact> {
        // Entry connections go in in declaration order, not completion order.
        for entry in entries {
            if let Some((dependency, target)) = self.entry_targets.remove(&entry.name) {
                self.graph
                    .add_entry_connection(entry.name.clone(), dependency, target)?;
            }
        }

        let deferred = std::mem::take(&mut self.deferred_weak);
        for (pending, target) in deferred {
            if self.graph.contains_module(&target) {
                self.connect(&pending, target)?;
            }
        }

        let orphaned: Vec<_> = self
            .states
            .iter()
            .filter(|(_, state)| matches!(state, ModuleState::Building { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        for identifier in orphaned {
            self.on_build_failed(identifier, "build task panicked".to_string())?;
        }

        self.errors.sort_by_cached_key(ToString::to_string);
        self.stats.failed = self.graph.failed_modules().len();
        self.stats.modules = self.graph.module_count();
        self.etags.retain(|id, _| self.graph.contains_module(id));

        tracing::debug!(
            modules = self.stats.modules,
            built = self.stats.built,
            cache_hits = self.stats.cache_hits,
            errors = self.errors.len(),
            "make phase finished"
        );
        Ok(MakeArtifact {
            module_graph: self.graph,
            errors: self.errors,
            module_etags: self.etags,
            stats: self.stats,
        })
    }
}
