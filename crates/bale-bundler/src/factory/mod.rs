//! Module factories turn dependency requests into built modules.
//!
//! The make phase calls [`ModuleFactory::resolve`] for every dependency, checks
//! the incremental cache with the resolved content hash, and only calls
//! [`ModuleFactory::build`] on a miss.

mod memory;

pub use memory::MemoryModuleFactory;

use async_trait::async_trait;
use bale_graph::{ContentHash, Dependency, Module, ModuleIdentifier};

/// Where a request comes from.
#[derive(Debug, Clone, Default)]
pub struct FactoryContext {
    /// Importing module; `None` for entry requests.
    pub origin: Option<ModuleIdentifier>,
}

impl FactoryContext {
    pub fn entry() -> Self {
        Self { origin: None }
    }

    pub fn from_origin(origin: ModuleIdentifier) -> Self {
        Self {
            origin: Some(origin),
        }
    }
}

/// Result of resolving a request, before the module is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub identifier: ModuleIdentifier,
    /// blake3 of the current source. Feeds the module's cache etag.
    pub content_hash: ContentHash,
}

/// Resolution or build failure reported by a factory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FactoryError {
    pub message: String,
}

impl FactoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resolves requests and builds modules. Implementations must be safe to call
/// from many tasks at once.
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    async fn resolve(
        &self,
        context: &FactoryContext,
        dependency: &Dependency,
    ) -> Result<ResolvedModule, FactoryError>;

    /// Build a resolved module. The returned module's identifier must equal
    /// `resolved.identifier`.
    async fn build(
        &self,
        context: &FactoryContext,
        resolved: &ResolvedModule,
    ) -> Result<Module, FactoryError>;

    async fn resolve_and_build(
        &self,
        context: &FactoryContext,
        dependency: &Dependency,
    ) -> Result<Module, FactoryError> {
        let resolved = self.resolve(context, dependency).await?;
        self.build(context, &resolved).await
    }

    /// Mixed into module etags. Change it whenever the same source would
    /// build differently.
    fn options_fingerprint(&self) -> String {
        String::new()
    }
}
