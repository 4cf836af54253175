//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use bale_bundler::{Compilation, CompilationOptions, EntryOptions, MemoryModuleFactory, SealOutput};
use bale_config::BundleConfig;
use bale_graph::{Dependency, Module};

/// ESM module under `src/` exporting `exports`.
pub fn esm(path: &str, source: &str, deps: Vec<Dependency>, exports: &[&str]) -> Module {
    Module::builder(format!("src/{path}").as_str().into())
        .source(source)
        .dependencies(deps)
        .exports(exports.iter().copied())
        .build()
}

pub fn factory(modules: Vec<Module>) -> Arc<MemoryModuleFactory> {
    Arc::new(MemoryModuleFactory::with_modules(modules))
}

pub fn entry(name: &str, path: &str) -> EntryOptions {
    EntryOptions::new(name, format!("src/{path}"))
}

/// Make and seal in a fresh compilation with its own cache.
pub async fn build(
    config: BundleConfig,
    factory: Arc<MemoryModuleFactory>,
    entries: &[EntryOptions],
) -> SealOutput {
    let mut compilation = Compilation::new(CompilationOptions::new(config, factory));
    compilation.build(entries).await.expect("build")
}

/// File name and content of every asset.
pub fn files(output: &SealOutput) -> Vec<(String, String)> {
    output
        .assets
        .iter()
        .map(|a| (a.filename.clone(), a.content.clone()))
        .collect()
}

/// Chunk ids containing `module`.
pub fn chunks_of(output: &SealOutput, module: &str) -> Vec<String> {
    output
        .chunks
        .iter()
        .filter(|c| c.modules.iter().any(|m| m.as_str() == module))
        .map(|c| c.id.clone())
        .collect()
}
