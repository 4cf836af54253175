//! Incremental rebuilds through the `Compiler`.

mod common;

use std::sync::Arc;

use bale_bundler::{CacheStore, Compiler, DiagnosticKind, EntryOptions, MemoryModuleFactory};
use bale_config::BundleConfig;
use bale_graph::{Dependency, ModuleIdentifier};
use common::{entry, esm, factory, files};
use tempfile::TempDir;

fn project() -> Arc<MemoryModuleFactory> {
    factory(vec![
        esm("a.js", "use(x);", vec![Dependency::static_import("./x", ["x"])], &[]),
        esm("b.js", "use(y);", vec![Dependency::static_import("./y", ["y"])], &[]),
        esm("x.js", "export const x = 1;", vec![], &["x", "unused"]),
        esm("y.js", "export const y = 1;", vec![], &["y"]),
    ])
}

fn entries() -> Vec<EntryOptions> {
    vec![entry("a", "a.js"), entry("b", "b.js")]
}

fn persistent(dir: &TempDir) -> BundleConfig {
    let mut config = BundleConfig::default();
    config.cache.directory = Some(dir.path().join("cache"));
    config
}

fn hash_of(output: &bale_bundler::SealOutput, name: &str) -> String {
    let chunk = output
        .chunks
        .iter()
        .find(|c| c.name.as_deref() == Some(name))
        .expect("chunk");
    output.chunk_asset(&chunk.id).expect("asset").hash.clone()
}

#[tokio::test]
async fn restart_with_persisted_cache_builds_nothing() {
    let dir = TempDir::new().unwrap();
    let factory = project();

    let first = {
        let compiler = Compiler::new(persistent(&dir), factory.clone()).unwrap();
        compiler.run(&entries()).await.unwrap()
    };
    assert_eq!(factory.build_count(), 4);

    factory.reset_counters();
    let compiler = Compiler::new(persistent(&dir), factory.clone()).unwrap();
    let second = compiler.run(&entries()).await.unwrap();

    assert_eq!(factory.build_count(), 0);
    assert_eq!(second.stats.make.cache_hits, 4);
    assert_eq!(second.stats.chunks_rendered, 0);
    assert!(second.assets.iter().all(|a| a.cached));
    assert_eq!(files(&first), files(&second));
    assert_eq!(first.unused_exports, second.unused_exports);
}

#[tokio::test]
async fn editing_a_module_keeps_unrelated_chunk_hashes() {
    let factory = project();
    let compiler = Compiler::new(BundleConfig::default(), factory.clone()).unwrap();
    let first = compiler.run(&entries()).await.unwrap();

    factory.reset_counters();
    factory.insert(esm("x.js", "export const x = 2;", vec![], &["x", "unused"]));
    let second = compiler.run(&entries()).await.unwrap();

    assert_eq!(factory.built_modules(), vec![ModuleIdentifier::new("src/x.js")]);
    assert_ne!(hash_of(&first, "a"), hash_of(&second, "a"));
    assert_eq!(hash_of(&first, "b"), hash_of(&second, "b"));

    let x = ModuleIdentifier::new("src/x.js");
    assert!(second.changes.modified.contains(&x));
    assert!(second.changes.affected.contains(&ModuleIdentifier::new("src/a.js")));
    assert!(!second.changes.affected.contains(&ModuleIdentifier::new("src/b.js")));
}

#[tokio::test]
async fn corrupt_chunk_entries_are_rebuilt_with_a_warning() {
    let dir = TempDir::new().unwrap();
    let factory = project();

    let first = {
        let compiler = Compiler::new(persistent(&dir), factory.clone()).unwrap();
        compiler.run(&entries()).await.unwrap()
    };

    {
        let store = CacheStore::open(&dir.path().join("cache")).unwrap();
        for key in store.keys().unwrap() {
            if key.starts_with("chunk/") {
                store.put(&key, b"garbage").unwrap();
            }
        }
    }

    let compiler = Compiler::new(persistent(&dir), factory.clone()).unwrap();
    let second = compiler.run(&entries()).await.unwrap();

    assert!(
        second
            .warnings
            .iter()
            .any(|w| w.kind == DiagnosticKind::CacheCorruption)
    );
    assert_eq!(second.stats.chunks_rendered, first.assets.len());
    assert_eq!(files(&first), files(&second));
}

#[tokio::test]
async fn disabled_cache_always_builds() {
    let factory = project();
    let mut config = BundleConfig::default();
    config.cache.enabled = false;
    let compiler = Compiler::new(config, factory.clone()).unwrap();
    assert!(compiler.cache().is_none());

    compiler.run(&entries()).await.unwrap();
    compiler.run(&entries()).await.unwrap();
    assert_eq!(factory.build_count(), 8);
}

#[tokio::test]
async fn explicit_invalidation_drops_chunk_entries() {
    let factory = project();
    let compiler = Compiler::new(BundleConfig::default(), factory.clone()).unwrap();
    compiler.run(&entries()).await.unwrap();

    let dropped = compiler.invalidate(&[ModuleIdentifier::new("src/y.js")]);
    assert_eq!(dropped.modules, 1);
    assert_eq!(dropped.chunks, 1);

    let again = compiler.run(&entries()).await.unwrap();
    assert_eq!(again.stats.chunks_rendered, 1);
}

#[tokio::test]
async fn watch_rebuilds_do_not_accumulate_chunk_entries() {
    let factory = project();
    let compiler = Compiler::new(BundleConfig::default(), factory.clone()).unwrap();
    let first = compiler.run(&entries()).await.unwrap();
    let cache = compiler.cache().unwrap();
    assert_eq!(cache.lock().chunk_entry_count(), first.chunks.len());

    for version in 2..5 {
        let source = format!("export const x = {version};");
        factory.insert(esm("x.js", &source, vec![], &["x", "unused"]));
        let output = compiler.run(&entries()).await.unwrap();
        assert_eq!(cache.lock().chunk_entry_count(), output.chunks.len());
    }
}
