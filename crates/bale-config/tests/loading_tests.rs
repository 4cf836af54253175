//! Integration tests for layered config loading.

use std::fs;

use bale_config::{
    BundleConfig, ChunkSelection, ConfigError, ConfigLoader, IdStrategy, RuntimeChunkMode,
};
use tempfile::TempDir;

#[test]
fn missing_files_fall_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = ConfigLoader::new(dir.path()).without_env().load().unwrap();
    assert_eq!(config, BundleConfig::default());
}

#[test]
fn toml_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("bale.toml"),
        r#"
parallelism = 2

[ids]
module_ids = "natural"

[optimization]
runtime_chunk = "per-entry"

[[optimization.split_chunks.cache_groups]]
key = "commons"
min_chunks = 2
chunks = "initial"
"#,
    )
    .unwrap();

    let config = ConfigLoader::new(dir.path()).without_env().load().unwrap();
    assert_eq!(config.parallelism, Some(2));
    assert_eq!(config.ids.module_ids, IdStrategy::Natural);
    assert_eq!(config.ids.chunk_ids, IdStrategy::Deterministic);
    assert_eq!(config.optimization.runtime_chunk, RuntimeChunkMode::PerEntry);

    let groups = &config.optimization.split_chunks.cache_groups;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].key, "commons");
    assert_eq!(groups[0].chunks, ChunkSelection::Initial);
    assert_eq!(groups[0].priority, 0);
    config.validate().unwrap();
}

#[test]
fn toml_wins_over_json() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("bale.json"),
        r#"{ "parallelism": 3, "output": { "hash_length": 12 } }"#,
    )
    .unwrap();
    fs::write(dir.path().join("bale.toml"), "parallelism = 5\n").unwrap();

    let loader = ConfigLoader::new(dir.path()).without_env();
    assert_eq!(loader.discover().len(), 2);
    let config = loader.load().unwrap();
    assert_eq!(config.parallelism, Some(5));
    assert_eq!(config.output.hash_length, 12);
}

#[test]
fn explicit_file_must_exist() {
    let dir = TempDir::new().unwrap();
    let err = ConfigLoader::new(dir.path())
        .with_file(dir.path().join("custom.toml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn type_errors_name_the_field() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bale.toml"), "parallelism = \"many\"\n").unwrap();
    let err = ConfigLoader::new(dir.path())
        .without_env()
        .load()
        .unwrap_err();
    match err {
        ConfigError::InvalidValue { field, .. } => assert_eq!(field, "parallelism"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn toml_round_trip_of_defaults() {
    let rendered = BundleConfig::default().to_toml().unwrap();
    let parsed = BundleConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(parsed, BundleConfig::default());
}
