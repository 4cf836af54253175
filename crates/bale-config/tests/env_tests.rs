//! Environment overrides. Kept in their own test binary because they mutate
//! process-wide state.

use std::fs;

use bale_config::ConfigLoader;
use tempfile::TempDir;

#[test]
fn environment_overrides_file_values() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("bale.toml"),
        "[optimization]\ntree_shaking = true\n",
    )
    .unwrap();

    // SAFETY: this binary runs a single test, so no other thread reads the
    // environment concurrently.
    unsafe {
        std::env::set_var("BALE_OPTIMIZATION__TREE_SHAKING", "false");
        std::env::set_var("BALE_PARALLELISM", "7");
    }

    let config = ConfigLoader::new(dir.path()).load().unwrap();
    assert!(!config.optimization.tree_shaking);
    assert_eq!(config.parallelism, Some(7));

    let without_env = ConfigLoader::new(dir.path()).without_env().load().unwrap();
    assert!(without_env.optimization.tree_shaking);
    assert_eq!(without_env.parallelism, None);
}
