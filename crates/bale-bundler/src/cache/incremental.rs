//! Etag-keyed store of module build results and rendered chunks.
//!
//! Entries are kept encoded. Decoding happens on lookup, so a damaged entry
//! only costs that entry: it is dropped with a warning and reported as a miss.

use std::collections::{BTreeMap, BTreeSet};

use bale_graph::{ExportsInfo, Module, ModuleIdentifier};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::etag::Etag;
use super::storage::{CacheError, CacheStore};
use crate::codegen::RuntimeRequirement;

const MODULE_PREFIX: &str = "module/";
const CHUNK_PREFIX: &str = "chunk/";
const FORMAT_VERSION_KEY: &str = "format_version";

/// Cached result of building one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedModule {
    pub module: Module,
    pub exports_info: ExportsInfo,
}

/// Cached rendering of one chunk, with hash placeholders still in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedChunk {
    pub modules: Vec<ModuleIdentifier>,
    pub content: String,
    /// Hex hash of `content`.
    pub own_hash: String,
    /// Ids of chunks whose hash placeholders appear in `content`.
    pub references: Vec<String>,
    pub runtime_requirements: BTreeSet<RuntimeRequirement>,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    /// The entry existed but could not be decoded. It has been removed.
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub corrupt: usize,
}

/// What [`IncrementalCache::invalidate_module`] dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub modules: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModuleEntry {
    identifier: ModuleIdentifier,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkEntry {
    modules: BTreeSet<ModuleIdentifier>,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct IncrementalCache {
    modules: BTreeMap<Etag, ModuleEntry>,
    chunks: BTreeMap<Etag, ChunkEntry>,
    /// Module identifier to the etags of chunk entries that contain it.
    module_chunks: BTreeMap<ModuleIdentifier, BTreeSet<Etag>>,
    /// Chunk entries read or written since the last sweep.
    live_chunks: BTreeSet<Etag>,
    stats: CacheStats,
    warnings: Vec<String>,
}

impl IncrementalCache {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_module(&mut self, etag: &Etag) -> CacheLookup<CachedModule> {
        let decoded = match self.modules.get(etag) {
            None => {
                self.stats.misses += 1;
                return CacheLookup::Miss;
            }
            Some(entry) => decode::<CachedModule>(&entry.bytes),
        };
        match decoded {
            Ok(cached) => {
                self.stats.hits += 1;
                CacheLookup::Hit(cached)
            }
            Err(err) => {
                self.modules.remove(etag);
                self.corrupt(format!("module entry {etag}: {err}"))
            }
        }
    }

    pub fn put_module(&mut self, etag: Etag, cached: &CachedModule) -> Result<(), CacheError> {
        let bytes = encode(cached)?;
        self.modules.insert(
            etag,
            ModuleEntry {
                identifier: cached.module.identifier.clone(),
                bytes,
            },
        );
        Ok(())
    }

    pub fn get_chunk(&mut self, etag: &Etag) -> CacheLookup<CachedChunk> {
        let decoded = match self.chunks.get(etag) {
            None => {
                self.stats.misses += 1;
                return CacheLookup::Miss;
            }
            Some(entry) => decode::<CachedChunk>(&entry.bytes),
        };
        match decoded {
            Ok(cached) => {
                self.stats.hits += 1;
                self.live_chunks.insert(etag.clone());
                CacheLookup::Hit(cached)
            }
            Err(err) => {
                self.remove_chunk(etag);
                self.corrupt(format!("chunk entry {etag}: {err}"))
            }
        }
    }

    pub fn put_chunk(&mut self, etag: Etag, cached: &CachedChunk) -> Result<(), CacheError> {
        let bytes = encode(cached)?;
        let modules: BTreeSet<_> = cached.modules.iter().cloned().collect();
        for id in &modules {
            self.module_chunks
                .entry(id.clone())
                .or_default()
                .insert(etag.clone());
        }
        self.live_chunks.insert(etag.clone());
        self.chunks.insert(etag, ChunkEntry { modules, bytes });
        Ok(())
    }

    /// Drop chunk entries not read or written since the previous sweep.
    /// Seal calls this once every chunk has been looked up.
    pub fn sweep_chunks(&mut self) -> usize {
        let live = std::mem::take(&mut self.live_chunks);
        let stale: Vec<Etag> = self
            .chunks
            .keys()
            .filter(|etag| !live.contains(*etag))
            .cloned()
            .collect();
        let removed = stale.iter().filter(|etag| self.remove_chunk(etag)).count();
        if removed > 0 {
            tracing::debug!(removed, "swept stale chunk entries");
        }
        removed
    }

    /// Drop every entry built from `identifier` and every chunk entry whose
    /// membership included it.
    pub fn invalidate_module(&mut self, identifier: &ModuleIdentifier) -> Invalidation {
        let before = self.modules.len();
        self.modules.retain(|_, entry| entry.identifier != *identifier);
        let modules = before - self.modules.len();

        let chunk_etags = self.module_chunks.remove(identifier).unwrap_or_default();
        let chunks = chunk_etags
            .iter()
            .filter(|etag| self.remove_chunk(etag))
            .count();

        tracing::debug!(module = %identifier, modules, chunks, "invalidated cache entries");
        Invalidation { modules, chunks }
    }

    pub fn module_entry_count(&self) -> usize {
        self.modules.len()
    }

    pub fn chunk_entry_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.modules.clear();
        self.chunks.clear();
        self.module_chunks.clear();
        self.live_chunks.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Warnings about discarded entries since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn remove_chunk(&mut self, etag: &Etag) -> bool {
        let Some(entry) = self.chunks.remove(etag) else {
            return false;
        };
        for id in &entry.modules {
            if let Some(set) = self.module_chunks.get_mut(id) {
                set.remove(etag);
                if set.is_empty() {
                    self.module_chunks.remove(id);
                }
            }
        }
        true
    }

    fn corrupt<T>(&mut self, message: String) -> CacheLookup<T> {
        tracing::warn!("discarding corrupt cache entry: {message}");
        self.stats.corrupt += 1;
        self.warnings.push(message.clone());
        CacheLookup::Corrupt(message)
    }

    fn insert_stored(&mut self, key: &str, bytes: &[u8]) -> Result<(), String> {
        if let Some(hex) = key.strip_prefix(MODULE_PREFIX) {
            let entry: ModuleEntry = decode(bytes)?;
            self.modules.insert(Etag::from_hex(hex), entry);
        } else if let Some(hex) = key.strip_prefix(CHUNK_PREFIX) {
            let entry: ChunkEntry = decode(bytes)?;
            let etag = Etag::from_hex(hex);
            for id in &entry.modules {
                self.module_chunks
                    .entry(id.clone())
                    .or_default()
                    .insert(etag.clone());
            }
            self.chunks.insert(etag, entry);
        } else {
            return Err("unknown key prefix".to_string());
        }
        Ok(())
    }

    fn stored_entries(&self) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let modules = self.modules.iter().map(|(etag, entry)| {
            encode(entry).map(|bytes| (format!("{MODULE_PREFIX}{etag}"), bytes))
        });
        let chunks = self.chunks.iter().map(|(etag, entry)| {
            encode(entry).map(|bytes| (format!("{CHUNK_PREFIX}{etag}"), bytes))
        });
        modules.chain(chunks).collect()
    }

    /// Replace the contents of `store` with this cache.
    pub fn persist(&self, store: &CacheStore) -> Result<(), CacheError> {
        let entries = self.stored_entries()?;
        store.clear()?;
        store.put_many(entries.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
        store.set_metadata(FORMAT_VERSION_KEY, &Self::FORMAT_VERSION.to_string())?;
        tracing::debug!(entries = entries.len(), "persisted incremental cache");
        Ok(())
    }

    /// Load from `store`. A store written by another format version is
    /// ignored as a whole; individual undecodable rows are skipped with a
    /// warning.
    pub fn restore(store: &CacheStore) -> Result<Self, CacheError> {
        let mut cache = Self::new();
        let version = store.get_metadata(FORMAT_VERSION_KEY)?;
        if version
            .as_deref()
            .is_some_and(|v| v != Self::FORMAT_VERSION.to_string())
        {
            tracing::warn!(found = ?version, "ignoring cache store from another format version");
            return Ok(cache);
        }

        for (key, bytes) in store.entries()? {
            if let Err(err) = cache.insert_stored(&key, &bytes) {
                let _ = cache.corrupt::<()>(format!("stored entry {key}: {err}"));
            }
        }
        Ok(cache)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serialize(value).map_err(|e| CacheError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    bincode::deserialize(bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cached(id: &str, source: &str) -> CachedModule {
        let module = Module::builder(id.into())
            .source(source)
            .exports(["a"])
            .build();
        let exports_info = ExportsInfo::from_module(&module);
        CachedModule {
            module,
            exports_info,
        }
    }

    fn chunk(modules: &[&str]) -> CachedChunk {
        CachedChunk {
            modules: modules.iter().map(|m| ModuleIdentifier::new(*m)).collect(),
            content: "chunk".to_string(),
            own_hash: "00".to_string(),
            references: Vec::new(),
            runtime_requirements: BTreeSet::new(),
        }
    }

    fn etag(name: &str) -> Etag {
        Etag::builder().str(name).finish()
    }

    #[test]
    fn module_round_trip_counts_hits() {
        let mut cache = IncrementalCache::new();
        cache.put_module(etag("a"), &cached("a.js", "1")).unwrap();

        assert_eq!(cache.get_module(&etag("a")), CacheLookup::Hit(cached("a.js", "1")));
        assert_eq!(cache.get_module(&etag("b")), CacheLookup::Miss);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, corrupt: 0 });
    }

    #[test]
    fn corrupt_entries_are_dropped_with_a_warning() {
        let mut cache = IncrementalCache::new();
        cache.modules.insert(
            etag("bad"),
            ModuleEntry {
                identifier: "a.js".into(),
                bytes: vec![0xff, 0x01],
            },
        );

        assert!(matches!(cache.get_module(&etag("bad")), CacheLookup::Corrupt(_)));
        assert_eq!(cache.get_module(&etag("bad")), CacheLookup::Miss);
        assert_eq!(cache.take_warnings().len(), 1);
        assert!(cache.take_warnings().is_empty());
    }

    #[test]
    fn invalidation_follows_chunk_membership() {
        let mut cache = IncrementalCache::new();
        cache.put_module(etag("x1"), &cached("x.js", "1")).unwrap();
        cache.put_module(etag("y1"), &cached("y.js", "1")).unwrap();
        cache.put_chunk(etag("c1"), &chunk(&["x.js", "y.js"])).unwrap();
        cache.put_chunk(etag("c2"), &chunk(&["y.js"])).unwrap();

        let dropped = cache.invalidate_module(&"x.js".into());
        assert_eq!(dropped, Invalidation { modules: 1, chunks: 1 });
        assert_eq!(cache.module_entry_count(), 1);
        assert!(matches!(cache.get_chunk(&etag("c2")), CacheLookup::Hit(_)));
        assert_eq!(cache.get_chunk(&etag("c1")), CacheLookup::Miss);
    }

    #[test]
    fn sweep_drops_chunks_untouched_since_the_last_sweep() {
        let mut cache = IncrementalCache::new();
        cache.put_chunk(etag("old"), &chunk(&["a.js"])).unwrap();
        cache.put_chunk(etag("kept"), &chunk(&["b.js"])).unwrap();
        assert_eq!(cache.sweep_chunks(), 0);

        // Next generation: "kept" is reused, "old" is replaced by "new".
        assert!(matches!(cache.get_chunk(&etag("kept")), CacheLookup::Hit(_)));
        cache.put_chunk(etag("new"), &chunk(&["a.js"])).unwrap();
        assert_eq!(cache.sweep_chunks(), 1);

        assert_eq!(cache.chunk_entry_count(), 2);
        assert_eq!(cache.get_chunk(&etag("old")), CacheLookup::Miss);
        assert_eq!(cache.invalidate_module(&"a.js".into()).chunks, 1);
    }

    #[test]
    fn redb_round_trip_skips_damaged_rows() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        let mut cache = IncrementalCache::new();
        cache.put_module(etag("a"), &cached("a.js", "1")).unwrap();
        cache.put_module(etag("b"), &cached("b.js", "1")).unwrap();
        cache.persist(&store).unwrap();

        let damaged = format!("{MODULE_PREFIX}{}", etag("b"));
        store.put(&damaged, b"garbage").unwrap();

        let mut restored = IncrementalCache::restore(&store).unwrap();
        assert_eq!(restored.module_entry_count(), 1);
        assert_eq!(restored.stats().corrupt, 1);
        assert!(matches!(restored.get_module(&etag("a")), CacheLookup::Hit(_)));
    }

    #[test]
    fn other_format_versions_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let mut cache = IncrementalCache::new();
        cache.put_module(etag("a"), &cached("a.js", "1")).unwrap();
        cache.persist(&store).unwrap();
        store.set_metadata(FORMAT_VERSION_KEY, "999").unwrap();

        assert!(IncrementalCache::restore(&store).unwrap().is_empty());
    }
}
