//! redb-backed cache storage.
//!
//! A single `cache.redb` file holds one row per cache entry (etag-prefixed key
//! to bincode bytes) plus a small metadata table.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

/// Entries: key to serialized bytes.
const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

/// Store-wide metadata such as the format version.
const METADATA_TABLE: TableDefinition<&str, &str> = TableDefinition::new("metadata");

/// Error types for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Cache entry not found.
    #[error("cache miss")]
    CacheMiss,

    #[error("cache database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::DatabaseError> for CacheError {
    fn from(err: redb::DatabaseError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::TableError> for CacheError {
    fn from(err: redb::TableError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(err: redb::TransactionError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(err: redb::StorageError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(err: redb::CommitError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

/// Persistent cache store using redb.
pub struct CacheStore {
    db: Database,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open or create `<cache_dir>/cache.redb`, creating the directory too.
    pub fn open(cache_dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(cache_dir)?;
        let db = Database::create(cache_dir.join("cache.redb"))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CACHE_TABLE)?;
            let _ = write_txn.open_table(METADATA_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Raw bytes stored under `key`. Returns `CacheMiss` if absent.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        let value = table.get(key)?.ok_or(CacheError::CacheMiss)?;
        Ok(value.value().to_vec())
    }

    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.put_many([(key, bytes)])
    }

    /// Write several entries in one transaction.
    pub fn put_many<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            for (key, bytes) in entries {
                table.insert(key, bytes)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        Ok(table.get(key)?.is_some())
    }

    /// Every stored key, in key order.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        let mut keys = Vec::new();
        for row in table.iter()? {
            let (key, _) = row?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    /// Every stored entry, in key order.
    pub fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        let mut entries = Vec::new();
        for row in table.iter()? {
            let (key, value) = row?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }

    /// Drop every entry. Metadata is kept.
    pub fn clear(&self) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.delete_table(CACHE_TABLE)?;
            let _ = write_txn.open_table(CACHE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        Ok(table.iter()?.count())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(METADATA_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(METADATA_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (CacheStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_store_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("nested").join("cache");
        let _store = CacheStore::open(&cache_dir).unwrap();
        assert!(cache_dir.join("cache.redb").exists());
    }

    #[test]
    fn test_cache_miss() {
        let (store, _dir) = create_test_store();
        assert!(matches!(store.get("module/none"), Err(CacheError::CacheMiss)));
    }

    #[test]
    fn test_put_get_remove() {
        let (store, _dir) = create_test_store();
        store
            .put_many([("b", b"2".as_slice()), ("a", b"1".as_slice())])
            .unwrap();
        assert_eq!(store.get("a").unwrap(), b"1");
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);

        store.remove("a").unwrap();
        assert!(!store.contains("a").unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_clear_keeps_metadata() {
        let (store, _dir) = create_test_store();
        store.put("a", b"1").unwrap();
        store.set_metadata("format_version", "1").unwrap();

        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(
            store.get_metadata("format_version").unwrap(),
            Some("1".to_string())
        );
    }
}
