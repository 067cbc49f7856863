//! Key/value cache backends.

use bytes::Bytes;
use cantata_core::{Error, Result};
use moka::sync::Cache;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Minimal storage interface used by [`crate::MetadataCache`].
///
/// Implementations only need atomic per-key operations; concurrent writers
/// to the same key resolve as last-write-wins.
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Remove a value. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every value.
    fn clear(&self) -> Result<()>;
}

/// In-memory store backed by moka with a byte-weighted capacity.
pub struct MemoryStore {
    cache: Cache<String, Bytes>,
    max_size: u64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_size", &self.max_size)
            .field("current_size", &self.cache.weighted_size())
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store holding at most `max_size` bytes.
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_size)
            .weigher(|key: &String, value: &Bytes| {
                (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
            })
            .build();
        Self { cache, max_size }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.cache.get(key))
    }

    fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.cache.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        Ok(())
    }
}

/// Directory-backed store, one file per key sharded by the first two key
/// characters.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self { root })
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::cache(format!("invalid cache key: {key:?}")));
        }
        let shard = key.get(..2).unwrap_or(key);
        Ok(self.root.join(shard).join(key))
    }

    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
        temp.write_all(data).map_err(|e| Error::io(path, e))?;
        temp.flush().map_err(|e| Error::io(path, e))?;
        temp.persist(path).map_err(|e| Error::io(path, e.error))?;
        Ok(())
    }
}

impl CacheStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        Self::write_atomic(&path, &value).map_err(|e| Error::cache_write(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    fn clear(&self) -> Result<()> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| Error::io(&path, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn CacheStore) {
        assert!(store.get("abcdef").unwrap().is_none());

        store.set("abcdef", Bytes::from_static(b"one")).unwrap();
        assert_eq!(store.get("abcdef").unwrap().unwrap(), "one");

        store.set("abcdef", Bytes::from_static(b"two")).unwrap();
        assert_eq!(store.get("abcdef").unwrap().unwrap(), "two");

        assert!(store.delete("abcdef").unwrap());
        assert!(!store.delete("abcdef").unwrap());

        store.set("k1", Bytes::from_static(b"x")).unwrap();
        store.clear().unwrap();
        assert!(store.get("k1").unwrap().is_none());
    }

    #[test]
    fn memory_store_operations() {
        exercise(&MemoryStore::new(1024 * 1024));
    }

    #[test]
    fn file_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileStore::open(dir.path().join("metadata")).unwrap());
    }

    #[test]
    fn file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get("../etc/passwd").is_err());
        assert!(store.set("a/b", Bytes::new()).is_err());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .set("persisted", Bytes::from_static(b"{}"))
            .unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("persisted").unwrap().unwrap(), "{}");
    }
}
