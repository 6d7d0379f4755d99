use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::StoreError;

/// Last-write-wins persistence for scan reports, keyed by address.
pub trait ResultStore: Send + Sync {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Replace any previous report for `address`.
    fn put(&self, address: &str, report: &[u8]) -> Result<(), StoreError>;
    /// Errors with [`StoreError::NotFound`] if there was nothing to delete.
    fn delete(&self, address: &str) -> Result<(), StoreError>;
    /// Addresses with a stored report, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Process-local store; results vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    results: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.results.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.results.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultStore for MemoryStore {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read().get(address).cloned())
    }

    fn put(&self, address: &str, report: &[u8]) -> Result<(), StoreError> {
        self.write().insert(address.to_string(), report.to_vec());
        Ok(())
    }

    fn delete(&self, address: &str) -> Result<(), StoreError> {
        self.write()
            .remove(address)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(address.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read().keys().cloned().collect())
    }
}

/// Reports kept in one JSON file, rewritten atomically on every change.
///
/// Readers only ever touch the in-memory cache. Writers are serialized by
/// `write_lock`, and the file is written after the cache lock is released.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Load `path`, or start empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let results: BTreeMap<String, String> = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = results.len(), "opened result store");
        let cache = MemoryStore::new();
        let encoded = {
            let mut guard = cache.write();
            for (k, v) in results {
                guard.insert(k, v.into_bytes());
            }
            encode(&guard)?
        };
        let store = Self {
            path,
            cache,
            write_lock: Mutex::new(()),
        };
        store.write_file(&encoded)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling of the store file used for the atomic rename.
    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn write_file(&self, encoded: &[u8]) -> Result<(), StoreError> {
        let tmp = self.tmp_path();
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn encode(results: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, StoreError> {
    // Reports are text; lossy conversion only touches bytes we never produce
    let on_disk: BTreeMap<&str, String> = results
        .iter()
        .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v).into_owned()))
        .collect();
    Ok(serde_json::to_vec_pretty(&on_disk)?)
}

impl ResultStore for FileStore {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.cache.get(address)
    }

    fn put(&self, address: &str, report: &[u8]) -> Result<(), StoreError> {
        let _writing = self.lock_writes();
        let (previous, encoded) = {
            let mut guard = self.cache.write();
            let previous = guard.insert(address.to_string(), report.to_vec());
            (previous, encode(&guard))
        };
        if let Err(e) = encoded.and_then(|bytes| self.write_file(&bytes)) {
            let mut guard = self.cache.write();
            match previous {
                Some(p) => guard.insert(address.to_string(), p),
                None => guard.remove(address),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, address: &str) -> Result<(), StoreError> {
        let _writing = self.lock_writes();
        let (previous, encoded) = {
            let mut guard = self.cache.write();
            let previous = guard
                .remove(address)
                .ok_or_else(|| StoreError::NotFound(address.to_string()))?;
            (previous, encode(&guard))
        };
        if let Err(e) = encoded.and_then(|bytes| self.write_file(&bytes)) {
            self.cache.write().insert(address.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        self.cache.list()
    }
}
