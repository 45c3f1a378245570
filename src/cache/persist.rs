//! Durable storage behind the cache stores.
//!
//! A backend stores one opaque blob per namespace. Stores never share a
//! namespace, so two calculation kinds cannot overwrite each other's slots.

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use tempfile::NamedTempFile;

use super::CacheError;

/// How store mutations reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Write inside every `set`.
    Eager,
    /// Coalesce writes; flush once the store has been quiet for the delay.
    Debounced(Duration),
}

pub trait PersistenceBackend: Send + Sync + 'static {
    /// Read the blob for `namespace`, `None` when nothing was stored yet.
    fn load(&self, namespace: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replace the blob for `namespace`. Must never leave a partial write.
    fn store(&self, namespace: &str, bytes: &[u8]) -> Result<(), CacheError>;
}

/// One JSON file per namespace in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|err| CacheError::io(&directory, err))?;
        Ok(Self { directory })
    }

    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.directory.join(format!("{namespace}.json"))
    }
}

impl PersistenceBackend for FileBackend {
    fn load(&self, namespace: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(namespace);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io(&path, err)),
        }
    }

    fn store(&self, namespace: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(namespace);
        let mut file =
            NamedTempFile::new_in(&self.directory).map_err(|err| CacheError::io(&path, err))?;
        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|err| CacheError::io(&path, err))?;
        file.persist(&path)
            .map_err(|err| CacheError::io(&path, err.error))?;
        Ok(())
    }
}

/// Process-local backend: used when durable storage is disabled and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: DashMap<String, Vec<u8>>,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `store` calls served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn blob(&self, namespace: &str) -> Option<Vec<u8>> {
        self.blobs.get(namespace).map(|entry| entry.value().clone())
    }

    /// Simulate the user clearing site storage.
    pub fn clear(&self) {
        self.blobs.clear();
    }
}

impl PersistenceBackend for MemoryBackend {
    fn load(&self, namespace: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.blob(namespace))
    }

    fn store(&self, namespace: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.blobs.insert(namespace.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
