//! Document storage abstraction for filemesh nodes
//!
//! Supports an in-memory backend and, behind the `sled-backend` feature, a
//! sled database. Nodes only see the [`DocumentStore`] trait.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::{NodeConfig, Result, StoreBackend};

/// Trait for document storage backends
pub trait DocumentStore: Send + Sync {
    /// Store `content` under `name`, replacing any previous content.
    fn put(&self, name: &str, content: Vec<u8>) -> Result<()>;
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;
    /// Returns whether the document existed.
    fn delete(&self, name: &str) -> Result<bool>;
    /// All document names, ascending.
    fn list(&self) -> Result<Vec<String>>;
}

/// In-memory store (default)
pub struct MemStore {
    map: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
        }
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemStore {
    fn put(&self, name: &str, content: Vec<u8>) -> Result<()> {
        self.map().insert(name.to_string(), content);
        Ok(())
    }
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map().get(name).cloned())
    }
    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.map().remove(name).is_some())
    }
    fn list(&self) -> Result<Vec<String>> {
        Ok(self.map().keys().cloned().collect())
    }
}

/// Sled store
#[cfg(feature = "sled-backend")]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

#[cfg(feature = "sled-backend")]
impl DocumentStore for SledStore {
    fn put(&self, name: &str, content: Vec<u8>) -> Result<()> {
        self.db.insert(name, content)?;
        self.db.flush()?;
        Ok(())
    }
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(name)?.map(|ivec| ivec.to_vec()))
    }
    fn delete(&self, name: &str) -> Result<bool> {
        let existed = self.db.remove(name)?.is_some();
        self.db.flush()?;
        Ok(existed)
    }
    fn list(&self) -> Result<Vec<String>> {
        // sled iterates in byte order, which is string order for UTF-8 keys
        self.db
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| crate::Error::Store(format!("Corrupted document name: {}", e)))
            })
            .collect()
    }
}

/// Documents preloaded by `--seed-samples`
pub const SAMPLE_DOCUMENTS: &[(&str, &str)] = &[
    ("example.txt", "This is an example text file."),
    ("hello.txt", "Hello, World!"),
    ("readme.md", "# README\n\nThis is a sample markdown file."),
];

/// Shared handle to the configured backend
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn DocumentStore>,
}

impl Storage {
    pub fn new_memory() -> Self {
        Self {
            backend: Arc::new(MemStore::new()),
        }
    }
    #[cfg(feature = "sled-backend")]
    pub fn new_sled(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(SledStore::open(path)?),
        })
    }
    pub fn from_backend(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    /// Open the backend a node listening on `port` is configured for
    pub fn open(config: &NodeConfig, port: u16) -> Result<Self> {
        match config.store {
            StoreBackend::Memory => Ok(Self::new_memory()),
            #[cfg(feature = "sled-backend")]
            StoreBackend::Sled => {
                let path = config.store_path(port);
                tracing::info!(path = %path.display(), "opening sled store");
                Self::new_sled(path)
            }
            #[cfg(not(feature = "sled-backend"))]
            StoreBackend::Sled => {
                let _ = port;
                Err(crate::Error::InvalidConfig(
                    "sled store requires the sled-backend feature".into(),
                ))
            }
        }
    }

    /// Load the sample documents, keeping anything already stored
    pub fn seed_samples(&self) -> Result<usize> {
        let mut added = 0;
        for (name, content) in SAMPLE_DOCUMENTS {
            if self.backend.get(name)?.is_none() {
                self.backend.put(name, content.as_bytes().to_vec())?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn put(&self, name: &str, content: Vec<u8>) -> Result<()> {
        self.backend.put(name, content)
    }
    pub fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(name)
    }
    pub fn delete(&self, name: &str) -> Result<bool> {
        self.backend.delete(name)
    }
    pub fn list(&self) -> Result<Vec<String>> {
        self.backend.list()
    }
}
