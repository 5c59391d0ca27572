//! Identity persistence

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::identity::{Identity, IdentityId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Identity {0} not found")]
    NotFound(IdentityId),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identity file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Durable home of identity records
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create a fresh, uninitialized identity
    async fn create(&self, name: &str) -> Result<Identity, StoreError>;

    async fn get(&self, id: IdentityId) -> Result<Identity, StoreError>;

    /// All identities ordered by id
    async fn list(&self) -> Result<Vec<Identity>, StoreError>;

    /// Replace a stored record
    async fn update(&self, identity: &Identity) -> Result<(), StoreError>;
}

/// Volatile store
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<BTreeMap<IdentityId, Identity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_identities(identities: Vec<Identity>) -> Self {
        Self {
            identities: RwLock::new(identities.into_iter().map(|i| (i.id, i)).collect()),
        }
    }

    async fn snapshot(&self) -> Vec<Identity> {
        self.identities.read().await.values().cloned().collect()
    }

    /// Put back a record, or drop it when there was none before
    async fn restore(&self, id: IdentityId, previous: Option<Identity>) {
        let mut identities = self.identities.write().await;
        match previous {
            Some(identity) => {
                identities.insert(id, identity);
            }
            None => {
                identities.remove(&id);
            }
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create(&self, name: &str) -> Result<Identity, StoreError> {
        let mut identities = self.identities.write().await;
        let id = identities.keys().next_back().map_or(1, |last| last + 1);
        let identity = Identity::new(id, name);
        identities.insert(id, identity.clone());
        Ok(identity)
    }

    async fn get(&self, id: IdentityId) -> Result<Identity, StoreError> {
        self.identities
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn update(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut identities = self.identities.write().await;
        let slot = identities
            .get_mut(&identity.id)
            .ok_or(StoreError::NotFound(identity.id))?;
        *slot = identity.clone();
        Ok(())
    }
}

/// JSON file store. The whole file is rewritten on every change.
///
/// Writes are serialized, and a change whose flush fails is rolled back so
/// the cache never runs ahead of the file.
pub struct JsonFileStore {
    path: PathBuf,
    cache: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store, starting empty if the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let identities: Vec<Identity> = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => Vec::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = identities.len(), "opened identity store");

        Ok(Self {
            path,
            cache: MemoryStore::with_identities(identities),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the cache to disk. Callers hold `write_lock`.
    async fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&self.cache.snapshot().await)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for JsonFileStore {
    async fn create(&self, name: &str) -> Result<Identity, StoreError> {
        let _guard = self.write_lock.lock().await;
        let identity = self.cache.create(name).await?;
        if let Err(e) = self.flush().await {
            warn!(identity = identity.id, error = %e, "could not persist new identity");
            self.cache.restore(identity.id, None).await;
            return Err(e);
        }
        Ok(identity)
    }

    async fn get(&self, id: IdentityId) -> Result<Identity, StoreError> {
        self.cache.get(id).await
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        self.cache.list().await
    }

    async fn update(&self, identity: &Identity) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.cache.get(identity.id).await?;
        self.cache.update(identity).await?;
        if let Err(e) = self.flush().await {
            warn!(identity = identity.id, error = %e, "could not persist identity, keeping previous record");
            self.cache.restore(identity.id, Some(previous)).await;
            return Err(e);
        }
        Ok(())
    }
}
