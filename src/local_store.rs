//! Process-local key/value stores used by lenient storage.
//!
//! Values are JSON text keyed by the same logical key the application uses
//! against the remote store. Nothing here stamps timestamps; a value reads
//! back exactly as it was written.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use lmdb::{Database, Environment, Error as LmdbError, Transaction, WriteFlags};
use log::{debug, info};

use crate::app_error::{AppError, AppResult};

const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;

pub trait LocalStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> AppResult<()>;
    fn clear(&self) -> AppResult<()>;
}

/// Embedded on-disk store backed by LMDB.
///
/// ```no_run
/// use cloud_storage_core::local_store::{LmdbLocalStore, LocalStore};
///
/// let store = LmdbLocalStore::open("app_cache.lmdb")?;
/// store.set("settings", r#"{"theme":"dark"}"#)?;
/// assert_eq!(store.get("settings")?.as_deref(), Some(r#"{"theme":"dark"}"#));
/// # Ok::<(), cloud_storage_core::app_error::AppError>(())
/// ```
#[derive(Debug)]
pub struct LmdbLocalStore {
    env: Environment,
    db: Database,
    path: PathBuf,
}

impl LmdbLocalStore {
    /// Opens (creating if needed) the environment directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|e| {
            AppError::LocalStoreError(format!("Cannot create {}: {}", path.display(), e))
        })?;

        let env = Environment::new().set_map_size(map_size).open(&path)?;
        let db = env.open_db(None)?;
        info!("Local store opened at {}", path.display());
        Ok(Self { env, db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocalStore for LmdbLocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let txn = self.env.begin_ro_txn()?;
        let found = match txn.get(self.db, &key) {
            Ok(bytes) => Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                AppError::SerializationError(format!("Stored value for '{}' is not UTF-8: {}", key, e))
            })?),
            Err(LmdbError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(found)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        debug!("Local store wrote '{}'", key);
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &key, None) {
            Ok(()) | Err(LmdbError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        txn.commit()?;
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.db)?;
        txn.commit()?;
        info!("Local store at {} cleared", self.path.display());
        Ok(())
    }
}

/// Non-persistent store for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: RwLock<HashMap<String, String>>,
}

fn poisoned() -> AppError {
    AppError::LocalStoreError("Local store lock poisoned".to_string())
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        self.entries.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}
