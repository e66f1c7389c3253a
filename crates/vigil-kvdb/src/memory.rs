//! In-memory implementation of `KvdbManager` and `KvdbStore`.
//!
//! `MemoryKvdbManager` keeps every database in a map behind an `RwLock`;
//! each `MemoryStore` keeps its entries behind its own `RwLock`. Handles are
//! `Arc`s, so every expression naming the same database shares one store
//! and sees every other expression's writes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use vigil_contracts::error::{VigilError, VigilResult};
use vigil_core::traits::{KvdbError, KvdbHandle, KvdbManager, KvdbStore};

// ── Store ─────────────────────────────────────────────────────────────────────

/// A single named database.
///
/// Values are stored as raw strings, the way they were written. Operators
/// that need JSON parse the string themselves and report malformed values
/// as evaluation failures.
pub struct MemoryStore {
    name: String,
    entries: RwLock<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Reject every subsequent `write()`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Insert an entry regardless of the read-only flag.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), value.into());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvdbStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, key: &str) -> Result<String, KvdbError> {
        let entries = self.entries.read().map_err(|e| KvdbError::Backend {
            db: self.name.clone(),
            reason: format!("store lock poisoned: {}", e),
        })?;
        entries.get(key).cloned().ok_or_else(|| KvdbError::KeyNotFound {
            db: self.name.clone(),
            key: key.to_string(),
        })
    }

    fn has_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn write(&self, key: &str, value: &str) -> bool {
        if self.read_only.load(Ordering::SeqCst) {
            debug!(db = %self.name, key = %key, "write rejected: store is read-only");
            return false;
        }
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), value.to_string());
                true
            }
            Err(_) => false,
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Owns every in-memory database and hands out shared handles.
#[derive(Default)]
pub struct MemoryKvdbManager {
    stores: RwLock<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryKvdbManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create database `name` if it does not exist and return it.
    pub fn create(&self, name: &str) -> VigilResult<Arc<MemoryStore>> {
        let mut stores = self.stores.write().map_err(|e| VigilError::Kvdb {
            reason: format!("manager lock poisoned: {}", e),
        })?;
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(db = %name, "creating in-memory kvdb");
                Arc::new(MemoryStore::new(name))
            })
            .clone();
        Ok(store)
    }

    /// Create database `name` and load it from a JSON object.
    ///
    /// Every value is stored as its serialized JSON text, so operators
    /// reading it back can parse it.
    pub fn load_json(&self, name: &str, seed: &serde_json::Value) -> VigilResult<Arc<MemoryStore>> {
        let object = seed.as_object().ok_or_else(|| VigilError::Kvdb {
            reason: format!("seed for database '{}' must be a JSON object", name),
        })?;

        let store = self.create(name)?;
        for (key, value) in object {
            store.insert(key.clone(), value.to_string());
        }

        info!(db = %name, entries = store.len(), "kvdb seeded");
        Ok(store)
    }

    /// Read a JSON object from `path` and load it into database `name`.
    pub fn load_file(&self, name: &str, path: &Path) -> VigilResult<Arc<MemoryStore>> {
        let contents = std::fs::read_to_string(path).map_err(|e| VigilError::Kvdb {
            reason: format!("failed to read seed '{}' for database '{}': {}", path.display(), name, e),
        })?;
        let seed: serde_json::Value = serde_json::from_str(&contents).map_err(|e| VigilError::Kvdb {
            reason: format!("seed '{}' for database '{}' is not valid JSON: {}", path.display(), name, e),
        })?;
        self.load_json(name, &seed)
    }

    /// Remove database `name`. Outstanding handles keep the store alive.
    pub fn delete(&self, name: &str) -> bool {
        self.stores
            .write()
            .map(|mut stores| stores.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .map(|stores| stores.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl KvdbManager for MemoryKvdbManager {
    fn get_handler(&self, db: &str) -> Result<KvdbHandle, KvdbError> {
        let stores = self.stores.read().map_err(|e| KvdbError::Backend {
            db: db.to_string(),
            reason: format!("manager lock poisoned: {}", e),
        })?;
        stores
            .get(db)
            .map(|store| Arc::clone(store) as KvdbHandle)
            .ok_or_else(|| KvdbError::DatabaseNotFound { db: db.to_string() })
    }
}
