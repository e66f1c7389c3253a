//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! environment = "environment.json"
//!
//! [engine]
//! name = "production"
//! threads = 4
//!
//! [catalog]
//! root = "catalog"
//!
//! [[kvdb.databases]]
//! name = "admins"
//! seed = "kvdb/admins.json"
//!
//! [[kvdb.databases]]
//! name = "seen-hosts"
//! ```
//!
//! Relative paths in a file loaded with `from_file` are resolved against
//! the file's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_contracts::error::{VigilError, VigilResult};
use vigil_kvdb::MemoryKvdbManager;

fn default_threads() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Name the environment is built under.
    pub name: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSection {
    pub root: PathBuf,
}

/// One in-memory database to create at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    /// JSON object file whose entries seed the database.
    #[serde(default)]
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvdbSection {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the environment JSON document.
    pub environment: PathBuf,
    pub engine: EngineSection,
    pub catalog: CatalogSection,
    #[serde(default)]
    pub kvdb: KvdbSection,
}

impl EngineConfig {
    /// Parse and validate a TOML document. Paths are kept as written.
    pub fn from_toml_str(s: &str) -> VigilResult<Self> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| VigilError::Config {
            reason: format!("failed to parse engine TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`, resolving relative
    /// paths against its directory.
    pub fn from_file(path: &Path) -> VigilResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| VigilError::Config {
            reason: format!("failed to read engine config '{}': {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.relative_to(base))
    }

    fn validate(&self) -> VigilResult<()> {
        if self.engine.name.trim().is_empty() {
            return Err(VigilError::Config {
                reason: "engine.name must not be empty".to_string(),
            });
        }
        if self.engine.threads == 0 {
            return Err(VigilError::Config {
                reason: "engine.threads must be at least 1".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for db in &self.kvdb.databases {
            if !seen.insert(db.name.as_str()) {
                return Err(VigilError::Config {
                    reason: format!("kvdb database '{}' is declared twice", db.name),
                });
            }
        }
        Ok(())
    }

    /// Resolve every relative path against `base`.
    pub fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |path: &Path| -> PathBuf {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        self.environment = resolve(&self.environment);
        self.catalog.root = resolve(&self.catalog.root);
        for db in &mut self.kvdb.databases {
            db.seed = db.seed.as_deref().map(resolve);
        }
        self
    }

    /// Read the environment document.
    pub fn load_environment_document(&self) -> VigilResult<serde_json::Value> {
        let contents = std::fs::read_to_string(&self.environment).map_err(|e| VigilError::Config {
            reason: format!("failed to read environment '{}': {}", self.environment.display(), e),
        })?;
        serde_json::from_str(&contents).map_err(|e| VigilError::MalformedEnvironment {
            environment: self.engine.name.clone(),
            reason: format!("not valid JSON: {}", e),
        })
    }

    /// Create every configured database in `manager`, seeding those that
    /// name a seed file.
    pub fn seed_kvdb(&self, manager: &MemoryKvdbManager) -> VigilResult<()> {
        for db in &self.kvdb.databases {
            match &db.seed {
                Some(seed) => {
                    manager.load_file(&db.name, seed)?;
                }
                None => {
                    manager.create(&db.name)?;
                }
            }
            debug!(db = %db.name, seeded = db.seed.is_some(), "kvdb database ready");
        }
        Ok(())
    }
}
