//! `Catalog` implementations.
//!
//! - `MemoryCatalog` holds documents in a map; used by tests and embedders
//!   that already have the assets in memory.
//! - `DirCatalog` reads `<root>/<type>/<name>.json` from disk; used by the
//!   demo binary.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use vigil_contracts::{
    asset::AssetType,
    error::{VigilError, VigilResult},
};
use vigil_core::traits::Catalog;

fn not_found(asset_type: AssetType, name: &str, reason: impl Into<String>) -> VigilError {
    VigilError::Catalog {
        asset_type: asset_type.to_string(),
        name: name.to_string(),
        reason: reason.into(),
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCatalog {
    documents: RwLock<HashMap<(AssetType, String), String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `document` as asset `name` of type `asset_type`, replacing any
    /// previous version.
    pub fn insert(&self, asset_type: AssetType, name: impl Into<String>, document: impl Into<String>) {
        if let Ok(mut documents) = self.documents.write() {
            documents.insert((asset_type, name.into()), document.into());
        }
    }

    /// Store a JSON value, keyed by its own `name` field.
    pub fn insert_json(&self, asset_type: AssetType, document: &Value) -> VigilResult<()> {
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| VigilError::InvalidAsset {
                asset: "<unnamed>".to_string(),
                reason: "missing string field 'name'".to_string(),
            })?;
        self.insert(asset_type, name, document.to_string());
        Ok(())
    }
}

impl Catalog for MemoryCatalog {
    fn get_asset(&self, asset_type: AssetType, name: &str) -> VigilResult<String> {
        let documents = self
            .documents
            .read()
            .map_err(|e| not_found(asset_type, name, format!("catalog lock poisoned: {}", e)))?;
        documents
            .get(&(asset_type, name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(asset_type, name, "not in catalog"))
    }
}

// ── Directory ────────────────────────────────────────────────────────────────

/// Reads assets from a directory tree:
///
/// ```text
/// <root>/decoder/syslog/0.json   → decoder "syslog/0"
/// <root>/rule/ssh-root-login/0.json
/// ```
pub struct DirCatalog {
    root: PathBuf,
}

impl DirCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of asset `name`. Names may contain `/` but never escape
    /// the type directory.
    pub fn path_of(&self, asset_type: AssetType, name: &str) -> VigilResult<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(not_found(asset_type, name, "asset name is not a relative path"));
        }
        Ok(self
            .root
            .join(asset_type.as_str())
            .join(format!("{}.json", name)))
    }
}

impl Catalog for DirCatalog {
    fn get_asset(&self, asset_type: AssetType, name: &str) -> VigilResult<String> {
        let path = self.path_of(asset_type, name)?;
        debug!(path = %path.display(), "reading asset");
        std::fs::read_to_string(&path)
            .map_err(|e| not_found(asset_type, name, format!("{}: {}", path.display(), e)))
    }
}
