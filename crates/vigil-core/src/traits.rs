//! Collaborator traits for the VIGIL engine.
//!
//! The engine compiles and evaluates; everything else is injected:
//!
//! - `Catalog`: resolves asset names to JSON definitions
//! - `KvdbManager`: hands out handles to named key-value stores
//! - `KvdbStore`: one store, shared by every expression that names it
//!
//! Implementations must be `Send + Sync`. A `KvdbStore` in particular is
//! read and written concurrently from every worker thread evaluating
//! events, so it is responsible for its own locking.

use std::sync::Arc;

use thiserror::Error;

use vigil_contracts::{asset::AssetType, error::VigilResult};

/// Resolves asset names to their JSON text.
pub trait Catalog: Send + Sync {
    /// Return the JSON document for asset `name` of type `asset_type`.
    ///
    /// A missing asset must be reported as `VigilError::Catalog`; the
    /// environment under construction is abandoned.
    fn get_asset(&self, asset_type: AssetType, name: &str) -> VigilResult<String>;
}

/// Errors reported by a key-value store or its manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvdbError {
    #[error("database '{db}' not found")]
    DatabaseNotFound { db: String },

    #[error("key '{key}' not found in database '{db}'")]
    KeyNotFound { db: String, key: String },

    #[error("database '{db}' backend error: {reason}")]
    Backend { db: String, reason: String },
}

/// One named key-value store.
pub trait KvdbStore: Send + Sync {
    fn name(&self) -> &str;

    /// Read the raw value stored under `key`.
    fn read(&self, key: &str) -> Result<String, KvdbError>;

    fn has_key(&self, key: &str) -> bool;

    /// Store `value` under `key`. Returns false if the write was rejected.
    fn write(&self, key: &str, value: &str) -> bool;
}

/// Shared reference to a store. Expressions hold handles; they never own
/// the store's lifetime.
pub type KvdbHandle = Arc<dyn KvdbStore>;

/// Looks up stores by name.
pub trait KvdbManager: Send + Sync {
    fn get_handler(&self, db: &str) -> Result<KvdbHandle, KvdbError>;
}
