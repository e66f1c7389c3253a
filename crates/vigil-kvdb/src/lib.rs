//! # vigil-kvdb
//!
//! Thread-safe in-memory key-value databases for the VIGIL event engine.
//!
//! ## Overview
//!
//! Lookup and enrichment operators (`kvdb_extract`, `kvdb_match`,
//! `kvdb_set`, …) address databases by name through the
//! [`KvdbManager`](vigil_core::traits::KvdbManager) trait. This crate
//! provides the reference implementation used by the demo binary and by
//! tests. Databases can be seeded from JSON objects.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vigil_kvdb::MemoryKvdbManager;
//!
//! let manager = MemoryKvdbManager::new();
//! let users = manager.create("users")?;
//! users.insert("alice", r#"{"role":"admin"}"#);
//! ```

pub mod memory;

pub use memory::{MemoryKvdbManager, MemoryStore};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;

    use vigil_core::traits::{KvdbError, KvdbManager, KvdbStore};

    use super::MemoryKvdbManager;

    #[test]
    fn test_missing_database() {
        let manager = MemoryKvdbManager::new();
        let err = manager.get_handler("nope").err().unwrap();
        assert_eq!(err, KvdbError::DatabaseNotFound { db: "nope".to_string() });
    }

    #[test]
    fn test_read_write_has_key() {
        let manager = MemoryKvdbManager::new();
        manager.create("db1").unwrap();
        let handle = manager.get_handler("db1").unwrap();

        assert!(!handle.has_key("k"));
        assert!(matches!(handle.read("k"), Err(KvdbError::KeyNotFound { .. })));

        assert!(handle.write("k", "v"));
        assert!(handle.has_key("k"));
        assert_eq!(handle.read("k").unwrap(), "v");
        assert_eq!(handle.name(), "db1");
    }

    /// Two handles to the same name share one store.
    #[test]
    fn test_handles_share_store() {
        let manager = MemoryKvdbManager::new();
        manager.create("shared").unwrap();
        let a = manager.get_handler("shared").unwrap();
        let b = manager.get_handler("shared").unwrap();

        a.write("x", "1");
        assert_eq!(b.read("x").unwrap(), "1");
    }

    #[test]
    fn test_create_is_idempotent() {
        let manager = MemoryKvdbManager::new();
        let first = manager.create("db").unwrap();
        first.insert("k", "v");
        let second = manager.create("db").unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(manager.names(), vec!["db".to_string()]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let manager = MemoryKvdbManager::new();
        let store = manager.create("ro").unwrap();
        store.set_read_only(true);

        let handle = manager.get_handler("ro").unwrap();
        assert!(!handle.write("k", "v"));
        assert!(!handle.has_key("k"));
    }

    #[test]
    fn test_load_json_stores_json_text() {
        let manager = MemoryKvdbManager::new();
        manager
            .load_json("users", &json!({ "alice": { "role": "admin" }, "bob": "plain" }))
            .unwrap();
        let handle = manager.get_handler("users").unwrap();

        let alice: serde_json::Value = serde_json::from_str(&handle.read("alice").unwrap()).unwrap();
        assert_eq!(alice, json!({ "role": "admin" }));
        assert_eq!(handle.read("bob").unwrap(), "\"plain\"");
    }

    #[test]
    fn test_load_json_rejects_non_object() {
        let manager = MemoryKvdbManager::new();
        assert!(manager.load_json("bad", &json!(["a"])).is_err());
    }

    #[test]
    fn test_delete_keeps_outstanding_handles() {
        let manager = MemoryKvdbManager::new();
        manager.create("tmp").unwrap().insert("k", "v");
        let handle = manager.get_handler("tmp").unwrap();

        assert!(manager.delete("tmp"));
        assert!(manager.get_handler("tmp").is_err());
        assert_eq!(handle.read("k").unwrap(), "v");
    }

    #[test]
    fn test_concurrent_writers() {
        let manager = Arc::new(MemoryKvdbManager::new());
        manager.create("hot").unwrap();

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let handle = manager.get_handler("hot").unwrap();
                    for i in 0..50 {
                        assert!(handle.write(&format!("{}-{}", t, i), "v"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(manager.create("hot").unwrap().len(), 200);
    }
}
