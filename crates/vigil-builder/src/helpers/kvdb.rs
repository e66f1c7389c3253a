//! KVDB helpers: look values up in, test keys against, and write to named
//! key-value stores.
//!
//! | helper               | parameters              | on success                      |
//! |----------------------|-------------------------|---------------------------------|
//! | `kvdb_extract`       | db, key                 | target = stored JSON value      |
//! | `kvdb_extract_merge` | db, key                 | stored value merged into target |
//! | `kvdb_match`         | db                      | target (a string) is a key      |
//! | `kvdb_not_match`     | db                      | target is not a key             |
//! | `kvdb_set`           | db, key, value          | value written, target = true    |
//!
//! Extract and match resolve their store when the asset is built, so a
//! missing database fails construction. Set resolves its store on every
//! evaluation and reports an unavailable database in the trace.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use vigil_contracts::{
    error::{VigilError, VigilResult},
    event::MergeError,
    Outcome, Parameter,
};
use vigil_core::{
    traits::{KvdbHandle, KvdbManager},
    Expression,
};

use crate::definition::HelperDefinition;
use crate::registry::{expect_helper, Registry};

pub const EXTRACT: &str = "helper.kvdb_extract";
pub const EXTRACT_MERGE: &str = "helper.kvdb_extract_merge";
pub const MATCH: &str = "helper.kvdb_match";
pub const NOT_MATCH: &str = "helper.kvdb_not_match";
pub const SET: &str = "helper.kvdb_set";

pub(crate) fn register(registry: &mut Registry, kvdb: Arc<dyn KvdbManager>) -> VigilResult<()> {
    let manager = Arc::clone(&kvdb);
    registry.register(EXTRACT, move |definition, _| {
        build_extract(expect_helper(EXTRACT, definition)?, manager.as_ref(), false)
    })?;

    let manager = Arc::clone(&kvdb);
    registry.register(EXTRACT_MERGE, move |definition, _| {
        build_extract(expect_helper(EXTRACT_MERGE, definition)?, manager.as_ref(), true)
    })?;

    let manager = Arc::clone(&kvdb);
    registry.register(MATCH, move |definition, _| {
        build_match(expect_helper(MATCH, definition)?, manager.as_ref(), true)
    })?;

    let manager = Arc::clone(&kvdb);
    registry.register(NOT_MATCH, move |definition, _| {
        build_match(expect_helper(NOT_MATCH, definition)?, manager.as_ref(), false)
    })?;

    registry.register(SET, move |definition, _| {
        build_set(expect_helper(SET, definition)?, Arc::clone(&kvdb))
    })?;

    Ok(())
}

/// Resolve the store named by literal parameter 0 at build time.
fn build_time_handle(helper: &HelperDefinition, manager: &dyn KvdbManager) -> VigilResult<KvdbHandle> {
    helper.check_literal(0)?;
    let db = helper.parameters[0].value();
    manager.get_handler(db).map_err(|e| VigilError::Kvdb {
        reason: format!("{}: {}", helper.formatted_name(), e),
    })
}

// ── Extract ───────────────────────────────────────────────────────────────────

/// `kvdb_extract` / `kvdb_extract_merge`.
pub fn build_extract(helper: &HelperDefinition, manager: &dyn KvdbManager, merge: bool) -> VigilResult<Expression> {
    helper.check_parameters_size(2)?;
    let store = build_time_handle(helper, manager)?;

    let name = helper.formatted_name();
    let target = helper.target_field.clone();
    let key = helper.parameters[1].clone();
    let db = store.name().to_string();

    let success_trace = format!("[{}] -> Success", name);
    let reference_trace = format!("[{}] -> Failure: reference '{}' not found", name, key.value());
    let target_trace = format!("[{}] -> Failure: target field '{}' not found", name, target);
    let mismatch_trace = format!("[{}] -> Failure: fields type mismatch when merging", name);

    debug!(helper = %name, db = %db, merge, "built kvdb extract");

    Ok(Expression::term(name.clone(), move |event| {
        let resolved_key = match key.resolve(event) {
            Some(k) => k.to_string(),
            None => return Outcome::failure(reference_trace.clone()),
        };

        let raw = match store.read(&resolved_key) {
            Ok(raw) => raw,
            Err(_) => {
                return Outcome::failure(format!(
                    "[{}] -> Failure: key '{}' could not be found on database '{}'",
                    name, resolved_key, db
                ))
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => {
                return Outcome::failure(format!(
                    "[{}] -> Failure: malformed JSON for key '{}'",
                    name, resolved_key
                ))
            }
        };

        if !merge {
            event.set(&target, value);
            return Outcome::success(success_trace.clone());
        }

        match event.merge(&target, value) {
            Ok(()) => Outcome::success(success_trace.clone()),
            Err(MergeError::MissingTarget { .. }) => Outcome::failure(target_trace.clone()),
            Err(MergeError::TypeMismatch { .. }) => Outcome::failure(mismatch_trace.clone()),
        }
    }))
}

// ── Match ─────────────────────────────────────────────────────────────────────

/// `kvdb_match` (`check_exist == true`) / `kvdb_not_match`.
pub fn build_match(helper: &HelperDefinition, manager: &dyn KvdbManager, check_exist: bool) -> VigilResult<Expression> {
    helper.check_parameters_size(1)?;
    let store = build_time_handle(helper, manager)?;

    let name = helper.formatted_name();
    let target = helper.target_field.clone();
    let db = store.name().to_string();
    let success_trace = format!("[{}] -> Success", name);
    let target_trace = format!(
        "[{}] -> Failure: target '{}' does not exist or it is not a string",
        name, target
    );

    Ok(Expression::term(name.clone(), move |event| {
        let key = match event.get_str(&target) {
            Some(key) => key,
            None if check_exist => return Outcome::failure(target_trace.clone()),
            None => return Outcome::success(success_trace.clone()),
        };

        match (check_exist, store.has_key(key)) {
            (true, true) | (false, false) => Outcome::success(success_trace.clone()),
            (true, false) => Outcome::failure(format!(
                "[{}] -> Failure: key '{}' could not be found on database '{}'",
                name, key, db
            )),
            (false, true) => Outcome::failure(format!(
                "[{}] -> Failure: key '{}' was found on database '{}'",
                name, key, db
            )),
        }
    }))
}

// ── Set ───────────────────────────────────────────────────────────────────────

/// `kvdb_set`.
pub fn build_set(helper: &HelperDefinition, manager: Arc<dyn KvdbManager>) -> VigilResult<Expression> {
    helper.check_parameters_size(3)?;

    let name = helper.formatted_name();
    let target = helper.target_field.clone();
    let db = helper.parameters[0].clone();
    let key = helper.parameters[1].clone();
    let value = helper.parameters[2].clone();

    let success_trace = format!("[{}] -> Success", name);
    let missing = |p: &Parameter| format!("[{}] -> Failure: reference '{}' not found", name, p.value());
    let db_missing_trace = missing(&db);
    let key_missing_trace = missing(&key);
    let value_missing_trace = missing(&value);

    Ok(Expression::term(name.clone(), move |event| {
        event.set_bool(&target, false);

        let Some(db_name) = db.resolve(event).map(str::to_string) else {
            return Outcome::failure(db_missing_trace.clone());
        };
        let Some(key_value) = key.resolve(event).map(str::to_string) else {
            return Outcome::failure(key_missing_trace.clone());
        };
        let Some(stored) = value.resolve(event).map(str::to_string) else {
            return Outcome::failure(value_missing_trace.clone());
        };

        let store = match manager.get_handler(&db_name) {
            Ok(store) => store,
            Err(e) => {
                return Outcome::failure(format!(
                    "[{}] -> Failure: Database '{}' could not be loaded: {}",
                    name, db_name, e
                ))
            }
        };

        if !store.write(&key_value, &stored) {
            return Outcome::failure(format!(
                "[{}] -> Failure: Key '{}' and value '{}' could not be written to database '{}'",
                name, key_value, stored, db_name
            ));
        }

        event.set_bool(&target, true);
        Outcome::success(success_trace.clone())
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use vigil_contracts::{Event, Trace};
    use vigil_core::traits::{KvdbError, KvdbStore};
    use vigil_kvdb::MemoryKvdbManager;

    use super::*;

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn manager_with(db: &str, entries: &[(&str, &str)]) -> Arc<MemoryKvdbManager> {
        let manager = Arc::new(MemoryKvdbManager::new());
        let store = manager.create(db).unwrap();
        for (key, value) in entries {
            store.insert(*key, *value);
        }
        manager
    }

    fn helper(target: &str, raw: &str) -> HelperDefinition {
        HelperDefinition::parse(target, raw).unwrap()
    }

    fn run(expression: &Expression, event: &mut Event) -> (bool, Trace) {
        let mut trace = Trace::new();
        let ok = expression.evaluate(event, &mut trace);
        (ok, trace)
    }

    /// Records every write it is asked to perform.
    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(String, String)>>,
        accept: bool,
    }

    impl KvdbStore for RecordingStore {
        fn name(&self) -> &str {
            "recording"
        }
        fn read(&self, key: &str) -> Result<String, KvdbError> {
            Err(KvdbError::KeyNotFound {
                db: "recording".to_string(),
                key: key.to_string(),
            })
        }
        fn has_key(&self, _key: &str) -> bool {
            false
        }
        fn write(&self, key: &str, value: &str) -> bool {
            self.writes.lock().unwrap().push((key.to_string(), value.to_string()));
            self.accept
        }
    }

    struct RecordingManager {
        store: Arc<RecordingStore>,
    }

    impl KvdbManager for RecordingManager {
        fn get_handler(&self, db: &str) -> Result<KvdbHandle, KvdbError> {
            if db == "recording" {
                Ok(Arc::clone(&self.store) as KvdbHandle)
            } else {
                Err(KvdbError::DatabaseNotFound { db: db.to_string() })
            }
        }
    }

    // ── Extract ──────────────────────────────────────────────────────────────

    #[test]
    fn test_extract_sets_target_from_literal_key() {
        let manager = manager_with("users", &[("alice", r#"{"role":"admin"}"#)]);
        let expr = build_extract(&helper("user.info", "+kvdb_extract/users/alice"), manager.as_ref(), false).unwrap();

        let mut event = Event::new();
        let (ok, trace) = run(&expr, &mut event);

        assert!(ok);
        assert_eq!(event.get("user.info"), Some(&json!({"role": "admin"})));
        assert!(trace.contains("[helper.kvdb_extract[user.info, users, alice]] -> Success"));
    }

    #[test]
    fn test_extract_resolves_reference_key() {
        let manager = manager_with("ports", &[("22", r#""ssh""#)]);
        let expr = build_extract(&helper("service", "+kvdb_extract/ports/$dst.port"), manager.as_ref(), false).unwrap();

        let mut event = Event::from_value(json!({"dst": {"port": "22"}}));
        let (ok, _) = run(&expr, &mut event);

        assert!(ok);
        assert_eq!(event.get_str("service"), Some("ssh"));
    }

    #[test]
    fn test_extract_failures_are_traced() {
        let manager = manager_with("db", &[("broken", "{not json")]);

        let expr = build_extract(&helper("out", "+kvdb_extract/db/$missing"), manager.as_ref(), false).unwrap();
        let (ok, trace) = run(&expr, &mut Event::new());
        assert!(!ok);
        assert!(trace.contains("reference 'missing' not found"));

        let expr = build_extract(&helper("out", "+kvdb_extract/db/absent"), manager.as_ref(), false).unwrap();
        let (ok, trace) = run(&expr, &mut Event::new());
        assert!(!ok);
        assert!(trace.contains("key 'absent' could not be found on database 'db'"));

        let expr = build_extract(&helper("out", "+kvdb_extract/db/broken"), manager.as_ref(), false).unwrap();
        let mut event = Event::new();
        let (ok, trace) = run(&expr, &mut event);
        assert!(!ok);
        assert!(trace.contains("malformed JSON for key 'broken'"));
        assert!(!event.exists("out"));
    }

    #[test]
    fn test_extract_missing_database_is_build_error() {
        let manager = MemoryKvdbManager::new();
        let err = build_extract(&helper("out", "+kvdb_extract/nope/k"), &manager, false).unwrap_err();
        assert!(matches!(err, VigilError::Kvdb { .. }));
    }

    #[test]
    fn test_extract_rejects_bad_arity_and_reference_db() {
        let manager = manager_with("db", &[]);
        assert!(build_extract(&helper("out", "+kvdb_extract/db"), manager.as_ref(), false).is_err());
        assert!(build_extract(&helper("out", "+kvdb_extract/$db/k"), manager.as_ref(), false).is_err());
    }

    #[test]
    fn test_extract_merge_objects_and_arrays() {
        let manager = manager_with("db", &[("obj", r#"{"b":2,"a":9}"#), ("arr", r#"[2,3]"#)]);

        let expr = build_extract(&helper("o", "+kvdb_extract_merge/db/obj"), manager.as_ref(), true).unwrap();
        let mut event = Event::from_value(json!({"o": {"a": 1, "c": 3}}));
        assert!(run(&expr, &mut event).0);
        assert_eq!(event.get("o"), Some(&json!({"a": 9, "b": 2, "c": 3})));

        let expr = build_extract(&helper("l", "+kvdb_extract_merge/db/arr"), manager.as_ref(), true).unwrap();
        let mut event = Event::from_value(json!({"l": [1, 2]}));
        assert!(run(&expr, &mut event).0);
        assert_eq!(event.get("l"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_extract_merge_type_mismatch_leaves_target_untouched() {
        let manager = manager_with("db", &[("arr", r#"[1,2]"#)]);
        let expr = build_extract(&helper("o", "+kvdb_extract_merge/db/arr"), manager.as_ref(), true).unwrap();

        let mut event = Event::from_value(json!({"o": {"keep": true}}));
        let (ok, trace) = run(&expr, &mut event);

        assert!(!ok);
        assert!(trace.contains("fields type mismatch when merging"));
        assert_eq!(event.get("o"), Some(&json!({"keep": true})));
    }

    #[test]
    fn test_extract_merge_needs_existing_target() {
        let manager = manager_with("db", &[("obj", r#"{"a":1}"#)]);
        let expr = build_extract(&helper("o", "+kvdb_extract_merge/db/obj"), manager.as_ref(), true).unwrap();

        let (ok, trace) = run(&expr, &mut Event::new());
        assert!(!ok);
        assert!(trace.contains("target field 'o' not found"));
    }

    // ── Match ────────────────────────────────────────────────────────────────

    #[test]
    fn test_match_truth_table() {
        let manager = manager_with("admins", &[("root", "true")]);
        let matched = build_match(&helper("user", "+kvdb_match/admins"), manager.as_ref(), true).unwrap();
        let not_matched = build_match(&helper("user", "+kvdb_not_match/admins"), manager.as_ref(), false).unwrap();

        let cases = [
            (json!({"user": "root"}), true, false),
            (json!({"user": "guest"}), false, true),
            (json!({"user": 7}), false, true),
            // An absent target counts as "not found".
            (json!({}), false, true),
        ];

        for (doc, expect_match, expect_not_match) in cases {
            let mut event = Event::from_value(doc.clone());
            assert_eq!(run(&matched, &mut event).0, expect_match, "match on {}", doc);
            assert_eq!(run(&not_matched, &mut event).0, expect_not_match, "not_match on {}", doc);
        }
    }

    #[test]
    fn test_match_failures_explain_why() {
        let manager = manager_with("admins", &[("root", "true")]);
        let matched = build_match(&helper("user", "+kvdb_match/admins"), manager.as_ref(), true).unwrap();
        let not_matched = build_match(&helper("user", "+kvdb_not_match/admins"), manager.as_ref(), false).unwrap();

        let (_, trace) = run(&matched, &mut Event::from_value(json!({"user": 7})));
        assert!(trace.contains(
            "[helper.kvdb_match[user, admins]] -> Failure: target 'user' does not exist or it is not a string"
        ));

        let (_, trace) = run(&matched, &mut Event::from_value(json!({"user": "guest"})));
        assert!(trace.contains("Failure: key 'guest' could not be found on database 'admins'"));

        let (_, trace) = run(&not_matched, &mut Event::from_value(json!({"user": "root"})));
        assert!(trace.contains(
            "[helper.kvdb_not_match[user, admins]] -> Failure: key 'root' was found on database 'admins'"
        ));

        let (_, trace) = run(&not_matched, &mut Event::from_value(json!({})));
        assert!(trace.contains("[helper.kvdb_not_match[user, admins]] -> Success"));
    }

    #[test]
    fn test_match_requires_one_literal_database() {
        let manager = manager_with("db", &[]);
        assert!(build_match(&helper("f", "+kvdb_match"), manager.as_ref(), true).is_err());
        assert!(build_match(&helper("f", "+kvdb_match/$db"), manager.as_ref(), true).is_err());
        assert!(build_match(&helper("f", "+kvdb_match/other"), manager.as_ref(), true).is_err());
    }

    // ── Set ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_set_writes_and_marks_target() {
        let manager = manager_with("db1", &[]);
        let expr = build_set(&helper("result", "+kvdb_set/db1/mykey/5"), manager.clone()).unwrap();

        let mut event = Event::new();
        let (ok, _) = run(&expr, &mut event);

        assert!(ok);
        assert_eq!(event.get("result"), Some(&json!(true)));
        assert!(manager.get_handler("db1").unwrap().has_key("mykey"));
        assert_eq!(manager.get_handler("db1").unwrap().read("mykey").unwrap(), "5");
    }

    #[test]
    fn test_set_with_missing_reference_does_not_write() {
        let store = Arc::new(RecordingStore {
            accept: true,
            ..Default::default()
        });
        let manager = Arc::new(RecordingManager { store: Arc::clone(&store) });
        let expr = build_set(&helper("result", "+kvdb_set/recording/$user.name/v"), manager).unwrap();

        let mut event = Event::new();
        let (ok, trace) = run(&expr, &mut event);

        assert!(!ok);
        assert_eq!(event.get("result"), Some(&json!(false)));
        assert!(trace.contains("reference 'user.name' not found"));
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_set_resolves_database_at_evaluation_time() {
        let manager = Arc::new(MemoryKvdbManager::new());
        let expr = build_set(&helper("result", "+kvdb_set/late/k/v"), manager.clone()).unwrap();

        let (ok, trace) = run(&expr, &mut Event::new());
        assert!(!ok);
        assert!(trace.contains("Database 'late' could not be loaded"));

        manager.create("late").unwrap();
        let mut event = Event::new();
        assert!(run(&expr, &mut event).0);
        assert_eq!(event.get("result"), Some(&json!(true)));
    }

    #[test]
    fn test_set_reports_rejected_write() {
        let store = Arc::new(RecordingStore::default());
        let manager = Arc::new(RecordingManager { store: Arc::clone(&store) });
        let expr = build_set(&helper("result", "+kvdb_set/recording/$k/$v"), manager).unwrap();

        let mut event = Event::from_value(json!({"k": "host", "v": "blocked"}));
        let (ok, trace) = run(&expr, &mut event);

        assert!(!ok);
        assert_eq!(event.get("result"), Some(&json!(false)));
        assert!(trace.contains("Key 'host' and value 'blocked' could not be written to database 'recording'"));
        assert_eq!(store.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_set_rejects_wrong_arity() {
        let manager = Arc::new(MemoryKvdbManager::new());
        assert!(build_set(&helper("r", "+kvdb_set/db/k"), manager).is_err());
    }
}
