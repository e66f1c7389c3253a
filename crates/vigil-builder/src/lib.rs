//! # vigil-builder
//!
//! Turns declarative asset and environment documents into compiled
//! expressions.
//!
//! ## Overview
//!
//! - [`Registry`] maps operator names to builders. [`Registry::builtin`]
//!   registers the `check` / `normalize` stages, the per-field condition
//!   and map operations, and the KVDB helpers bound to a
//!   [`KvdbManager`](vigil_core::traits::KvdbManager).
//! - [`Asset`] validates one document against the asset schema and builds
//!   its expression.
//! - [`Environment`] fetches every asset an environment document names from
//!   a [`Catalog`](vigil_core::traits::Catalog), assembles the decoder, rule
//!   and output graphs, splices filters in, and composes the root
//!   expression events are evaluated with.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_builder::{DirCatalog, Environment, Registry};
//! use vigil_kvdb::MemoryKvdbManager;
//!
//! let registry = Registry::builtin(Arc::new(MemoryKvdbManager::new()))?;
//! let catalog = DirCatalog::new("demo/catalog");
//! let env = Environment::build("production", &document, &catalog, &registry)?;
//! let processed = env.evaluate(event);
//! ```

pub mod asset;
pub mod catalog;
pub mod definition;
pub mod environment;
pub mod helpers;
pub mod operation;
pub mod registry;
pub mod schema;
pub mod stage;

pub use asset::{Asset, AssetId};
pub use catalog::{DirCatalog, MemoryCatalog};
pub use definition::HelperDefinition;
pub use environment::Environment;
pub use registry::{Builder, Definition, Registry};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use vigil_contracts::{
        asset::{AssetType, GraphKind},
        error::VigilError,
        Event, Trace,
    };
    use vigil_core::traits::{KvdbManager, KvdbStore};
    use vigil_kvdb::MemoryKvdbManager;

    use crate::{Definition, Environment, MemoryCatalog, Registry};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn registry() -> Registry {
        Registry::builtin(Arc::new(MemoryKvdbManager::new())).unwrap()
    }

    fn catalog(assets: &[(AssetType, Value)]) -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        for (asset_type, doc) in assets {
            catalog.insert_json(*asset_type, doc).unwrap();
        }
        catalog
    }

    fn children(env: &Environment, kind: GraphKind, node: &str) -> Vec<String> {
        env.graph(kind).unwrap().children(node).to_vec()
    }

    // ── 1. registry ───────────────────────────────────────────────────────────

    #[test]
    fn test_builtin_registry_has_every_operator() {
        let names = registry().names().into_iter().map(String::from).collect::<Vec<_>>();
        for expected in [
            "stage.check",
            "stage.map",
            "stage.normalize",
            "operation.condition",
            "operation.map",
            "helper.kvdb_extract",
            "helper.kvdb_extract_merge",
            "helper.kvdb_match",
            "helper.kvdb_not_match",
            "helper.kvdb_set",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register("stage.check", |_, _| Ok(vigil_core::Expression::noop("x")))
            .unwrap_err();
        assert!(matches!(err, VigilError::DuplicateBuilder { .. }));
    }

    #[test]
    fn test_unknown_builder_and_helper() {
        let registry = registry();
        let err = registry.build("stage.parse", &Definition::Stage(json!([]))).unwrap_err();
        assert!(matches!(err, VigilError::UnknownBuilder { .. }));

        let err = registry
            .build("stage.check", &Definition::Stage(json!([{ "f": "+no_such_helper/x" }])))
            .unwrap_err();
        assert!(err.to_string().contains("helper.no_such_helper"));
    }

    #[test]
    fn test_builder_rejects_wrong_definition_kind() {
        let err = registry().build("operation.map", &Definition::Stage(json!({}))).unwrap_err();
        assert!(err.to_string().contains("expected a operation definition"));
    }

    // ── 2. stages and operations ──────────────────────────────────────────────

    #[test]
    fn test_check_accepts_list_and_object_forms() {
        let registry = registry();
        let event = json!({ "a": 1, "b": "two", "c": "two" });

        for body in [
            json!([{ "a": 1 }, { "b": "$c" }]),
            json!({ "a": 1, "b": "$c" }),
        ] {
            let check = registry.build("stage.check", &Definition::Stage(body)).unwrap();
            let mut e = Event::from_value(event.clone());
            assert!(check.evaluate(&mut e, &mut Trace::new()));
        }

        let check = registry
            .build("stage.check", &Definition::Stage(json!([{ "a": 2 }, { "b": "two" }])))
            .unwrap();
        let mut trace = Trace::new();
        assert!(!check.evaluate(&mut Event::from_value(event), &mut trace));
        // And stops at the first failure.
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn test_condition_reference_failures_are_traced() {
        let check = registry()
            .build("stage.check", &Definition::Stage(json!({ "a": "$missing" })))
            .unwrap();
        let mut trace = Trace::new();
        assert!(!check.evaluate(&mut Event::from_value(json!({ "a": 1 })), &mut trace));
        assert!(trace.contains("reference 'missing' not found"));
    }

    #[test]
    fn test_normalize_blocks_run_independently() {
        let normalize = registry()
            .build(
                "stage.normalize",
                &Definition::Stage(json!([
                    { "check": { "kind": "nope" }, "map": { "skipped": true } },
                    { "map": [{ "copied": "$src" }, { "fixed": [1, 2] }] },
                    { "check": [{ "kind": "login" }], "map": { "tagged": "yes" } }
                ])),
            )
            .unwrap();

        let mut event = Event::from_value(json!({ "kind": "login", "src": "10.0.0.1" }));
        assert!(normalize.evaluate(&mut event, &mut Trace::new()));

        assert!(!event.exists("skipped"));
        assert_eq!(event.get_str("copied"), Some("10.0.0.1"));
        assert_eq!(event.get("fixed"), Some(&json!([1, 2])));
        assert_eq!(event.get_str("tagged"), Some("yes"));
    }

    #[test]
    fn test_normalize_rejects_unknown_block_keys_and_missing_map() {
        let registry = registry();
        let err = registry
            .build("stage.normalize", &Definition::Stage(json!([{ "map": {}, "parse": {} }])))
            .unwrap_err();
        assert!(err.to_string().contains("unknown key 'parse'"));

        assert!(registry
            .build("stage.normalize", &Definition::Stage(json!([{ "check": {} }])))
            .is_err());
        assert!(registry
            .build("stage.normalize", &Definition::Stage(json!({ "map": {} })))
            .is_err());
    }

    // ── 3. environment construction ───────────────────────────────────────────

    #[test]
    fn test_builds_graphs_with_input_nodes_and_parents() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "syslog" })),
            (AssetType::Decoder, json!({ "name": "sshd", "parents": ["syslog"] })),
            (AssetType::Rule, json!({ "name": "r1" })),
        ]);
        let doc = json!({ "decoders": ["syslog", "sshd"], "rules": ["r1"] });

        let env = Environment::build("test", &doc, &catalog, &registry()).unwrap();

        assert_eq!(children(&env, GraphKind::Decoders, "decodersInput"), vec!["syslog"]);
        assert_eq!(children(&env, GraphKind::Decoders, "syslog"), vec!["sshd"]);
        assert_eq!(children(&env, GraphKind::Rules, "rulesInput"), vec!["r1"]);
        assert!(env.graph(GraphKind::Outputs).is_none());

        for graph in env.graphs().values() {
            for (parent, kids) in graph.edges() {
                assert!(graph.has_node(parent.as_str()));
                assert!(kids.iter().all(|k| graph.has_node(k.as_str())));
            }
        }
        assert_eq!(env.asset("sshd").unwrap().parents, vec!["syslog"]);
    }

    #[test]
    fn test_missing_catalog_asset_aborts_construction() {
        let catalog = catalog(&[(AssetType::Decoder, json!({ "name": "syslog" }))]);
        let doc = json!({ "decoders": ["syslog", "ghost"] });

        let err = Environment::build("test", &doc, &catalog, &registry()).unwrap_err();
        assert!(matches!(err, VigilError::Catalog { ref name, .. } if name == "ghost"));
    }

    #[test]
    fn test_document_shape_errors() {
        let catalog = catalog(&[(AssetType::Decoder, json!({ "name": "d" }))]);
        let registry = registry();

        let err = Environment::build("e", &json!({ "decoders": ["d"], "parsers": [] }), &catalog, &registry).unwrap_err();
        assert!(matches!(err, VigilError::MalformedEnvironment { .. }));

        let err = Environment::build("e", &json!({}), &catalog, &registry).unwrap_err();
        assert!(matches!(err, VigilError::MissingGraph { .. }));

        let err = Environment::build("e", &json!({ "decoders": "d" }), &catalog, &registry).unwrap_err();
        assert!(matches!(err, VigilError::MalformedEnvironment { .. }));

        let err = Environment::build("e", &json!({ "decoders": ["d", "d"] }), &catalog, &registry).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        assert!(Environment::build("e", &json!(["d"]), &catalog, &registry).is_err());
    }

    #[test]
    fn test_asset_name_must_match_listing() {
        let catalog = MemoryCatalog::new();
        catalog.insert(AssetType::Decoder, "listed", r#"{"name":"other"}"#);
        let err = Environment::build("e", &json!({ "decoders": ["listed"] }), &catalog, &registry()).unwrap_err();
        assert!(matches!(err, VigilError::InvalidAsset { .. }));
    }

    #[test]
    fn test_schema_violation_aborts_construction() {
        let catalog = catalog(&[(AssetType::Rule, json!({ "name": "r", "check": "nope" }))]);
        let err = Environment::build("e", &json!({ "rules": ["r"] }), &catalog, &registry()).unwrap_err();
        assert!(matches!(err, VigilError::InvalidAsset { .. }));
    }

    #[test]
    fn test_missing_parent_is_integrity_error() {
        let catalog = catalog(&[(AssetType::Decoder, json!({ "name": "child", "parents": ["ghost"] }))]);
        let err = Environment::build("e", &json!({ "decoders": ["child"] }), &catalog, &registry()).unwrap_err();

        match err {
            VigilError::Integrity { graph, reason } => {
                assert_eq!(graph, "decoders");
                assert_eq!(reason, "parent [ghost] not found, for children [child]");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_reachable_cycle_is_rejected() {
        let catalog = catalog(&[
            (AssetType::Rule, json!({ "name": "a", "parents": ["rulesInput", "b"] })),
            (AssetType::Rule, json!({ "name": "b", "parents": ["a"] })),
        ]);
        let err = Environment::build("e", &json!({ "rules": ["a", "b"] }), &catalog, &registry()).unwrap_err();
        assert!(matches!(err, VigilError::Cycle { .. }));
    }

    #[test]
    fn test_filter_is_spliced_after_its_target() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "a" })),
            (AssetType::Decoder, json!({ "name": "c1", "parents": ["a"] })),
            (AssetType::Decoder, json!({ "name": "c2", "parents": ["a"] })),
            (AssetType::Filter, json!({ "name": "f", "after": ["a"], "check": { "allowed": true } })),
            (AssetType::Filter, json!({ "name": "unused", "after": ["nowhere"] })),
        ]);
        let doc = json!({ "filters": ["f", "unused"], "decoders": ["a", "c1", "c2"] });

        let env = Environment::build("e", &doc, &catalog, &registry()).unwrap();

        assert_eq!(children(&env, GraphKind::Decoders, "a"), vec!["f"]);
        assert_eq!(children(&env, GraphKind::Decoders, "f"), vec!["c1", "c2"]);
        assert!(!env.graph(GraphKind::Decoders).unwrap().has_node("unused"));
        assert_eq!(env.filters().count(), 2);
    }

    #[test]
    fn test_filter_rejects_parents_key() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "a" })),
            (AssetType::Filter, json!({ "name": "f", "parents": ["a"] })),
        ]);
        let doc = json!({ "filters": ["f"], "decoders": ["a"] });
        assert!(Environment::build("e", &doc, &catalog, &registry()).is_err());
    }

    #[test]
    fn test_filter_after_two_nodes_of_one_graph_is_rejected() {
        let catalog = catalog(&[
            (AssetType::Rule, json!({ "name": "a", "check": { "kind": "a" } })),
            (AssetType::Rule, json!({ "name": "b", "check": { "kind": "b" } })),
            (AssetType::Rule, json!({ "name": "ca", "parents": ["a"], "normalize": [{ "map": { "ran_ca": true } }] })),
            (AssetType::Rule, json!({ "name": "cb", "parents": ["b"], "normalize": [{ "map": { "ran_cb": true } }] })),
            (AssetType::Filter, json!({ "name": "f", "after": ["a", "b"] })),
        ]);
        let doc = json!({ "filters": ["f"], "rules": ["a", "b", "ca", "cb"] });

        match Environment::build("e", &doc, &catalog, &registry()).unwrap_err() {
            VigilError::InvalidAsset { asset, reason } => {
                assert_eq!(asset, "f");
                assert_eq!(reason, "filter follows several nodes of the [rules] graph: [a, b]");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_filter_after_nodes_of_different_graphs_guards_each() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "d" })),
            (AssetType::Decoder, json!({ "name": "dc", "parents": ["d"] })),
            (AssetType::Rule, json!({ "name": "r" })),
            (AssetType::Rule, json!({ "name": "rc", "parents": ["r"] })),
            (AssetType::Filter, json!({ "name": "f", "after": ["d", "r"] })),
        ]);
        let doc = json!({ "filters": ["f"], "decoders": ["d", "dc"], "rules": ["r", "rc"] });
        let env = Environment::build("e", &doc, &catalog, &registry()).unwrap();

        assert_eq!(children(&env, GraphKind::Decoders, "f"), vec!["dc"]);
        assert_eq!(children(&env, GraphKind::Rules, "f"), vec!["rc"]);
    }

    // ── 4. evaluation ─────────────────────────────────────────────────────────

    #[test]
    fn test_first_matching_decoder_wins_and_all_rules_run() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "d1", "check": { "kind": "x" }, "normalize": [{ "map": { "decoder": "d1" } }] })),
            (AssetType::Decoder, json!({ "name": "d2", "check": { "kind": "x" }, "normalize": [{ "map": { "second": true } }] })),
            (AssetType::Rule, json!({ "name": "r1", "check": { "decoder": "nope" }, "normalize": [{ "map": { "r1": true } }] })),
            (AssetType::Rule, json!({ "name": "r2", "check": { "decoder": "d1" }, "normalize": [{ "map": { "r2": true } }] })),
            (AssetType::Rule, json!({ "name": "r3", "normalize": [{ "map": { "r3": true } }] })),
        ]);
        let doc = json!({ "decoders": ["d1", "d2"], "rules": ["r1", "r2", "r3"] });
        let env = Environment::build("e", &doc, &catalog, &registry()).unwrap();

        let processed = env.evaluate(Event::from_value(json!({ "kind": "x" })));

        assert_eq!(processed.environment, "e");
        assert_eq!(processed.event.get_str("decoder"), Some("d1"));
        assert!(!processed.event.exists("second"));
        assert!(!processed.event.exists("r1"));
        assert_eq!(processed.event.get("r2"), Some(&json!(true)));
        assert_eq!(processed.event.get("r3"), Some(&json!(true)));
        assert!(processed.trace.failures().count() >= 1);
    }

    #[test]
    fn test_unmatched_event_is_still_evaluated() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "d", "check": { "kind": "x" }, "normalize": [{ "map": { "decoded": true } }] })),
            (AssetType::Rule, json!({ "name": "r", "check": { "decoded": true }, "normalize": [{ "map": { "alert": true } }] })),
        ]);
        let doc = json!({ "decoders": ["d"], "rules": ["r"] });
        let env = Environment::build("e", &doc, &catalog, &registry()).unwrap();

        let processed = env.evaluate(Event::from_value(json!({ "kind": "y" })));

        assert!(processed.success);
        assert!(!processed.event.exists("decoded"));
        assert!(!processed.event.exists("alert"));
        assert!(processed.trace.failures().count() >= 2);
    }

    #[test]
    fn test_filter_blocks_its_subtree() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "a", "normalize": [{ "map": { "seen_a": true } }] })),
            (AssetType::Decoder, json!({ "name": "c", "parents": ["a"], "normalize": [{ "map": { "seen_c": true } }] })),
            (AssetType::Filter, json!({ "name": "f", "after": ["a"], "check": { "allowed": true } })),
        ]);
        let doc = json!({ "filters": ["f"], "decoders": ["a", "c"] });
        let env = Environment::build("e", &doc, &catalog, &registry()).unwrap();

        let blocked = env.evaluate(Event::from_value(json!({ "allowed": false })));
        assert_eq!(blocked.event.get("seen_a"), Some(&json!(true)));
        assert!(!blocked.event.exists("seen_c"));

        let passed = env.evaluate(Event::from_value(json!({ "allowed": true })));
        assert_eq!(passed.event.get("seen_c"), Some(&json!(true)));
    }

    #[test]
    fn test_kvdb_helpers_inside_an_environment() {
        let manager = Arc::new(MemoryKvdbManager::new());
        manager
            .load_json("users", &json!({ "root": { "admin": true } }))
            .unwrap();
        manager.create("seen").unwrap();
        let registry = Registry::builtin(manager.clone()).unwrap();

        let catalog = catalog(&[
            (
                AssetType::Decoder,
                json!({
                    "name": "sshd",
                    "check": { "program": "sshd" },
                    "normalize": [{ "map": { "user.profile": "+kvdb_extract/users/$user.name" } }]
                }),
            ),
            (
                AssetType::Rule,
                json!({
                    "name": "known-user",
                    "check": { "user.name": "+kvdb_match/users" },
                    "normalize": [{ "map": { "user.recorded": "+kvdb_set/seen/$user.name/$program" } }]
                }),
            ),
        ]);
        let doc = json!({ "decoders": ["sshd"], "rules": ["known-user"] });
        let env = Environment::build("e", &doc, &catalog, &registry).unwrap();

        let processed = env.evaluate(Event::from_value(json!({ "program": "sshd", "user": { "name": "root" } })));

        assert_eq!(processed.event.get("user.profile"), Some(&json!({ "admin": true })));
        assert_eq!(processed.event.get("user.recorded"), Some(&json!(true)));
        assert_eq!(manager.get_handler("seen").unwrap().read("root").unwrap(), "sshd");
        assert!(processed.trace.contains("[helper.kvdb_match[user.name, users]] -> Success"));
    }

    #[test]
    fn test_missing_kvdb_database_aborts_construction() {
        let catalog = catalog(&[(
            AssetType::Rule,
            json!({ "name": "r", "check": { "ip": "+kvdb_match/blocklist" } }),
        )]);
        let err = Environment::build("e", &json!({ "rules": ["r"] }), &catalog, &registry()).unwrap_err();
        match err {
            VigilError::InvalidAsset { asset, reason } => {
                assert_eq!(asset, "r");
                assert!(reason.contains("blocklist"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    // ── 5. metadata ───────────────────────────────────────────────────────────

    #[test]
    fn test_expression_is_composed_once() {
        let catalog = catalog(&[(AssetType::Output, json!({ "name": "o" }))]);
        let env = Environment::build("e", &json!({ "outputs": ["o"] }), &catalog, &registry()).unwrap();

        let first = env.expression() as *const _;
        let second = env.expression() as *const _;
        assert_eq!(first, second);
        assert_eq!(env.expression().name(), "e");
        assert!(env.expression().to_string().contains("outputsInputNode <implication>"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_ids_are_unique() {
        let catalog = catalog(&[(AssetType::Decoder, json!({ "name": "d" }))]);
        let doc = json!({ "decoders": ["d"] });
        let registry = registry();

        let a = Environment::build("e", &doc, &catalog, &registry).unwrap();
        let b = Environment::build("e", &doc, &catalog, &registry).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        assert_ne!(a.id(), b.id());

        catalog.insert_json(AssetType::Decoder, &json!({ "name": "d", "check": { "x": 1 } })).unwrap();
        let c = Environment::build("e", &doc, &catalog, &registry).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_graphviz_renders_one_cluster_per_graph() {
        let catalog = catalog(&[
            (AssetType::Decoder, json!({ "name": "d" })),
            (AssetType::Rule, json!({ "name": "r" })),
        ]);
        let env = Environment::build("e", &json!({ "decoders": ["d"], "rules": ["r"] }), &catalog, &registry()).unwrap();

        let dot = env.graphviz();
        assert!(dot.starts_with("digraph \"e\" {"));
        assert!(dot.contains("subgraph cluster_decoders"));
        assert!(dot.contains("subgraph cluster_rules"));
        assert!(dot.contains("\"decodersInput\" -> \"d\";"));
    }
}
