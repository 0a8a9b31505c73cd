//! Import Construction Tests
//!
//! End-to-end construction against the fixture state, plus scenarios built
//! in memory: pass-through chains, readiness, validation and aggregation.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::json;

use landscaper_imports::error::{
    is_import_not_found_error, is_import_not_ready_error, is_schema_loader_error,
    is_schema_validation_failed_error,
};
use landscaper_imports::graph::{load_blueprints, load_state_directory, LoadConfig};
use landscaper_imports::{
    construct_imports, Blueprint, Construction, ConstructorOptions, ExportValue, Fingerprint, ImportError,
    ImportStatusEntry, ImportStatusWriter, ImportType, Installation, InstallationGraph, ObjectRef, Phase,
    ReferenceLoader, ResolutionOutcome, ResolutionState, Result, Target,
};
use landscaper_imports::schema::{LoaderConfig, MemoryFs};

struct Fixture {
    graph: InstallationGraph,
    blueprints: BTreeMap<String, Blueprint>,
}

impl Fixture {
    fn load() -> Self {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        Self {
            graph: load_state_directory(&root.join("state"), &LoadConfig::default()).unwrap(),
            blueprints: load_blueprints(&root.join("blueprints")).unwrap(),
        }
    }

    fn in_memory(graph: InstallationGraph) -> Self {
        Self {
            graph,
            blueprints: BTreeMap::new(),
        }
    }

    fn construct_with(&self, reference: &str, options: ConstructorOptions) -> Result<Construction> {
        let inst = self.graph.get(&ObjectRef::parse(reference).unwrap()).unwrap();
        let blueprint = inst
            .spec
            .blueprint
            .as_ref()
            .and_then(|name| self.blueprints.get(name))
            .cloned()
            .unwrap_or_default();
        let loader = ReferenceLoader::new(LoaderConfig::from_blueprint(&blueprint));
        construct_imports(&self.graph, inst, loader, options)
    }

    fn construct(&self, reference: &str) -> Result<Construction> {
        self.construct_with(reference, ConstructorOptions::default())
    }

    /// Construct and write back, as a reconciler would after success
    fn resolve(&mut self, reference: &str) -> Construction {
        let construction = self.construct(reference).unwrap();
        self.graph
            .record_construction(&ObjectRef::parse(reference).unwrap(), &construction)
            .unwrap();
        construction
    }
}

fn values(construction: &Construction) -> serde_json::Value {
    serde_json::to_value(&construction.values).unwrap()
}

// =============================================================================
// Fixture State
// =============================================================================

#[test]
fn test_import_from_sibling_export() {
    let fixture = Fixture::load();
    let construction = fixture.construct("test2/b").unwrap();

    assert_eq!(values(&construction), json!({"b.a": "val-a"}));
    let entry = construction.import_status.get_data("b.a").unwrap();
    assert_eq!(entry.from, "a");
    assert_eq!(entry.to, "b.a");
    assert_eq!(entry.source_ref, ObjectRef::new("test2", "a"));
    assert!(entry.config_generation.matches(&json!("val-a")));
}

#[test]
fn test_import_from_sibling_and_parent_pass_through() {
    let mut fixture = Fixture::load();
    fixture.resolve("test2/b");

    let construction = fixture.construct("test2/c").unwrap();
    assert_eq!(values(&construction), json!({"c.a": "val-e", "c.b": "val-a"}));
    assert_eq!(
        construction.import_status.get_data("c.b").unwrap().source_ref,
        ObjectRef::new("test2", "b")
    );
    assert_eq!(
        construction.import_status.get_data("c.a").unwrap().source_ref,
        ObjectRef::new("test2", "e")
    );
}

#[test]
fn test_unresolved_parent_import_is_not_ready() {
    let fixture = Fixture::load();
    let err = fixture.construct("test2/c").unwrap_err();

    assert!(matches!(err, ImportError::ImportNotReady { ref import, .. } if import == "c.b"));
    assert!(err.is_retryable());
}

#[test]
fn test_root_static_data_with_local_schema() {
    let fixture = Fixture::load();
    let construction = fixture.construct("test1/root").unwrap();

    assert_eq!(values(&construction), json!({"root.a": "val-root-import"}));
    let entry = construction.import_status.get_data("root.a").unwrap();
    assert_eq!(entry.from, "ext.a");
    assert_eq!(entry.source_ref, ObjectRef::new("test1", "root"));
}

#[test]
fn test_pass_through_validated_with_blueprint_schema() {
    let mut fixture = Fixture::load();
    fixture.resolve("test1/root");

    let construction = fixture.construct("test1/a").unwrap();
    assert_eq!(values(&construction), json!({"a.a": "val-root-import"}));
}

#[test]
fn test_construction_is_deterministic() {
    let mut fixture = Fixture::load();
    fixture.resolve("test2/b");

    let first = fixture.construct("test2/c").unwrap();
    let second = fixture.construct("test2/c").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_recorded_construction_is_unchanged_on_next_pass() {
    let mut fixture = Fixture::load();
    let recorded = fixture.resolve("test2/b");

    let b = fixture.graph.get(&ObjectRef::new("test2", "b")).unwrap();
    assert_eq!(b.import_status(), &recorded.import_status);
    assert!(b.status.last_import_resolution.is_some());

    let next = fixture.construct("test2/b").unwrap();
    assert!(next.is_unchanged_from(b.import_status()));
}

#[test]
fn test_changed_export_makes_ledger_stale() {
    let mut fixture = Fixture::load();
    fixture.resolve("test2/b");

    fixture
        .graph
        .insert_export(&ObjectRef::new("test2", "a"), "a", ExportValue::Data(json!("val-a2")))
        .unwrap();
    let next = fixture.construct("test2/b").unwrap();

    let b = fixture.graph.get(&ObjectRef::new("test2", "b")).unwrap();
    assert!(!next.is_unchanged_from(b.import_status()));
    assert!(b
        .import_status()
        .is_stale(ImportType::Data, "b.a", &Fingerprint::from_json(&json!("val-a2"))));
}

// =============================================================================
// Pass-through Chains
// =============================================================================

#[test]
fn test_transitive_pass_through() {
    let graph = InstallationGraph::builder()
        .installation(
            Installation::new("test", "r")
                .import_data("r.x", "ext.x", None)
                .static_value("ext.x", json!({"replicas": 3}))
                .succeeded(),
        )
        .installation(
            Installation::new("test", "p")
                .with_parent("r")
                .import_data("p.x", "r.x", None)
                .succeeded(),
        )
        .installation(Installation::new("test", "c").with_parent("p").import_data("c.x", "p.x", None))
        .build()
        .unwrap();
    let mut fixture = Fixture::in_memory(graph);

    fixture.resolve("test/r");
    fixture.resolve("test/p");
    let construction = fixture.construct("test/c").unwrap();

    assert_eq!(construction.value("c.x"), Some(&json!({"replicas": 3})));
    assert_eq!(
        construction.import_status.get_data("c.x").unwrap().source_ref,
        ObjectRef::new("test", "p")
    );
}

#[test]
fn test_parent_value_changed_since_resolution_is_not_ready() {
    let mut parent = Installation::new("test", "p").import_data("p.x", "ext.x", None);
    parent.status.import_status.update(ImportStatusEntry {
        name: "p.x".to_string(),
        kind: ImportType::Data,
        from: "ext.x".to_string(),
        to: "p.x".to_string(),
        source_ref: ObjectRef::new("test", "p"),
        config_generation: Fingerprint::from_json(&json!("old")),
    });
    let graph = InstallationGraph::builder()
        .installation(parent)
        .installation(Installation::new("test", "c").with_parent("p").import_data("c.x", "p.x", None))
        .materialized_import(ObjectRef::new("test", "p"), ImportType::Data, "p.x", json!("new"))
        .build()
        .unwrap();

    let err = Fixture::in_memory(graph).construct("test/c").unwrap_err();
    assert!(is_import_not_ready_error(&err));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_schema_violation_returns_error_and_no_map() {
    let graph = InstallationGraph::builder()
        .installation(
            Installation::new("test1", "root")
                .import_data("root.a", "ext.a", None)
                .static_value("ext.a", json!(7)),
        )
        .installation(
            Installation::new("test1", "a")
                .with_parent("root")
                .import_data("a.a", "root.a", Some(json!({"type": "string"}))),
        )
        .build()
        .unwrap();
    let mut fixture = Fixture::in_memory(graph);
    fixture.resolve("test1/root");

    let outcome = ResolutionOutcome::from(fixture.construct("test1/a"));
    assert_eq!(outcome.state(), ResolutionState::Failed);
    assert!(outcome.construction().is_none());
    let err = outcome.error().unwrap();
    assert!(is_schema_validation_failed_error(err));
    assert!(err.to_string().contains("a.a"));
}

#[test]
fn test_unloadable_schema_ref() {
    let graph = InstallationGraph::builder()
        .installation(
            Installation::new("test", "a")
                .import_data("a.x", "x", Some(json!({"$ref": "local://missing"})))
                .static_value("x", json!("value")),
        )
        .build()
        .unwrap();

    let err = Fixture::in_memory(graph).construct("test/a").unwrap_err();
    assert!(is_schema_loader_error(&err));
    assert!(!err.is_retryable());
}

#[test]
fn test_malformed_blueprint_schema_is_a_loader_error() {
    let mut inst = Installation::new("test", "a")
        .import_data("a.bad", "x", Some(json!({"$ref": "blueprint://bad.json"})))
        .import_data("a.garbage", "x", Some(json!({"$ref": "blueprint://garbage.json"})))
        .static_value("x", json!("value"));
    inst.spec.blueprint = Some("broken".to_string());
    let mut fixture = Fixture::in_memory(InstallationGraph::builder().installation(inst).build().unwrap());
    fixture.blueprints.insert(
        "broken".to_string(),
        Blueprint::new().with_fs(
            MemoryFs::new()
                .with_file("bad.json", r#"{"type": 12}"#)
                .with_file("garbage.json", "{ not: [valid"),
        ),
    );

    let err = fixture.construct("test/a").unwrap_err();
    assert!(is_schema_loader_error(&err));
    assert!(!is_schema_validation_failed_error(&err));

    let messages: Vec<String> = err.into_errors().iter().map(ToString::to_string).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("blueprint://bad.json is not a valid JSON schema"));
    assert!(messages[1].contains("unable to parse schema blueprint://garbage.json"));
}

#[test]
fn test_target_import_from_sibling() {
    let fixture = {
        let exporter = Installation::new("test", "a")
            .export(ImportType::Target, "cluster", "dev-cluster")
            .succeeded();
        let importer = Installation::new("test", "b").import_target(
            "cluster",
            "dev-cluster",
            Some("landscaper.gardener.cloud/kubernetes-cluster".to_string()),
        );
        let graph = InstallationGraph::builder()
            .installation(exporter)
            .installation(importer)
            .target_export(
                ObjectRef::new("test", "a"),
                "dev-cluster",
                Target {
                    name: "dev-cluster".to_string(),
                    target_type: "landscaper.gardener.cloud/kubernetes-cluster".to_string(),
                    config: json!({"kubeconfig": "dev"}),
                },
            )
            .build()
            .unwrap();
        Fixture::in_memory(graph)
    };

    let construction = fixture.construct("test/b").unwrap();
    assert_eq!(construction.value("cluster").unwrap()["config"]["kubeconfig"], "dev");
    assert!(construction.import_status.get_target("cluster").is_ok());
    assert!(construction.import_status.get_data("cluster").is_err());
}

// =============================================================================
// Readiness and Resolution Failures
// =============================================================================

fn exporter(name: &str, phase: Phase) -> Installation {
    let mut inst = Installation::new("test", name).export(ImportType::Data, "out", "shared");
    inst.status.phase = phase;
    inst.status.observed_generation = inst.metadata.generation;
    inst
}

#[test]
fn test_sibling_not_succeeded_is_not_ready() {
    let graph = InstallationGraph::builder()
        .installation(exporter("a", Phase::Progressing))
        .installation(Installation::new("test", "b").import_data("b.x", "shared", None))
        .data_export(ObjectRef::new("test", "a"), "shared", json!(1))
        .build()
        .unwrap();

    let err = Fixture::in_memory(graph).construct("test/b").unwrap_err();
    assert!(is_import_not_ready_error(&err));
    assert!(err.to_string().contains("Progressing"));
}

#[test]
fn test_sibling_behind_its_generation_is_not_ready() {
    let mut stale = exporter("a", Phase::Succeeded);
    stale.metadata.generation = 2;
    let graph = InstallationGraph::builder()
        .installation(stale)
        .installation(Installation::new("test", "b").import_data("b.x", "shared", None))
        .data_export(ObjectRef::new("test", "a"), "shared", json!(1))
        .build()
        .unwrap();

    let err = Fixture::in_memory(graph).construct("test/b").unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn test_missing_export_value_is_not_ready() {
    let graph = InstallationGraph::builder()
        .installation(exporter("a", Phase::Succeeded))
        .installation(Installation::new("test", "b").import_data("b.x", "shared", None))
        .build()
        .unwrap();

    let err = Fixture::in_memory(graph).construct("test/b").unwrap_err();
    assert!(is_import_not_ready_error(&err));
}

#[test]
fn test_first_sibling_wins_when_several_export() {
    let graph = InstallationGraph::builder()
        .installation(exporter("a", Phase::Succeeded))
        .installation(exporter("z", Phase::Succeeded))
        .installation(Installation::new("test", "m").import_data("m.x", "shared", None))
        .data_export(ObjectRef::new("test", "a"), "shared", json!("from-a"))
        .data_export(ObjectRef::new("test", "z"), "shared", json!("from-z"))
        .build()
        .unwrap();

    let construction = Fixture::in_memory(graph).construct("test/m").unwrap();
    assert_eq!(construction.value("m.x"), Some(&json!("from-a")));
}

#[test]
fn test_not_found_suggests_similar_export() {
    let graph = InstallationGraph::builder()
        .installation(Installation::new("test", "a").export(ImportType::Data, "cfg", "db-config").succeeded())
        .installation(Installation::new("test", "b").import_data("b.db", "db-confg", None))
        .build()
        .unwrap();

    match Fixture::in_memory(graph).construct("test/b").unwrap_err() {
        ImportError::ImportNotFound { import, suggestion, .. } => {
            assert_eq!(import, "b.db");
            assert_eq!(suggestion.as_deref(), Some("db-config"));
        }
        other => panic!("expected not found, got {:?}", other),
    }
}

fn two_missing_imports() -> InstallationGraph {
    InstallationGraph::builder()
        .installation(
            Installation::new("test", "a")
                .import_data("a.first", "nowhere", None)
                .import_data("a.second", "nothing", None),
        )
        .build()
        .unwrap()
}

#[test]
fn test_failures_are_aggregated_by_default() {
    let err = Fixture::in_memory(two_missing_imports()).construct("test/a").unwrap_err();

    assert!(is_import_not_found_error(&err));
    let errors = err.into_errors();
    assert_eq!(errors.len(), 2);
}

#[test]
fn test_fail_fast_returns_first_failure() {
    let err = Fixture::in_memory(two_missing_imports())
        .construct_with("test/a", ConstructorOptions { fail_fast: true })
        .unwrap_err();

    assert!(matches!(err, ImportError::ImportNotFound { ref import, .. } if import == "a.first"));
}

#[test]
fn test_fatal_failure_wins_over_not_ready() {
    let graph = InstallationGraph::builder()
        .installation(exporter("a", Phase::Progressing))
        .installation(
            Installation::new("test", "b")
                .import_data("b.waiting", "shared", None)
                .import_data("b.missing", "nowhere", None),
        )
        .build()
        .unwrap();

    let err = Fixture::in_memory(graph).construct("test/b").unwrap_err();
    assert!(matches!(err, ImportError::ImportNotFound { ref import, .. } if import == "b.missing"));
    assert!(!err.is_retryable());
}
