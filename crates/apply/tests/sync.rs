#![forbid(unsafe_code)]

mod common;

use std::time::Duration;

use common::{definition, live, Call, FakeStore};
use ixsync_apply::{export, sync, validate, PlanOptions, SyncError, SyncOptions, NORMALIZE_INDEX_NAME};
use serde_json::json;

fn options(safe: bool, dry_run: bool) -> SyncOptions {
    SyncOptions {
        safe,
        dry_run,
        is_secure: false,
        plan: PlanOptions { settle_delay: Duration::ZERO, build_timeout: Duration::from_secs(1) },
    }
}

#[tokio::test]
async fn converged_cluster_reports_no_changes() {
    let store = FakeStore::new(vec![live("idx1", &["x:8091", "y:8091"], 1)]);
    let defs = vec![definition(json!({ "name": "idx1", "index_key": "`type`", "num_replica": 1 }))];
    let mut out = Vec::new();
    let outcome = sync(&store, defs, &options(false, false), &mut out).await.unwrap();
    assert_eq!(outcome.planned, 0);
    assert!(String::from_utf8(out).unwrap().contains("No index changes required."));
    assert!(store.mutating_calls().is_empty());
}

#[tokio::test]
async fn definitions_are_normalized_with_a_reserved_name() {
    let store = FakeStore::new(vec![]);
    let defs = vec![definition(json!({ "name": "idx1", "index_key": "`type`" }))];
    let mut out = Vec::new();
    sync(&store, defs, &options(false, true), &mut out).await.unwrap();
    match &store.calls()[0] {
        Call::Explain(s) => {
            assert!(s.contains(NORMALIZE_INDEX_NAME), "{}", s);
            assert!(!s.contains("WITH"), "{}", s);
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn dry_run_prints_without_executing() {
    let store = FakeStore::new(vec![live("old", &["a:8091"], 0)]);
    let defs = vec![
        definition(json!({ "name": "idx1", "index_key": "`type`" })),
        definition(json!({ "name": "old", "lifecycle": { "drop": true } })),
    ];
    let mut out = Vec::new();
    let outcome = sync(&store, defs, &options(false, true), &mut out).await.unwrap();
    assert_eq!(outcome.planned, 2);
    assert!(outcome.summary.is_none());
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("+ Create _default._default.idx1"), "{}", text);
    assert!(text.contains("- Drop _default._default.old"), "{}", text);
    assert!(store.mutating_calls().is_empty());
}

#[tokio::test]
async fn safe_mode_leaves_out_unsafe_mutations() {
    let store = FakeStore::new(vec![live("old", &["a:8091"], 0), live("idx2", &["a:8091"], 0)]).with_version(5, 5);
    let defs = vec![
        definition(json!({ "name": "idx1", "index_key": "`type`" })),
        definition(json!({ "name": "old", "lifecycle": { "drop": true } })),
        definition(json!({ "name": "idx2", "index_key": "`type`", "num_replica": 1 })),
    ];
    let mut out = Vec::new();
    let outcome = sync(&store, defs, &options(true, false), &mut out).await.unwrap();
    assert_eq!(outcome.planned, 1);
    assert_eq!(outcome.skipped_unsafe, 2);
    let calls = store.mutating_calls();
    assert!(calls.iter().any(|c| matches!(c, Call::Create(s) if s.contains("`idx1`"))));
    assert!(!calls.iter().any(|c| matches!(c, Call::Drop(_))));
}

#[tokio::test]
async fn rejected_definition_stops_before_any_change() {
    let store = FakeStore::new(vec![]);
    *store.explain_error.lock().unwrap() = Some("syntax error".to_string());
    let defs = vec![definition(json!({ "name": "idx1", "index_key": "`type`" }))];
    let mut out = Vec::new();
    let err = sync(&store, defs, &options(false, false), &mut out).await.unwrap_err();
    match err {
        SyncError::InvalidDefinition { name, .. } => assert_eq!(name, "idx1"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(store.mutating_calls().is_empty());
}

#[tokio::test]
async fn validate_only_contacts_the_store_when_given() {
    let store = FakeStore::new(vec![]);
    let mut defs = vec![definition(json!({ "name": "idx1", "index_key": "`type`" }))];
    validate::<FakeStore>(None, &mut defs).await.unwrap();
    assert!(store.calls().is_empty());
    validate(Some(&store), &mut defs).await.unwrap();
    assert_eq!(store.calls().len(), 1);
}

#[tokio::test]
async fn export_round_trips_through_sync() {
    let store = FakeStore::new(vec![live("idx1", &["a:8091"], 0), live("idx1_replica1", &["b:8091"], 0)]);
    let patches = export(&store).await.unwrap();
    assert_eq!(patches.len(), 1);

    let defs = patches
        .iter()
        .map(|p| ixsync_core::IndexDefinition::new(p, &ixsync_core::HookRegistry::new()).unwrap())
        .collect();
    let mut out = Vec::new();
    let outcome = sync(&store, defs, &options(false, false), &mut out).await.unwrap();
    assert_eq!(outcome.planned, 0);
}
