//! Abstraction followed by reconciliation, through the public API

use pretty_assertions::assert_eq;
use std::sync::Arc;
use twin_core::{AbstractionPipeline, Reconciler, TwinConfig, TwinError};
use twin_graph::{AbstractedResource, GraphStore, InMemoryGraphStore};
use twin_identity::{FileSeedStore, MemorySeedStore, SeedStore, SUBSCRIPTION_PLACEHOLDER};
use twin_reconcile::{CancellationToken, ClassificationState, Resolution, Severity};
use twin_test_utils::{
    storage_id, storage_record, storage_records, target_for, tenant, StaticScanSource, STORAGE_TYPE,
    TARGET_SUBSCRIPTION,
};

fn config() -> TwinConfig {
    TwinConfig::new().with_target_subscription(TARGET_SUBSCRIPTION).with_workers(4)
}

async fn abstracted_store(records: Vec<twin_graph::ResourceRecord>) -> Arc<InMemoryGraphStore> {
    let store = Arc::new(InMemoryGraphStore::new());
    let pipeline = AbstractionPipeline::from_config(&config(), Arc::new(MemorySeedStore::new()), store.clone());
    let report = pipeline.run(&tenant("contoso"), records).await.unwrap();
    assert!(report.is_complete());
    store
}

fn reconciler(store: Arc<InMemoryGraphStore>) -> Reconciler {
    Reconciler::new(store, config()).unwrap()
}

#[tokio::test]
async fn every_abstracted_node_has_its_edge() {
    let store = abstracted_store(storage_records(25)).await;
    let tenant = tenant("contoso");

    let counts = store.counts(&tenant).await.unwrap();
    assert_eq!((counts.originals, counts.abstracted, counts.edges), (25, 25, 25));

    for resource in store.abstracted_resources(&tenant).await.unwrap() {
        let edge = store.derivation_edge(&tenant, &resource.abstracted_id).await.unwrap();
        assert!(edge.is_some(), "missing edge for {}", resource.abstracted_id);
        assert!(resource.abstracted_id.starts_with("storageaccounts-"));
        assert_eq!(resource.subscription_id.as_deref(), Some(SUBSCRIPTION_PLACEHOLDER));
    }
}

#[tokio::test]
async fn same_resource_in_new_subscription_is_exact_match() {
    let record = storage_record("acct1");
    let target = target_for(&record);
    let store = abstracted_store(vec![record]).await;

    let report = reconciler(store)
        .reconcile(&tenant("contoso"), vec![target], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.classifications.len(), 1);
    let only = &report.classifications[0];
    assert_eq!(only.classification, ClassificationState::ExactMatch);
    assert_eq!(only.resolution, Resolution::Edge(storage_id("S1", "acct1")));
    assert!(report.warnings.is_empty());
    assert_eq!(report.import_plan().imports.len(), 1);
}

#[tokio::test]
async fn changed_location_is_drifted() {
    let record = storage_record("acct1");
    let mut target = target_for(&record);
    target.location = Some("westus".to_string());
    let store = abstracted_store(vec![record]).await;

    let report = reconciler(store)
        .reconcile(&tenant("contoso"), vec![target], CancellationToken::new())
        .await
        .unwrap();

    let only = &report.classifications[0];
    assert_eq!(only.classification, ClassificationState::Drifted);
    assert_eq!(only.drift_details.len(), 1);
    assert_eq!(only.drift_details[0].field, "location");
}

#[tokio::test]
async fn unclaimed_target_is_orphaned() {
    let record = storage_record("acct1");
    let matched = target_for(&record);
    let stray = target_for(&storage_record("stray"));
    let store = abstracted_store(vec![record]).await;

    let report = reconciler(store)
        .reconcile(&tenant("contoso"), vec![matched, stray], CancellationToken::new())
        .await
        .unwrap();

    let orphans: Vec<_> = report.in_state(ClassificationState::Orphaned).collect();
    assert_eq!(orphans.len(), 1);
    assert_eq!(
        orphans[0].target.as_ref().and_then(|t| t.id.clone()),
        Some(storage_id(TARGET_SUBSCRIPTION, "stray"))
    );
}

#[tokio::test]
async fn malformed_original_id_degrades_to_new() {
    let store = Arc::new(InMemoryGraphStore::new());
    let tenant = tenant("contoso");
    store.insert_unlinked(
        &tenant,
        AbstractedResource::new("storageaccounts-00aa00aa00aa00aa", STORAGE_TYPE).with_original_id("not-a-valid-id"),
    );

    let report = reconciler(store)
        .reconcile(&tenant, Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    let only = &report.classifications[0];
    assert_eq!(only.classification, ClassificationState::New);
    assert!(only.defaulted);
    assert_eq!(report.summary.defaulted_to_new, 1);
}

#[tokio::test]
async fn lost_edge_is_recovered_from_suffix() {
    let store = Arc::new(InMemoryGraphStore::new());
    let tenant = tenant("contoso");
    let legacy_id = storage_id("S1", "my_acct_a1b2c3_d4e5f6");
    store.insert_unlinked(&tenant, AbstractedResource::new(legacy_id, STORAGE_TYPE));

    let mut target = target_for(&storage_record("my-acct"));
    target.location = None;
    target.tags.clear();
    target.properties = twin_identity::Value::Null;

    let report = reconciler(store)
        .reconcile(&tenant, vec![target], CancellationToken::new())
        .await
        .unwrap();

    let only = &report.classifications[0];
    assert_eq!(only.classification, ClassificationState::ExactMatch);
    assert_eq!(only.resolution, Resolution::Recovered(storage_id("S1", "my-acct")));
}

#[tokio::test]
async fn mostly_new_run_is_flagged() {
    let records = storage_records(100);
    let targets = records.iter().take(40).map(target_for).collect();
    let store = abstracted_store(records).await;

    let report = reconciler(store)
        .reconcile(&tenant("contoso"), targets, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.count(ClassificationState::New), 60);
    assert_eq!(report.summary.count(ClassificationState::ExactMatch), 40);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].severity, Severity::Warning);
}

#[tokio::test]
async fn mostly_matched_run_is_not_flagged() {
    let records = storage_records(100);
    let targets = records.iter().take(70).map(target_for).collect();
    let store = abstracted_store(records).await;

    let report = reconciler(store)
        .reconcile(&tenant("contoso"), targets, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.count(ClassificationState::New), 30);
    assert!(report.warnings.is_empty());
    assert_eq!(report.import_plan().creates.len(), 30);
}

#[tokio::test]
async fn abstraction_is_deterministic_per_tenant_and_isolated_across_tenants() {
    let dir = tempfile::tempdir().unwrap();
    let run = |tenant_name: &'static str| {
        let dir = dir.path().to_path_buf();
        async move {
            let store = Arc::new(InMemoryGraphStore::new());
            let seeds: Arc<dyn SeedStore> = Arc::new(FileSeedStore::new(dir));
            let pipeline = AbstractionPipeline::from_config(&config(), seeds, store.clone());
            pipeline.run(&tenant(tenant_name), vec![storage_record("acct1")]).await.unwrap();
            store.abstracted_resources(&tenant(tenant_name)).await.unwrap()[0].abstracted_id.clone()
        }
    };

    let first = run("contoso").await;
    let again = run("contoso").await;
    let other = run("fabrikam").await;

    assert_eq!(first, again);
    assert_ne!(first, other);
}

#[tokio::test]
async fn concurrent_first_use_commits_one_seed() {
    let dir = tempfile::tempdir().unwrap();
    let seeds: Arc<dyn SeedStore> = Arc::new(FileSeedStore::new(dir.path()));
    let tenant = tenant("contoso");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = AbstractionPipeline::from_config(&config(), seeds.clone(), Arc::new(InMemoryGraphStore::new()));
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            pipeline.abstractor().abstract_id(&tenant, &storage_id("S1", "acct1"), STORAGE_TYPE).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn snapshot_survives_process_boundary() {
    let record = storage_record("acct1");
    let target = target_for(&record);
    let store = abstracted_store(vec![record]).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    store.save(&path).await.unwrap();
    let reloaded = Arc::new(InMemoryGraphStore::load(&path).await.unwrap());

    let report = reconciler(reloaded)
        .reconcile(&tenant("contoso"), vec![target], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.summary.count(ClassificationState::ExactMatch), 1);
}

#[tokio::test]
async fn failed_scan_scope_is_reported() {
    let record = storage_record("acct1");
    let target = target_for(&record);
    let store = abstracted_store(vec![record]).await;
    let source = StaticScanSource::new()
        .with_scope("/subscriptions/S2", vec![target])
        .with_failing_scope("/subscriptions/S3", "403 Forbidden");

    let report = reconciler(store)
        .reconcile_scan(
            &tenant("contoso"),
            Arc::new(source),
            vec!["/subscriptions/S2".to_string(), "/subscriptions/S3".to_string()],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.summary.count(ClassificationState::ExactMatch), 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].severity, Severity::Critical);
    assert!(report.warnings[0].message.contains("/subscriptions/S3"));
}

#[tokio::test]
async fn cancelled_run_returns_partial_report() {
    let store = abstracted_store(storage_records(10)).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = reconciler(store)
        .reconcile(&tenant("contoso"), Vec::new(), cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.classifications.is_empty());
    assert!(report.warnings.is_empty());
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let mut config = config();
    config.reconcile.recovery_suffix_pattern = "(".to_string();
    let err = Reconciler::new(Arc::new(InMemoryGraphStore::new()), config).unwrap_err();
    assert!(matches!(err, TwinError::Config(_)));
    assert!(err.is_fatal());
}
