//! Target scan collection feeding the classifier, over a real dual graph

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use twin_graph::{abstract_record, DualGraphWriter, DualWrite, GraphStore, InMemoryGraphStore, WriterConfig};
use twin_identity::{AbstractionConfig, IdentityAbstractor, MemorySeedStore, SeedCache, TenantSeed};
use twin_reconcile::{
    build_lookup, CancellationToken, ClassificationState, ImportPlan, ReconciliationClassifier, ScanCollector,
    SummaryValidator, ValidatorConfig,
};
use twin_test_utils::{storage_records, target_for, tenant, StaticScanSource, TARGET_SUBSCRIPTION};

async fn graph_of(count: usize) -> (Arc<InMemoryGraphStore>, Vec<twin_graph::ResourceRecord>) {
    let abstractor = IdentityAbstractor::new(
        SeedCache::new(Arc::new(MemorySeedStore::new()), 4),
        AbstractionConfig::default(),
    );
    let seed = TenantSeed::new([7u8; 32]);
    let records = storage_records(count);
    let writes = records
        .iter()
        .map(|record| DualWrite::new(record.clone(), abstract_record(&abstractor, &seed, record).unwrap()))
        .collect();

    let store = Arc::new(InMemoryGraphStore::new());
    let writer = DualGraphWriter::new(store.clone(), tenant("contoso"), WriterConfig::new().with_batch_size(7));
    assert!(writer.write_all(writes).await.is_complete());
    (store, records)
}

#[tokio::test]
async fn scopes_are_scanned_in_parallel_and_merged() {
    let (_, records) = graph_of(9).await;
    let mut source = StaticScanSource::new().with_delay(Duration::from_millis(100));
    let mut scopes = Vec::new();
    for (i, chunk) in records.chunks(3).enumerate() {
        let scope = format!("/subscriptions/S2/resourceGroups/rg{i}");
        source = source.with_scope(&scope, chunk.iter().map(target_for).collect());
        scopes.push(scope);
    }

    let started = Instant::now();
    let outcome = ScanCollector::new(3).collect(Arc::new(source), scopes).await;

    assert!(started.elapsed() < Duration::from_millis(280));
    assert!(outcome.failed_scopes.is_empty());
    assert_eq!(outcome.resources.len(), 9);
    assert_eq!(outcome.resources[0].name, "acct0");
    assert_eq!(outcome.resources[8].name, "acct8");
}

#[tokio::test]
async fn scanned_targets_classify_into_every_state() {
    let (store, records) = graph_of(4).await;

    let mut drifted = target_for(&records[1]);
    drifted.tags.insert("env".to_string(), "dev".to_string());
    let stray = target_for(&twin_test_utils::storage_record("stray"));
    let targets = vec![target_for(&records[0]), drifted, stray];

    let source = StaticScanSource::new().with_scope("/subscriptions/S2", targets);
    let outcome = ScanCollector::default()
        .collect(Arc::new(source), vec!["/subscriptions/S2".to_string()])
        .await;
    let lookup = Arc::new(build_lookup(outcome.resources));

    let resources = store.abstracted_resources(&tenant("contoso")).await.unwrap();
    let run = ReconciliationClassifier::new(store, tenant("contoso"))
        .with_target_subscription(Some(TARGET_SUBSCRIPTION.to_string()))
        .with_workers(2)
        .classify_all(resources, lookup, CancellationToken::new())
        .await;

    let summary = &run.summary;
    assert_eq!(summary.count(ClassificationState::ExactMatch), 1);
    assert_eq!(summary.count(ClassificationState::Drifted), 1);
    assert_eq!(summary.count(ClassificationState::New), 2);
    assert_eq!(summary.count(ClassificationState::Orphaned), 1);
    assert_eq!(summary.total, 5);

    let drift = run
        .classifications
        .iter()
        .find(|c| c.classification == ClassificationState::Drifted)
        .unwrap();
    assert_eq!(drift.drift_details.len(), 1);
    assert_eq!(drift.drift_details[0].field, "tags.env");

    let plan = ImportPlan::from_classifications(&run.classifications);
    assert_eq!(plan.imports.len(), 2);
    assert_eq!(plan.creates.len(), 2);

    // 2 of 5 NEW stays under the default warning ratio
    let warnings = SummaryValidator::new(ValidatorConfig::default()).validate(&summary.counts, summary.total);
    assert!(warnings.is_empty());
}
