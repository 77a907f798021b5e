//! Subcommand implementations

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use twin_core::{AbstractionPipeline, Reconciler, ReconciliationReport, TwinConfig};
use twin_graph::{GraphStore, InMemoryGraphStore, ResourceRecord};
use twin_identity::{FileSeedStore, SeedStore, TenantId};
use twin_reconcile::{CancellationToken, ClassificationState, TargetResource};

pub(crate) async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TwinConfig> {
    match path {
        Some(path) => TwinConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(TwinConfig::default()),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn open_snapshot(path: &Path) -> anyhow::Result<InMemoryGraphStore> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        InMemoryGraphStore::load(path)
            .await
            .with_context(|| format!("loading snapshot {}", path.display()))
    } else {
        Ok(InMemoryGraphStore::new())
    }
}

/// `twin abstract`
pub(crate) async fn run_abstract(
    config: &TwinConfig,
    tenant: &TenantId,
    input: &Path,
    snapshot: &Path,
) -> anyhow::Result<()> {
    let records: Vec<ResourceRecord> = read_json(input).await?;
    let store = Arc::new(open_snapshot(snapshot).await?);
    let seeds: Arc<dyn SeedStore> = Arc::new(FileSeedStore::new(&config.seeds.dir));

    let pipeline = AbstractionPipeline::from_config(config, seeds, store.clone());
    let report = pipeline.run(tenant, records).await?;
    store.save(snapshot).await?;

    println!(
        "abstracted {} of {} records for {} ({} skipped, {} duplicate)",
        report.write.resources_written,
        report.records_seen,
        tenant,
        report.skipped.len(),
        report.duplicates
    );
    if !report.is_complete() {
        anyhow::bail!(
            "{} batch(es) failed, {} resources not written; re-run to retry",
            report.write.failures.len(),
            report.write.resources_failed()
        );
    }
    Ok(())
}

/// Arguments of `twin reconcile`
#[derive(Debug, Clone)]
pub(crate) struct ReconcileOptions {
    pub(crate) tenant: TenantId,
    pub(crate) snapshot: PathBuf,
    pub(crate) target: PathBuf,
    pub(crate) target_subscription: Option<String>,
    pub(crate) output: Option<PathBuf>,
    pub(crate) plan: Option<PathBuf>,
}

/// `twin reconcile`
///
/// Ctrl-C cancels the run; the partial report is still written.
pub(crate) async fn run_reconcile(mut config: TwinConfig, options: ReconcileOptions) -> anyhow::Result<()> {
    if let Some(subscription) = options.target_subscription.clone() {
        config = config.with_target_subscription(subscription);
    }

    let store: Arc<dyn GraphStore> = Arc::new(
        InMemoryGraphStore::load(&options.snapshot)
            .await
            .with_context(|| format!("loading snapshot {}", options.snapshot.display()))?,
    );
    let targets: Vec<TargetResource> = read_json(&options.target).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling reconciliation");
            on_interrupt.cancel();
        }
    });

    let report = Reconciler::new(store, config)?
        .reconcile(&options.tenant, targets, cancel)
        .await?;

    print_summary(&report);
    if let Some(path) = &options.output {
        write_json(path, &report).await?;
    }
    if let Some(path) = &options.plan {
        write_json(path, &report.import_plan()).await?;
    }
    if report.cancelled {
        anyhow::bail!("reconciliation cancelled; report is partial");
    }
    Ok(())
}

fn print_summary(report: &ReconciliationReport) {
    println!("reconciliation for {}", report.tenant_id);
    for state in ClassificationState::ALL {
        println!("  {:<12} {}", state.as_str(), report.summary.count(state));
    }
    if report.summary.defaulted_to_new > 0 {
        println!("  ({} NEW by default: unresolvable ids)", report.summary.defaulted_to_new);
    }
    for warning in &report.warnings {
        println!("{:?}: {}", warning.severity, warning.message);
        for cause in &warning.likely_causes {
            println!("  - {cause}");
        }
        if !warning.suggested_query.is_empty() {
            println!("  query: {}", warning.suggested_query);
        }
        println!("  fix: {}", warning.remediation);
    }
}

/// `twin seed`
pub(crate) async fn run_seed(config: &TwinConfig, tenant: &TenantId) -> anyhow::Result<()> {
    let store = FileSeedStore::new(&config.seeds.dir);
    if store.load(tenant).await?.is_some() {
        println!("seed for {tenant} exists at {}", store.seed_path(tenant).display());
        return Ok(());
    }
    store.get_or_create(tenant).await?;
    println!("seed for {tenant} created at {}", store.seed_path(tenant).display());
    Ok(())
}
