//! Reconciliation run
//!
//! Loads a tenant's abstracted resources from the graph store, classifies
//! them against a target scan, and attaches validator warnings.

use crate::config::TwinConfig;
use crate::error::TwinError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use twin_graph::GraphStore;
use twin_identity::TenantId;
use twin_reconcile::{
    build_lookup, CancellationToken, ClassificationState, ClassificationSummary, ImportPlan,
    ReconciliationClassifier, ResourceClassification, ScanCollector, Severity, SummaryValidator,
    TargetResource, TargetScanSource, ValidationWarning,
};

/// Everything a reconciliation run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Source tenant
    pub tenant_id: TenantId,
    /// Subscription ids were rewritten to (if any)
    pub target_subscription_id: Option<String>,
    /// When the run finished
    pub generated_at: DateTime<Utc>,
    /// Per-resource results, input order, orphans last
    pub classifications: Vec<ResourceClassification>,
    /// Aggregate counts
    pub summary: ClassificationSummary,
    /// Validator and scan warnings
    pub warnings: Vec<ValidationWarning>,
    /// Run was cancelled; results are partial
    pub cancelled: bool,
}

impl ReconciliationReport {
    /// Import/create directives for deployment
    #[must_use]
    pub fn import_plan(&self) -> ImportPlan {
        ImportPlan::from_classifications(&self.classifications)
    }

    /// Classifications in one state
    pub fn in_state(&self, state: ClassificationState) -> impl Iterator<Item = &ResourceClassification> {
        self.classifications.iter().filter(move |c| c.classification == state)
    }
}

/// Runs reconciliation for source tenants
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<dyn GraphStore>,
    config: TwinConfig,
    validator: SummaryValidator,
}

impl Reconciler {
    /// Create reconciler over a graph store
    ///
    /// # Errors
    /// Returns `TwinError::Config` if the configuration is invalid.
    pub fn new(store: Arc<dyn GraphStore>, config: TwinConfig) -> Result<Self, TwinError> {
        config.validate()?;
        Ok(Self {
            store,
            validator: SummaryValidator::new(config.validator),
            config,
        })
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    fn classifier(&self, tenant_id: &TenantId) -> Result<ReconciliationClassifier, TwinError> {
        let mut classifier = ReconciliationClassifier::new(Arc::clone(&self.store), tenant_id.clone())
            .with_target_subscription(self.config.reconcile.target_subscription_id.clone())
            .with_drift_policy(self.config.drift_policy())
            .with_recoverer(self.config.recoverer()?)
            .with_placeholder(self.config.abstraction.subscription_placeholder.clone());
        if let Some(workers) = self.config.reconcile.workers {
            classifier = classifier.with_workers(workers);
        }
        Ok(classifier)
    }

    /// Reconcile `tenant_id` against an already collected target scan
    ///
    /// # Errors
    /// Returns `TwinError::Store` if the abstracted resources cannot be
    /// loaded. Per-resource problems never fail the run.
    pub async fn reconcile(
        &self,
        tenant_id: &TenantId,
        targets: Vec<TargetResource>,
        cancel: CancellationToken,
    ) -> Result<ReconciliationReport, TwinError> {
        let resources = self.store.abstracted_resources(tenant_id).await?;
        let lookup = Arc::new(build_lookup(targets));
        let skipped_targets = lookup.skipped();

        let run = self
            .classifier(tenant_id)?
            .classify_all(resources, lookup, cancel)
            .await;

        let mut warnings = Vec::new();
        if run.cancelled {
            tracing::warn!(tenant_id = %tenant_id, "reconciliation cancelled, report is partial");
        } else {
            warnings.extend(self.validator.validate(&run.summary.counts, run.summary.classified));
        }
        if skipped_targets > 0 {
            warnings.push(skipped_targets_warning(skipped_targets));
        }

        Ok(ReconciliationReport {
            tenant_id: tenant_id.clone(),
            target_subscription_id: self.config.reconcile.target_subscription_id.clone(),
            generated_at: Utc::now(),
            classifications: run.classifications,
            summary: run.summary,
            warnings,
            cancelled: run.cancelled,
        })
    }

    /// Scan `scopes` through `source`, then reconcile
    ///
    /// Failed scopes are reported as warnings: their resources would
    /// otherwise show up as NEW.
    ///
    /// # Errors
    /// See [`Reconciler::reconcile`].
    pub async fn reconcile_scan(
        &self,
        tenant_id: &TenantId,
        source: Arc<dyn TargetScanSource>,
        scopes: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ReconciliationReport, TwinError> {
        let outcome = ScanCollector::new(self.config.scan.max_concurrency)
            .collect(source, scopes)
            .await;

        let mut report = self.reconcile(tenant_id, outcome.resources, cancel).await?;
        if !outcome.failed_scopes.is_empty() {
            report.warnings.push(failed_scopes_warning(&outcome.failed_scopes));
        }
        Ok(report)
    }
}

fn skipped_targets_warning(skipped: usize) -> ValidationWarning {
    ValidationWarning {
        severity: Severity::Warning,
        message: format!("{skipped} target resource(s) skipped for missing or duplicate ids"),
        likely_causes: vec!["target scan returned partial records".to_string()],
        suggested_query: "jq '[.[] | select(.id == null or .id == \"\")] | length' target.json".to_string(),
        remediation: "Inspect the target scan output; skipped entries can never match.".to_string(),
    }
}

fn failed_scopes_warning(failed: &[(String, String)]) -> ValidationWarning {
    let scopes: Vec<&str> = failed.iter().map(|(scope, _)| scope.as_str()).collect();
    ValidationWarning {
        severity: Severity::Critical,
        message: format!("{} scope(s) failed to scan: {}", failed.len(), scopes.join(", ")),
        likely_causes: failed.iter().map(|(scope, error)| format!("{scope}: {error}")).collect(),
        suggested_query: String::new(),
        remediation: "Check credentials and permissions for the failed scopes, then re-run.".to_string(),
    }
}
