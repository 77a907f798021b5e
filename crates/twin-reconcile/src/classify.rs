//! Reconciliation classifier
//!
//! Decides, for every abstracted resource, whether its physical counterpart
//! exists in the target environment and whether it has drifted:
//!
//! 1. Resolve the original id: cached on the resource, else the derivation
//!    edge, else heuristic recovery, else the abstracted id itself
//! 2. Rewrite the subscription segment to the target subscription
//! 3. Look the result up (case-insensitive) in the [`TargetLookup`]
//! 4. EXACT_MATCH / DRIFTED on a hit, NEW on a miss
//!
//! Unmatched target entries become ORPHANED once every worker is done.
//!
//! # Degradation
//!
//! Classification never fails. A resource whose id cannot be resolved or
//! parsed is NEW with `defaulted = true`; the count surfaces in
//! [`ClassificationSummary::defaulted_to_new`].

use crate::drift::{DriftPolicy, PropertyDrift};
use crate::recover::HeuristicRecoverer;
use crate::target::{TargetLookup, TargetResource};
use dashmap::DashSet;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use twin_graph::{AbstractedResource, GraphStore, ResourceId, ResourceIdError};
use twin_identity::{TenantId, SUBSCRIPTION_PLACEHOLDER};

/// Reconciliation outcome for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationState {
    /// No physical counterpart in the target
    New,
    /// Counterpart exists and all compared fields agree
    ExactMatch,
    /// Counterpart exists with differing fields
    Drifted,
    /// Target resource with no abstracted counterpart
    Orphaned,
}

impl ClassificationState {
    /// All states, in report order
    pub const ALL: [Self; 4] = [Self::New, Self::ExactMatch, Self::Drifted, Self::Orphaned];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::ExactMatch => "EXACT_MATCH",
            Self::Drifted => "DRIFTED",
            Self::Orphaned => "ORPHANED",
        }
    }
}

impl Display for ClassificationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the original id was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum Resolution {
    /// Cached on the abstracted resource by an earlier run
    Cached(String),
    /// Read from the derivation edge
    Edge(String),
    /// Heuristically recovered from the abstracted id
    Recovered(String),
    /// Abstracted id used as-is
    AbstractedFallback(String),
    /// Nothing to go on
    Unresolved,
}

impl Resolution {
    /// Candidate original id, if any
    #[must_use]
    pub fn candidate(&self) -> Option<&str> {
        match self {
            Self::Cached(id) | Self::Edge(id) | Self::Recovered(id) | Self::AbstractedFallback(id) => Some(id),
            Self::Unresolved => None,
        }
    }

    /// Discriminant, for summaries
    #[must_use]
    pub const fn source(&self) -> ResolutionSource {
        match self {
            Self::Cached(_) => ResolutionSource::Cached,
            Self::Edge(_) => ResolutionSource::Edge,
            Self::Recovered(_) => ResolutionSource::Recovered,
            Self::AbstractedFallback(_) => ResolutionSource::AbstractedFallback,
            Self::Unresolved => ResolutionSource::Unresolved,
        }
    }
}

/// [`Resolution`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// See [`Resolution::Cached`]
    Cached,
    /// See [`Resolution::Edge`]
    Edge,
    /// See [`Resolution::Recovered`]
    Recovered,
    /// See [`Resolution::AbstractedFallback`]
    AbstractedFallback,
    /// See [`Resolution::Unresolved`]
    Unresolved,
}

impl ResolutionSource {
    /// All sources
    pub const ALL: [Self; 5] = [
        Self::Cached,
        Self::Edge,
        Self::Recovered,
        Self::AbstractedFallback,
        Self::Unresolved,
    ];
}

/// Classification of one resource (or one orphaned target)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceClassification {
    /// Source-side resource (absent for ORPHANED)
    pub abstracted: Option<AbstractedResource>,
    /// Target-side match (absent for NEW)
    pub target: Option<TargetResource>,
    /// Outcome
    pub classification: ClassificationState,
    /// Differing fields (DRIFTED only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift_details: Vec<PropertyDrift>,
    /// Original id resolution path
    pub resolution: Resolution,
    /// NEW because the id could not be resolved, not because the lookup missed
    #[serde(default)]
    pub defaulted: bool,
    /// Why the resource was defaulted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResourceClassification {
    fn new_resource(abstracted: AbstractedResource, resolution: Resolution) -> Self {
        Self {
            abstracted: Some(abstracted),
            target: None,
            classification: ClassificationState::New,
            drift_details: Vec::new(),
            resolution,
            defaulted: false,
            reason: None,
        }
    }

    fn defaulted(abstracted: AbstractedResource, resolution: Resolution, reason: impl Into<String>) -> Self {
        Self {
            defaulted: true,
            reason: Some(reason.into()),
            ..Self::new_resource(abstracted, resolution)
        }
    }

    fn matched(
        abstracted: AbstractedResource,
        target: TargetResource,
        resolution: Resolution,
        drift_details: Vec<PropertyDrift>,
    ) -> Self {
        let classification = if drift_details.is_empty() {
            ClassificationState::ExactMatch
        } else {
            ClassificationState::Drifted
        };
        Self {
            abstracted: Some(abstracted),
            target: Some(target),
            classification,
            drift_details,
            resolution,
            defaulted: false,
            reason: None,
        }
    }

    fn orphaned(target: TargetResource) -> Self {
        Self {
            abstracted: None,
            target: Some(target),
            classification: ClassificationState::Orphaned,
            drift_details: Vec::new(),
            resolution: Resolution::Unresolved,
            defaulted: false,
            reason: None,
        }
    }
}

/// Aggregate counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    /// Count per state (every state present, zero included)
    pub counts: BTreeMap<ClassificationState, usize>,
    /// Abstracted resources classified (excludes orphans)
    pub classified: usize,
    /// All classifications emitted
    pub total: usize,
    /// NEW results caused by unresolvable identifiers
    pub defaulted_to_new: usize,
    /// Resolution path breakdown over classified resources
    pub resolutions: BTreeMap<ResolutionSource, usize>,
}

impl ClassificationSummary {
    /// Count for one state
    #[inline]
    #[must_use]
    pub fn count(&self, state: ClassificationState) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    /// Recompute from a finished list
    #[must_use]
    pub fn from_classifications(classifications: &[ResourceClassification]) -> Self {
        let accumulator = SummaryAccumulator::default();
        for classification in classifications {
            accumulator.record(classification);
        }
        accumulator.snapshot()
    }
}

/// Lock-free per-run counters shared by all workers
#[derive(Debug, Default)]
struct SummaryAccumulator {
    states: [AtomicUsize; 4],
    resolutions: [AtomicUsize; 5],
    defaulted: AtomicUsize,
}

impl SummaryAccumulator {
    fn record(&self, classification: &ResourceClassification) {
        self.states[classification.classification as usize].fetch_add(1, Ordering::Relaxed);
        if classification.abstracted.is_some() {
            self.resolutions[classification.resolution.source() as usize].fetch_add(1, Ordering::Relaxed);
        }
        if classification.defaulted {
            self.defaulted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> ClassificationSummary {
        let counts: BTreeMap<_, _> = ClassificationState::ALL
            .into_iter()
            .map(|state| (state, self.states[state as usize].load(Ordering::Relaxed)))
            .collect();
        let resolutions: BTreeMap<_, _> = ResolutionSource::ALL
            .into_iter()
            .map(|source| (source, self.resolutions[source as usize].load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();
        let total = counts.values().sum();
        let classified = total - counts[&ClassificationState::Orphaned];
        ClassificationSummary {
            counts,
            classified,
            total,
            defaulted_to_new: self.defaulted.load(Ordering::Relaxed),
            resolutions,
        }
    }
}

/// Result of [`ReconciliationClassifier::classify_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRun {
    /// Classifications in input order, orphans last
    pub classifications: Vec<ResourceClassification>,
    /// Aggregate counts
    pub summary: ClassificationSummary,
    /// Run was cancelled; results are partial and the orphan pass skipped
    pub cancelled: bool,
}

/// Rewrite `id`'s subscription segment for the target environment
///
/// # Errors
/// Returns error if `id` is not a `/subscriptions/{id}/...` path.
pub fn normalize_for_target(id: &str, target_subscription: Option<&str>) -> Result<ResourceId, ResourceIdError> {
    let parsed = ResourceId::parse(id)?;
    Ok(match target_subscription {
        Some(subscription) => parsed.with_subscription(subscription),
        None => parsed,
    })
}

/// Parallel reconciliation classifier for one source tenant
#[derive(Debug, Clone)]
pub struct ReconciliationClassifier {
    store: Arc<dyn GraphStore>,
    tenant_id: TenantId,
    target_subscription: Option<String>,
    workers: usize,
    drift: DriftPolicy,
    recoverer: HeuristicRecoverer,
    placeholder: String,
}

impl ReconciliationClassifier {
    /// Create classifier reading derivation edges from `store`
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, tenant_id: TenantId) -> Self {
        Self {
            store,
            tenant_id,
            target_subscription: None,
            workers: default_workers(),
            drift: DriftPolicy::default(),
            recoverer: HeuristicRecoverer::default(),
            placeholder: SUBSCRIPTION_PLACEHOLDER.to_string(),
        }
    }

    /// With target subscription (ids keep their own subscription otherwise)
    #[inline]
    #[must_use]
    pub fn with_target_subscription(mut self, subscription: Option<String>) -> Self {
        self.target_subscription = subscription.filter(|s| !s.trim().is_empty());
        self
    }

    /// With worker count (at least one)
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// With drift policy
    #[inline]
    #[must_use]
    pub fn with_drift_policy(mut self, policy: DriftPolicy) -> Self {
        self.drift = policy;
        self
    }

    /// With heuristic recoverer
    #[inline]
    #[must_use]
    pub fn with_recoverer(mut self, recoverer: HeuristicRecoverer) -> Self {
        self.recoverer = recoverer;
        self
    }

    /// With subscription placeholder used in abstracted properties
    #[inline]
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// Source tenant
    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Worker count
    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Classify every resource against `lookup`, then emit orphans
    ///
    /// Resources are split into contiguous partitions, one tokio task each.
    /// Workers check `cancel` between resources; on cancellation the
    /// classifications made so far are returned and the orphan pass is
    /// skipped, since an unfinished run cannot tell orphans apart.
    pub async fn classify_all(
        &self,
        resources: Vec<AbstractedResource>,
        lookup: Arc<TargetLookup>,
        cancel: CancellationToken,
    ) -> ClassificationRun {
        let input_len = resources.len();
        tracing::info!(
            tenant = %self.tenant_id,
            resources = input_len,
            targets = lookup.len(),
            workers = self.workers,
            "classification started"
        );

        let this = Arc::new(self.clone());
        let consumed: Arc<DashSet<String>> = Arc::new(DashSet::new());
        let accumulator = Arc::new(SummaryAccumulator::default());

        let mut handles = Vec::with_capacity(self.workers);
        for (worker, partition) in partition(resources, self.workers).into_iter().enumerate() {
            let this = Arc::clone(&this);
            let lookup = Arc::clone(&lookup);
            let consumed = Arc::clone(&consumed);
            let accumulator = Arc::clone(&accumulator);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                this.run_partition(worker, partition, &lookup, &consumed, &accumulator, &cancel)
                    .await
            }));
        }

        let mut indexed = Vec::with_capacity(input_len);
        for handle in handles {
            match handle.await {
                Ok(mut results) => indexed.append(&mut results),
                Err(e) => tracing::error!(error = %e, "classification worker failed"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        let mut classifications: Vec<ResourceClassification> =
            indexed.into_iter().map(|(_, classification)| classification).collect();

        let cancelled = cancel.is_cancelled();
        if cancelled {
            tracing::warn!(
                classified = classifications.len(),
                of = input_len,
                "classification cancelled, orphan pass skipped"
            );
        } else {
            for key in lookup.sorted_keys() {
                if consumed.contains(key) {
                    continue;
                }
                if let Some(target) = lookup.get_normalized(key) {
                    let orphan = ResourceClassification::orphaned(target.clone());
                    accumulator.record(&orphan);
                    classifications.push(orphan);
                }
            }
        }

        let summary = accumulator.snapshot();
        tracing::info!(
            tenant = %self.tenant_id,
            new = summary.count(ClassificationState::New),
            exact = summary.count(ClassificationState::ExactMatch),
            drifted = summary.count(ClassificationState::Drifted),
            orphaned = summary.count(ClassificationState::Orphaned),
            defaulted = summary.defaulted_to_new,
            "classification finished"
        );

        ClassificationRun {
            classifications,
            summary,
            cancelled,
        }
    }

    async fn run_partition(
        &self,
        worker: usize,
        partition: Vec<(usize, AbstractedResource)>,
        lookup: &TargetLookup,
        consumed: &DashSet<String>,
        accumulator: &SummaryAccumulator,
        cancel: &CancellationToken,
    ) -> Vec<(usize, ResourceClassification)> {
        let mut results = Vec::with_capacity(partition.len());
        for (index, resource) in partition {
            if cancel.is_cancelled() {
                tracing::debug!(worker, "worker stopping on cancellation");
                break;
            }

            let outcome = AssertUnwindSafe(self.classify_one(&resource, lookup, consumed))
                .catch_unwind()
                .await;
            let classification = outcome.unwrap_or_else(|_| {
                tracing::error!(
                    worker,
                    abstracted_id = %resource.abstracted_id,
                    "classification panicked, defaulting to NEW"
                );
                ResourceClassification::defaulted(resource.clone(), Resolution::Unresolved, "classification failed")
            });

            accumulator.record(&classification);
            results.push((index, classification));
        }
        results
    }

    async fn classify_one(
        &self,
        resource: &AbstractedResource,
        lookup: &TargetLookup,
        consumed: &DashSet<String>,
    ) -> ResourceClassification {
        if resource.has_no_identifiers() {
            tracing::debug!(resource_type = %resource.resource_type, "resource has no identifiers");
            return ResourceClassification::defaulted(resource.clone(), Resolution::Unresolved, "no identifiers");
        }

        let resolution = self.resolve(resource).await;
        let Some(candidate) = resolution.candidate() else {
            return ResourceClassification::defaulted(resource.clone(), resolution, "original id unresolved");
        };

        let normalized = match normalize_for_target(candidate, self.target_subscription.as_deref()) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(
                    abstracted_id = %resource.abstracted_id,
                    candidate = %candidate,
                    error = %e,
                    "identifier not normalizable, defaulting to NEW"
                );
                return ResourceClassification::defaulted(resource.clone(), resolution, e.to_string());
            }
        };

        let key = normalized.lookup_key();
        let Some(target) = lookup.get_normalized(&key) else {
            return ResourceClassification::new_resource(with_resolved_id(resource, &resolution, false), resolution);
        };

        consumed.insert(key);
        let drift = self.drift.compare(resource, target, &self.placeholder);
        ResourceClassification::matched(
            with_resolved_id(resource, &resolution, true),
            target.clone(),
            resolution,
            drift,
        )
    }

    async fn resolve(&self, resource: &AbstractedResource) -> Resolution {
        if let Some(cached) = resource.original_id.as_deref().filter(|s| !s.trim().is_empty()) {
            return Resolution::Cached(cached.to_string());
        }

        let abstracted_id = resource.abstracted_id.trim();
        if abstracted_id.is_empty() {
            return Resolution::Unresolved;
        }

        match self.store.derivation_edge(&self.tenant_id, abstracted_id).await {
            Ok(Some(edge)) => return Resolution::Edge(edge.real_id),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                abstracted_id = %abstracted_id,
                error = %e,
                "derivation edge lookup failed, falling back"
            ),
        }

        match self.recoverer.try_recover(abstracted_id) {
            Some(recovered) => Resolution::Recovered(recovered),
            None => Resolution::AbstractedFallback(abstracted_id.to_string()),
        }
    }
}

/// Copy of `resource` with a trustworthy resolved id cached on it
///
/// Edge results are always cached; heuristic ones only once a target
/// lookup confirmed them.
fn with_resolved_id(resource: &AbstractedResource, resolution: &Resolution, confirmed: bool) -> AbstractedResource {
    let mut emitted = resource.clone();
    match resolution {
        Resolution::Edge(id) => emitted.original_id = Some(id.clone()),
        Resolution::Recovered(id) if confirmed => emitted.original_id = Some(id.clone()),
        _ => {}
    }
    emitted
}

/// Split into at most `workers` contiguous, index-tagged partitions
fn partition(resources: Vec<AbstractedResource>, workers: usize) -> Vec<Vec<(usize, AbstractedResource)>> {
    if resources.is_empty() {
        return Vec::new();
    }
    let chunk = resources.len().div_ceil(workers.max(1));
    let mut partitions: Vec<Vec<(usize, AbstractedResource)>> = Vec::with_capacity(workers);
    for (index, resource) in resources.into_iter().enumerate() {
        if index % chunk == 0 {
            partitions.push(Vec::with_capacity(chunk));
        }
        if let Some(current) = partitions.last_mut() {
            current.push((index, resource));
        }
    }
    partitions
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
}
