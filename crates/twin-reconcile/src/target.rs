//! Target environment scan
//!
//! - [`TargetResource`]: one resource found in the target environment
//! - [`TargetLookup`]: case-insensitive id → resource map, built once per run
//! - [`ScanCollector`]: drives a [`TargetScanSource`] over many scopes with
//!   bounded parallelism

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use twin_graph::{canonical_key, subscription_of, Tags};
use twin_identity::Value;

/// One physical resource in the target environment
///
/// Rebuilt for every reconciliation run; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResource {
    /// Provider resource path (entries without one are skipped)
    #[serde(default)]
    pub id: Option<String>,
    /// Provider/type string
    #[serde(rename = "type", default)]
    pub resource_type: String,
    /// Resource name
    #[serde(default)]
    pub name: String,
    /// Region
    #[serde(default)]
    pub location: Option<String>,
    /// Resource group name
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Subscription id
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Properties
    #[serde(default)]
    pub properties: Value,
    /// Tags
    #[serde(default)]
    pub tags: Tags,
}

impl TargetResource {
    /// Create target resource with id and type
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            resource_type: resource_type.into(),
            name: String::new(),
            location: None,
            resource_group: None,
            subscription_id: None,
            properties: Value::Null,
            tags: Tags::new(),
        }
    }

    /// With location
    #[inline]
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// With tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// With properties
    #[inline]
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Id, if present and non-blank
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Subscription: explicit field, else parsed from the id
    #[must_use]
    pub fn effective_subscription(&self) -> Option<String> {
        self.subscription_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.id().and_then(subscription_of))
    }
}

/// Case-insensitive lookup over a target scan
///
/// Built once and shared read-only between classification workers.
#[derive(Debug, Clone, Default)]
pub struct TargetLookup {
    entries: HashMap<String, TargetResource>,
    skipped: usize,
}

impl TargetLookup {
    /// Resource for an id (any casing, surrounding whitespace and empty
    /// path segments ignored)
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TargetResource> {
        self.entries.get(&canonical_key(id))
    }

    /// Resource for an already normalized key
    #[inline]
    #[must_use]
    pub fn get_normalized(&self, key: &str) -> Option<&TargetResource> {
        self.entries.get(key)
    }

    /// Number of usable entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries rejected while building (missing id or duplicate)
    #[inline]
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Normalized keys in sorted order
    #[must_use]
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Build the lookup for a target scan
///
/// Entries with a null or blank id are logged and skipped. For duplicate
/// ids the first entry wins.
#[must_use]
pub fn build_lookup(target_resources: Vec<TargetResource>) -> TargetLookup {
    let mut lookup = TargetLookup::default();
    for resource in target_resources {
        let Some(id) = resource.id() else {
            tracing::warn!(
                resource_type = %resource.resource_type,
                name = %resource.name,
                "skipping target resource without id"
            );
            lookup.skipped += 1;
            continue;
        };
        let key = canonical_key(id);
        if lookup.entries.contains_key(&key) {
            tracing::warn!(id = %id, "skipping duplicate target resource");
            lookup.skipped += 1;
            continue;
        }
        lookup.entries.insert(key, resource);
    }
    tracing::debug!(entries = lookup.len(), skipped = lookup.skipped, "target lookup built");
    lookup
}

/// Target environment scan collaborator
///
/// Handles authentication and pagination for one scope (a subscription or
/// resource group path).
#[async_trait]
pub trait TargetScanSource: Send + Sync {
    /// All resources in `scope`
    async fn scan(&self, scope: &str) -> Result<Vec<TargetResource>, ScanError>;
}

/// Merged result of a multi-scope scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Resources from every successful scope
    pub resources: Vec<TargetResource>,
    /// Scopes that failed, with the error text
    pub failed_scopes: Vec<(String, String)>,
}

/// Bounded-parallel scan driver
#[derive(Debug, Clone)]
pub struct ScanCollector {
    max_concurrency: usize,
}

impl ScanCollector {
    /// Default in-flight scope limit
    pub const DEFAULT_MAX_CONCURRENCY: usize = 20;

    /// Create collector with an in-flight limit
    #[inline]
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Scan every scope, at most `max_concurrency` at a time
    ///
    /// A failed scope is reported in [`ScanOutcome::failed_scopes`] and does
    /// not abort the others.
    pub async fn collect(
        &self,
        source: Arc<dyn TargetScanSource>,
        scopes: Vec<String>,
    ) -> ScanOutcome {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, scope) in scopes.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let source = Arc::clone(&source);
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => source.scan(&scope).await,
                    Err(_) => Err(ScanError::Aborted),
                };
                (index, scope, result)
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => finished.push(entry),
                Err(e) => tracing::error!(error = %e, "scan task failed"),
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut outcome = ScanOutcome::default();
        for (_, scope, result) in finished {
            match result {
                Ok(mut resources) => {
                    tracing::debug!(scope = %scope, count = resources.len(), "scope scanned");
                    outcome.resources.append(&mut resources);
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "scope scan failed");
                    outcome.failed_scopes.push((scope, e.to_string()));
                }
            }
        }
        outcome
    }
}

impl Default for ScanCollector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CONCURRENCY)
    }
}

/// Target scan errors
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Collaborator failed for a scope
    #[error("scan failed: {0}")]
    Failed(String),

    /// Scan aborted before it started
    #[error("scan aborted")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ACCT: &str =
        "/subscriptions/S2/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct1";

    #[test]
    fn lookup_is_case_insensitive() {
        let lookup = build_lookup(vec![TargetResource::new(ACCT, "Microsoft.Storage/storageAccounts")]);
        assert!(lookup.get(&ACCT.to_uppercase()).is_some());
        assert!(lookup.get(&format!("  {ACCT}  ")).is_some());
        assert_eq!(lookup.len(), 1);
    }

    #[test]
    fn lookup_ignores_stray_slashes() {
        let sloppy = format!("{}/", ACCT.replace("/resourceGroups", "//resourceGroups"));
        let lookup = build_lookup(vec![TargetResource::new(sloppy, "Microsoft.Storage/storageAccounts")]);
        assert!(lookup.get(ACCT).is_some());
        assert_eq!(lookup.sorted_keys(), vec![ACCT.to_lowercase().as_str()]);
    }

    #[test]
    fn lookup_skips_missing_ids_and_duplicates() {
        let mut no_id = TargetResource::new("", "t");
        no_id.id = None;
        let lookup = build_lookup(vec![
            no_id,
            TargetResource::new("   ", "t"),
            TargetResource::new(ACCT, "first"),
            TargetResource::new(ACCT.to_lowercase(), "second"),
        ]);

        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.skipped(), 3);
        assert_eq!(lookup.get(ACCT).unwrap().resource_type, "first");
    }

    #[test]
    fn target_deserializes_null_id() {
        let resource: TargetResource =
            serde_json::from_str(r#"{"id": null, "type": "Microsoft.Web/sites", "name": "x"}"#).unwrap();
        assert!(resource.id().is_none());
        assert_eq!(resource.resource_type, "Microsoft.Web/sites");
    }

    #[test]
    fn effective_subscription_falls_back_to_id() {
        let resource = TargetResource::new(ACCT, "t");
        assert_eq!(resource.effective_subscription().as_deref(), Some("S2"));
    }

    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TargetScanSource for SlowSource {
        async fn scan(&self, scope: &str) -> Result<Vec<TargetResource>, ScanError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if scope.ends_with("broken") {
                return Err(ScanError::Failed("403".to_string()));
            }
            Ok(vec![TargetResource::new(format!("{scope}/r"), "t")])
        }
    }

    #[tokio::test]
    async fn collector_bounds_concurrency_and_reports_failures() {
        let source = Arc::new(SlowSource {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut scopes: Vec<String> = (0..12).map(|i| format!("/subscriptions/s{i}")).collect();
        scopes.push("/subscriptions/broken".to_string());

        let outcome = ScanCollector::new(3).collect(source.clone(), scopes).await;

        assert_eq!(outcome.resources.len(), 12);
        assert_eq!(outcome.failed_scopes.len(), 1);
        assert_eq!(outcome.failed_scopes[0].0, "/subscriptions/broken");
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(outcome.resources[0].id(), Some("/subscriptions/s0/r"));
    }
}
