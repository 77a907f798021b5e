//! Abstraction pipeline
//!
//! Crawled records → abstracted resources → dual-graph writes.
//!
//! # Workflow
//! 1. Resolve the tenant seed (failure is fatal)
//! 2. Skip malformed records (no id or no type), logging each one
//! 3. Abstract each record; an abstracted id claimed by two different real
//!    ids aborts the run before anything is written
//! 4. Write all triples in batches; partial failures land in the report

use crate::config::TwinConfig;
use crate::error::TwinError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use twin_graph::{abstract_record, DualGraphWriter, DualWrite, GraphStore, ResourceRecord, WriteReport, WriterConfig};
use twin_identity::{normalize_real_id, AbstractionError, IdentityAbstractor, SeedCache, SeedStore, TenantId, TenantSeed};

/// A record left out of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Real id as crawled (possibly empty)
    pub real_id: String,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of an abstraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbstractionReport {
    /// Tenant abstracted
    pub tenant_id: TenantId,
    /// Records received
    pub records_seen: usize,
    /// Malformed records
    pub skipped: Vec<SkippedRecord>,
    /// Records repeating an earlier real id
    pub duplicates: usize,
    /// Write outcome
    pub write: WriteReport,
}

impl AbstractionReport {
    /// Check if every well-formed record was written
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.write.is_complete()
    }
}

/// Abstracts and writes a tenant's crawled resources
#[derive(Debug, Clone)]
pub struct AbstractionPipeline {
    abstractor: IdentityAbstractor,
    store: Arc<dyn GraphStore>,
    writer_config: WriterConfig,
}

impl AbstractionPipeline {
    /// Create pipeline from parts
    #[inline]
    #[must_use]
    pub fn new(abstractor: IdentityAbstractor, store: Arc<dyn GraphStore>, writer_config: WriterConfig) -> Self {
        Self {
            abstractor,
            store,
            writer_config,
        }
    }

    /// Create pipeline from configuration
    #[must_use]
    pub fn from_config(config: &TwinConfig, seeds: Arc<dyn SeedStore>, store: Arc<dyn GraphStore>) -> Self {
        let cache = SeedCache::new(seeds, config.seeds.cache_capacity);
        let abstractor = IdentityAbstractor::new(cache, config.abstraction.clone());
        Self::new(abstractor, store, config.writer.clone())
    }

    /// Identity abstractor
    #[inline]
    #[must_use]
    pub fn abstractor(&self) -> &IdentityAbstractor {
        &self.abstractor
    }

    /// Abstract and write `records` for `tenant_id`
    ///
    /// # Errors
    /// - `TwinError::Abstraction` if the seed is unavailable or two real
    ///   ids collide (nothing is written in either case)
    ///
    /// Batch write failures are not errors; see [`WriteReport::failures`].
    pub async fn run(&self, tenant_id: &TenantId, records: Vec<ResourceRecord>) -> Result<AbstractionReport, TwinError> {
        let records_seen = records.len();
        tracing::info!(tenant_id = %tenant_id, records = records_seen, "abstraction started");

        let seed = self.abstractor.seed_for(tenant_id).await?;
        let prepared = self.prepare(&seed, records)?;

        let writer = DualGraphWriter::new(Arc::clone(&self.store), tenant_id.clone(), self.writer_config.clone());
        let write = writer.write_all(prepared.writes).await;

        let report = AbstractionReport {
            tenant_id: tenant_id.clone(),
            records_seen,
            skipped: prepared.skipped,
            duplicates: prepared.duplicates,
            write,
        };
        tracing::info!(
            tenant_id = %tenant_id,
            written = report.write.resources_written,
            skipped = report.skipped.len(),
            duplicates = report.duplicates,
            failed = report.write.resources_failed(),
            "abstraction finished"
        );
        Ok(report)
    }

    /// Abstract records without writing them
    ///
    /// # Errors
    /// Returns `AbstractionError::Collision` if two distinct real ids map
    /// to the same abstracted id.
    pub fn prepare(&self, seed: &TenantSeed, records: Vec<ResourceRecord>) -> Result<Prepared, AbstractionError> {
        let mut prepared = Prepared::default();
        let mut claimed: HashMap<String, String> = HashMap::with_capacity(records.len());

        for record in records {
            if !record.is_well_formed() {
                tracing::warn!(
                    real_id = %record.real_id,
                    resource_type = %record.resource_type,
                    "skipping malformed record"
                );
                prepared.skipped.push(SkippedRecord {
                    real_id: record.real_id,
                    reason: "missing id or type".to_string(),
                });
                continue;
            }

            let abstracted = match abstract_record(&self.abstractor, seed, &record) {
                Ok(abstracted) => abstracted,
                Err(AbstractionError::EmptyIdentifier | AbstractionError::EmptyType(_)) => {
                    prepared.skipped.push(SkippedRecord {
                        real_id: record.real_id,
                        reason: "missing id or type".to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let normalized = normalize_real_id(&record.real_id);
            if let Some(first) = claimed.get(&abstracted.abstracted_id) {
                if *first == normalized {
                    tracing::debug!(real_id = %record.real_id, "duplicate record, keeping first");
                    prepared.duplicates += 1;
                    continue;
                }
                tracing::error!(abstracted_id = %abstracted.abstracted_id, "abstracted id collision");
                return Err(AbstractionError::Collision {
                    abstracted_id: abstracted.abstracted_id,
                    first: first.clone(),
                    second: normalized,
                });
            }
            claimed.insert(abstracted.abstracted_id.clone(), normalized);
            prepared.writes.push(DualWrite::new(record, abstracted));
        }
        Ok(prepared)
    }
}

/// Abstracted writes ready for the writer
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    /// Triples to write
    pub writes: Vec<DualWrite>,
    /// Malformed records
    pub skipped: Vec<SkippedRecord>,
    /// Repeated real ids
    pub duplicates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_graph::InMemoryGraphStore;
    use twin_identity::MemorySeedStore;

    const ACCT: &str = "/subscriptions/S1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct1";

    fn pipeline() -> AbstractionPipeline {
        AbstractionPipeline::from_config(
            &TwinConfig::default(),
            Arc::new(MemorySeedStore::new()),
            Arc::new(InMemoryGraphStore::new()),
        )
    }

    #[test]
    fn prepare_skips_malformed_and_duplicates() {
        let seed = TenantSeed::new([3; 32]);
        let records = vec![
            ResourceRecord::new(ACCT, "Microsoft.Storage/storageAccounts"),
            ResourceRecord::new("", "Microsoft.Storage/storageAccounts"),
            ResourceRecord::new("/subscriptions/S1/x", ""),
            ResourceRecord::new(ACCT.to_uppercase(), "Microsoft.Storage/storageAccounts"),
        ];

        let prepared = pipeline().prepare(&seed, records).unwrap();
        assert_eq!(prepared.writes.len(), 1);
        assert_eq!(prepared.skipped.len(), 2);
        assert_eq!(prepared.duplicates, 1);
        assert!(prepared.writes[0].abstracted.abstracted_id.starts_with("storageaccounts-"));
    }
}
