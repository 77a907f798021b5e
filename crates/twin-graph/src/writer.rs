//! Dual-graph writer
//!
//! Persists original node, abstracted node and derivation edge as one unit.
//! Writes are grouped into batches; each batch gets a timeout and is retried
//! wholesale with exponential backoff, so an edge is present only when its
//! batch was fully written.

use crate::model::{AbstractedResource, DualWrite, ResourceRecord};
use crate::store::{GraphStore, StoreError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use twin_identity::TenantId;

/// Writer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Triples per batch
    pub batch_size: usize,
    /// Per-attempt batch timeout in milliseconds
    pub batch_timeout_ms: u64,
    /// Attempts per batch (including the first)
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubled per attempt
    pub initial_backoff_ms: u64,
    /// Batches in flight at once
    pub max_concurrent_batches: usize,
}

impl WriterConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With attempts and initial backoff
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, initial_backoff_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    /// With batch timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, batch_timeout_ms: u64) -> Self {
        self.batch_timeout_ms = batch_timeout_ms;
        self
    }

    /// Backoff before attempt `attempt` (1-based; none before the first)
    #[must_use]
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_timeout_ms: 30_000,
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_concurrent_batches: 4,
        }
    }
}

/// A batch that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Batch position in the input
    pub index: usize,
    /// Triples in the batch
    pub resources: usize,
    /// Attempts made
    pub attempts: u32,
    /// Last error
    pub error: String,
}

/// Outcome of a multi-batch write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Batches committed
    pub batches_committed: usize,
    /// Triples committed
    pub resources_written: usize,
    /// Batches that failed after all attempts
    pub failures: Vec<BatchFailure>,
}

impl WriteReport {
    /// Check if every batch committed
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Triples not written
    #[inline]
    #[must_use]
    pub fn resources_failed(&self) -> usize {
        self.failures.iter().map(|f| f.resources).sum()
    }
}

/// Writes dual-graph triples for one tenant
#[derive(Debug, Clone)]
pub struct DualGraphWriter {
    store: Arc<dyn GraphStore>,
    tenant_id: TenantId,
    config: WriterConfig,
}

impl DualGraphWriter {
    /// Create writer for a tenant
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, tenant_id: TenantId, config: WriterConfig) -> Self {
        Self {
            store,
            tenant_id,
            config,
        }
    }

    /// Tenant written to
    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Persist one original/abstracted pair and its edge
    ///
    /// # Errors
    /// - `WriteError::InvalidRecord` for pairs without identifiers
    /// - `WriteError::Exhausted` once retries are used up
    pub async fn write(
        &self,
        record: ResourceRecord,
        abstracted: AbstractedResource,
    ) -> Result<(), WriteError> {
        let batch = [DualWrite::new(record, abstracted)];
        validate(&batch)?;
        self.commit_batch(0, &batch).await.map(|_| ())
    }

    /// Persist many pairs in bounded-parallel batches
    ///
    /// A failed batch does not stop the others; it is reported in
    /// [`WriteReport::failures`].
    pub async fn write_all(&self, writes: Vec<DualWrite>) -> WriteReport {
        let batch_size = self.config.batch_size.max(1);
        let mut batches: Vec<Vec<DualWrite>> = Vec::with_capacity(writes.len() / batch_size + 1);
        let mut iter = writes.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(batch_size).collect());
        }

        let outcomes: Vec<(usize, usize, Result<u32, WriteError>)> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| async move {
                let size = batch.len();
                let result = match validate(&batch) {
                    Ok(()) => self.commit_batch(index, &batch).await,
                    Err(e) => Err(e),
                };
                (index, size, result)
            })
            .buffer_unordered(self.config.max_concurrent_batches.max(1))
            .collect()
            .await;

        let mut report = WriteReport::default();
        for (index, size, result) in outcomes {
            match result {
                Ok(_) => {
                    report.batches_committed += 1;
                    report.resources_written += size;
                }
                Err(e) => report.failures.push(BatchFailure {
                    index,
                    resources: size,
                    attempts: e.attempts(),
                    error: e.to_string(),
                }),
            }
        }
        report.failures.sort_by_key(|f| f.index);

        tracing::info!(
            tenant_id = %self.tenant_id,
            batches = report.batches_committed,
            resources = report.resources_written,
            failed_batches = report.failures.len(),
            "dual-graph write finished"
        );
        report
    }

    /// Commit one batch with timeout and retry; returns attempts used
    async fn commit_batch(&self, index: usize, batch: &[DualWrite]) -> Result<u32, WriteError> {
        let timeout = Duration::from_millis(self.config.batch_timeout_ms);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let backoff = self.config.backoff_before(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }

            let error = match tokio::time::timeout(timeout, self.store.write_batch(&self.tenant_id, batch)).await {
                Ok(Ok(())) => {
                    tracing::debug!(tenant_id = %self.tenant_id, batch = index, attempt, size = batch.len(), "batch committed");
                    return Ok(attempt);
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    tracing::error!(tenant_id = %self.tenant_id, batch = index, error = %e, "batch rejected");
                    return Err(WriteError::Rejected {
                        attempts: attempt,
                        source: e,
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}ms", self.config.batch_timeout_ms),
            };

            if attempt >= max_attempts {
                tracing::error!(tenant_id = %self.tenant_id, batch = index, attempts = attempt, error = %error, "batch failed");
                return Err(WriteError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            tracing::warn!(tenant_id = %self.tenant_id, batch = index, attempt, error = %error, "batch write failed, retrying");
        }
    }
}

fn validate(batch: &[DualWrite]) -> Result<(), WriteError> {
    for write in batch {
        if write.original.real_id.trim().is_empty() {
            return Err(WriteError::InvalidRecord("empty real_id".to_string()));
        }
        if write.abstracted.abstracted_id.trim().is_empty() {
            return Err(WriteError::InvalidRecord(format!(
                "empty abstracted_id for {}",
                write.original.real_id
            )));
        }
    }
    Ok(())
}

/// Dual-graph write errors
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Pair rejected before reaching the store
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Store rejected the batch with a non-retryable error
    #[error("store rejected batch after {attempts} attempt(s): {source}")]
    Rejected {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Retries exhausted on transient failures
    #[error("batch failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl WriteError {
    /// Attempts made before giving up
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::InvalidRecord(_) => 0,
            Self::Rejected { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}
