//! Layered configuration
//!
//! Every field has a default, so an empty TOML file is a valid config.
//!
//! ```toml
//! [seeds]
//! dir = "/var/lib/twin/seeds"
//!
//! [reconcile]
//! target_subscription_id = "00000000-0000-0000-0000-000000000002"
//! drift_fields = ["properties.accessTier"]
//!
//! [reconcile.type_drift_fields]
//! "Microsoft.Storage/storageAccounts" = ["properties.minimumTlsVersion"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use twin_graph::WriterConfig;
use twin_identity::AbstractionConfig;
use twin_reconcile::{DriftPolicy, HeuristicRecoverer, ScanCollector, ValidatorConfig, DEFAULT_SUFFIX_PATTERN};

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    /// Seed store
    pub seeds: SeedsConfig,
    /// Identity abstraction
    pub abstraction: AbstractionConfig,
    /// Dual-graph writer
    pub writer: WriterConfig,
    /// Target scan
    pub scan: ScanConfig,
    /// Reconciliation
    pub reconcile: ReconcileConfig,
    /// Summary validation thresholds
    pub validator: ValidatorConfig,
}

impl TwinConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns error on invalid TOML or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// With seed directory
    #[inline]
    #[must_use]
    pub fn with_seed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.seeds.dir = dir.into();
        self
    }

    /// With target subscription
    #[inline]
    #[must_use]
    pub fn with_target_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.reconcile.target_subscription_id = Some(subscription.into());
        self
    }

    /// With classification workers
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.reconcile.workers = Some(workers);
        self
    }

    /// Check value ranges and compile patterns
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.seeds.cache_capacity == 0, "seeds.cache_capacity must be positive"),
            (self.abstraction.type_tag_max_len == 0, "abstraction.type_tag_max_len must be positive"),
            (
                self.abstraction.subscription_placeholder.trim().is_empty(),
                "abstraction.subscription_placeholder must not be empty",
            ),
            (self.writer.batch_size == 0, "writer.batch_size must be positive"),
            (self.writer.max_attempts == 0, "writer.max_attempts must be at least 1"),
            (self.writer.batch_timeout_ms == 0, "writer.batch_timeout_ms must be positive"),
            (self.writer.max_concurrent_batches == 0, "writer.max_concurrent_batches must be positive"),
            (self.scan.max_concurrency == 0, "scan.max_concurrency must be positive"),
            (self.reconcile.workers == Some(0), "reconcile.workers must be positive"),
            (
                !(0.0..=1.0).contains(&self.validator.warn_new_ratio)
                    || !(0.0..=1.0).contains(&self.validator.critical_new_ratio),
                "validator ratios must be within [0, 1]",
            ),
            (
                self.validator.warn_new_ratio > self.validator.critical_new_ratio,
                "validator.warn_new_ratio must not exceed validator.critical_new_ratio",
            ),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(ConfigError::Invalid((*message).to_string()));
        }
        self.recoverer().map(|_| ())
    }

    /// Heuristic recoverer for the configured suffix pattern
    ///
    /// # Errors
    /// Returns error if the pattern does not compile.
    pub fn recoverer(&self) -> Result<HeuristicRecoverer, ConfigError> {
        let pattern = &self.reconcile.recovery_suffix_pattern;
        HeuristicRecoverer::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })
    }

    /// Drift policy for the configured extra fields
    #[must_use]
    pub fn drift_policy(&self) -> DriftPolicy {
        self.reconcile
            .type_drift_fields
            .iter()
            .fold(
                DriftPolicy::new().with_fields(self.reconcile.drift_fields.clone()),
                |policy, (resource_type, fields)| policy.with_type_fields(resource_type, fields.clone()),
            )
    }
}

/// Seed store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedsConfig {
    /// Directory of the file-backed seed store
    pub dir: PathBuf,
    /// Tenants kept in the seed cache
    pub cache_capacity: u64,
}

impl Default for SeedsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./.twin/seeds"),
            cache_capacity: 1024,
        }
    }
}

/// Target scan settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Scopes scanned concurrently
    pub max_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrency: ScanCollector::DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Subscription substituted into resolved ids (source kept if absent)
    pub target_subscription_id: Option<String>,
    /// Classification workers (available parallelism if absent)
    pub workers: Option<usize>,
    /// Extra dotted property paths compared for drift
    pub drift_fields: Vec<String>,
    /// Extra dotted property paths per resource type
    pub type_drift_fields: BTreeMap<String, Vec<String>>,
    /// Suffix stripped by heuristic id recovery
    pub recovery_suffix_pattern: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            target_subscription_id: None,
            workers: None,
            drift_fields: Vec::new(),
            type_drift_fields: BTreeMap::new(),
            recovery_suffix_pattern: DEFAULT_SUFFIX_PATTERN.to_string(),
        }
    }
}

/// Configuration errors (fatal at startup)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML or wrong types
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Recovery pattern does not compile
    #[error("invalid recovery pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Value out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}
