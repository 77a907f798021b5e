//! Post-run sanity checks on classification counts
//!
//! A tenant that was already deployed should reconcile mostly to
//! EXACT_MATCH/DRIFTED. A high NEW ratio usually means the derivation edges
//! are missing, not that the resources are.

use crate::classify::ClassificationState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Warning severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Suspicious
    Warning,
    /// Almost certainly a pipeline defect
    Critical,
}

/// Diagnostic attached to a reconciliation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Severity
    pub severity: Severity,
    /// One-line description
    pub message: String,
    /// Likely root causes, most likely first
    pub likely_causes: Vec<String>,
    /// Diagnostic query against the graph snapshot
    pub suggested_query: String,
    /// What to do about it
    pub remediation: String,
}

/// Ratio thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// NEW ratio above which a warning is raised
    pub warn_new_ratio: f64,
    /// NEW ratio above which the warning becomes critical
    pub critical_new_ratio: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            warn_new_ratio: 0.5,
            critical_new_ratio: 0.9,
        }
    }
}

/// Checks a classification summary for suspicious distributions
#[derive(Debug, Clone, Default)]
pub struct SummaryValidator {
    config: ValidatorConfig,
}

impl SummaryValidator {
    /// Create validator with thresholds
    #[inline]
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Warnings for `counts` over `total` classified resources
    ///
    /// Thresholds are strict: exactly 50% NEW does not warn. A zero total
    /// yields nothing.
    #[must_use]
    pub fn validate(&self, counts: &BTreeMap<ClassificationState, usize>, total: usize) -> Vec<ValidationWarning> {
        if total == 0 {
            return Vec::new();
        }

        let new = counts.get(&ClassificationState::New).copied().unwrap_or(0);
        #[allow(clippy::cast_precision_loss)]
        let ratio = new as f64 / total as f64;
        if ratio <= self.config.warn_new_ratio {
            return Vec::new();
        }

        let severity = if ratio > self.config.critical_new_ratio {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let warning = new_ratio_warning(severity, new, total, ratio);
        match severity {
            Severity::Critical => tracing::error!(new, total, ratio, "{}", warning.message),
            Severity::Warning => tracing::warn!(new, total, ratio, "{}", warning.message),
        }
        vec![warning]
    }
}

fn new_ratio_warning(severity: Severity, new: usize, total: usize, ratio: f64) -> ValidationWarning {
    ValidationWarning {
        severity,
        message: format!(
            "{new} of {total} resources ({:.0}%) classified NEW; expected mostly EXACT_MATCH or DRIFTED",
            ratio * 100.0
        ),
        likely_causes: vec![
            "derivation edges missing: abstracted nodes were written without their originals".to_string(),
            "target subscription not set or wrong, so rewritten ids never match".to_string(),
            "target scan incomplete: scopes failed or were not scanned".to_string(),
            "source graph written by an older writer that predates derivation edges".to_string(),
        ],
        suggested_query:
            "jq '.tenants | map_values({abstracted: (.abstracted | length), edges: (.edges | length)})' graph.json"
                .to_string(),
        remediation: "Re-run `twin abstract` for the tenant so every abstracted node gets its derivation edge, \
             then verify `--target-subscription` and re-run reconcile."
            .to_string(),
    }
}
