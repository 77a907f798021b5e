//! Twin Reconcile
//!
//! Cross-tenant reconciliation: decides, for every abstracted resource of a
//! source tenant, whether its counterpart already exists in a target
//! environment, and whether it drifted.
//!
//! # Core Concepts
//!
//! - [`TargetLookup`]: case-insensitive index over a target scan
//! - [`HeuristicRecoverer`]: last-resort original-id recovery
//! - [`ReconciliationClassifier`]: parallel, cancellable classification
//! - [`SummaryValidator`]: flags suspicious NEW ratios
//! - [`ImportPlan`]: import/create directives for deployment
//!
//! # Example
//!
//! ```rust,ignore
//! use twin_reconcile::{build_lookup, ReconciliationClassifier};
//!
//! let lookup = Arc::new(build_lookup(target_resources));
//! let classifier = ReconciliationClassifier::new(store, tenant)
//!     .with_target_subscription(Some("S2".into()));
//!
//! let run = classifier.classify_all(resources, lookup, CancellationToken::new()).await;
//! println!("{} drifted", run.summary.count(ClassificationState::Drifted));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod classify;
mod drift;
mod plan;
mod recover;
mod target;
mod validate;

pub use classify::{
    normalize_for_target, ClassificationRun, ClassificationState, ClassificationSummary,
    ReconciliationClassifier, Resolution, ResolutionSource, ResourceClassification,
};
pub use drift::{equivalent, DriftPolicy, PropertyDrift};
pub use plan::{CreateDirective, ImportDirective, ImportPlan};
pub use recover::{HeuristicRecoverer, DEFAULT_SUFFIX_PATTERN};
pub use target::{
    build_lookup, ScanCollector, ScanError, ScanOutcome, TargetLookup, TargetResource,
    TargetScanSource,
};
pub use validate::{Severity, SummaryValidator, ValidationWarning, ValidatorConfig};

/// Re-exported so callers need no direct `tokio-util` dependency
pub use tokio_util::sync::CancellationToken;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
