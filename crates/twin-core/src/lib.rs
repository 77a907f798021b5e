//! Twin Core
//!
//! Orchestrates the two halves of the system: abstracting a source tenant
//! into the dual graph, and reconciling it against a target environment.
//!
//! # Core Concepts
//!
//! - [`TwinConfig`]: TOML configuration with defaults for every field
//! - [`AbstractionPipeline`]: records → abstracted resources → dual-graph writes
//! - [`Reconciler`]: graph store → classifier → validator → report
//! - [`TwinError`]: umbrella error
//!
//! # Example
//!
//! ```rust,ignore
//! use twin_core::{AbstractionPipeline, Reconciler, TwinConfig};
//!
//! let config = TwinConfig::load("twin.toml").await?;
//! let pipeline = AbstractionPipeline::from_config(&config, seeds, store.clone());
//! pipeline.run(&tenant, records).await?;
//!
//! let report = Reconciler::new(store, config)?
//!     .reconcile(&tenant, targets, CancellationToken::new())
//!     .await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod error;
mod pipeline;
mod reconciler;

pub use config::{ConfigError, ReconcileConfig, ScanConfig, SeedsConfig, TwinConfig};
pub use error::TwinError;
pub use pipeline::{AbstractionPipeline, AbstractionReport, Prepared, SkippedRecord};
pub use reconciler::{ReconciliationReport, Reconciler};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
