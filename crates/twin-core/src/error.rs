//! Error types for twin orchestration
//!
//! [`TwinError`] wraps every component error:
//! - Configuration and seed failures are fatal
//! - Store failures are retryable when the store says so
//! - Resolution problems never surface here; they degrade to NEW

use crate::config::ConfigError;
use twin_graph::{StoreError, WriteError};
use twin_identity::{AbstractionError, SeedError};
use twin_reconcile::ScanError;

/// Top-level error
#[derive(Debug, thiserror::Error)]
pub enum TwinError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Seed store failure
    #[error("seed error: {0}")]
    Seed(#[from] SeedError),

    /// Abstraction failure (including collisions)
    #[error("abstraction failed: {0}")]
    Abstraction(#[from] AbstractionError),

    /// Graph store failure
    #[error("graph store error: {0}")]
    Store(#[from] StoreError),

    /// Dual-graph write failure
    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    /// Target scan failure
    #[error("target scan failed: {0}")]
    Scan(#[from] ScanError),
}

impl TwinError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Write(WriteError::Exhausted { .. }) | Self::Scan(ScanError::Failed(_)) => true,
            _ => false,
        }
    }

    /// Check if error must stop the process
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Seed(_) | Self::Abstraction(AbstractionError::Seed(_))
        )
    }
}
