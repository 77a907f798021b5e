//! Twin Graph
//!
//! The dual resource graph: every discovered resource is stored twice, as a
//! faithful original and as a portable abstracted copy, joined by an
//! explicit derivation edge.
//!
//! # Core Concepts
//!
//! - [`ResourceRecord`] / [`AbstractedResource`] / [`DerivationEdge`]
//! - [`ResourceId`]: parsed `/subscriptions/{sub}/...` path
//! - [`GraphStore`]: persistence boundary with atomic batch writes
//! - [`DualGraphWriter`]: batched, retried, timeout-bounded triple writes
//!
//! # Example
//!
//! ```rust,ignore
//! use twin_graph::{abstract_record, DualGraphWriter, DualWrite, InMemoryGraphStore, WriterConfig};
//!
//! let store = Arc::new(InMemoryGraphStore::new());
//! let writer = DualGraphWriter::new(store.clone(), tenant.clone(), WriterConfig::default());
//!
//! let abstracted = abstract_record(&abstractor, &seed, &record)?;
//! writer.write(record, abstracted).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod abstraction;
mod model;
mod resource_id;
mod store;
mod writer;

pub use abstraction::abstract_record;
pub use model::{AbstractedResource, DerivationEdge, DualWrite, ResourceRecord, Tags};
pub use resource_id::{canonical_key, normalize_key, subscription_of, ResourceId, ResourceIdError};
pub use store::{GraphCounts, GraphSnapshot, GraphStore, InMemoryGraphStore, StoreError, TenantSnapshot};
pub use writer::{BatchFailure, DualGraphWriter, WriteError, WriteReport, WriterConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
