//! Graph store abstraction and in-memory implementation
//!
//! The store persists, per tenant, original nodes, abstracted nodes and the
//! derivation edges between them. A batch write is all-or-nothing: an
//! abstracted node is never visible with a half-written edge.

use crate::model::{AbstractedResource, DerivationEdge, DualWrite, ResourceRecord};
use crate::resource_id::normalize_key;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use twin_identity::TenantId;

/// Node and edge counts for one tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    /// Original nodes
    pub originals: usize,
    /// Abstracted nodes
    pub abstracted: usize,
    /// Derivation edges
    pub edges: usize,
}

/// Graph persistence boundary
///
/// # Contract
/// - `write_batch` commits every triple of the batch or none of them
/// - re-writing an existing `real_id` updates in place
/// - a missing edge is reported as `Ok(None)`, never as an error
#[async_trait]
pub trait GraphStore: Send + Sync + fmt::Debug {
    /// Atomically persist originals, abstracted nodes and edges
    async fn write_batch(&self, tenant_id: &TenantId, batch: &[DualWrite]) -> Result<(), StoreError>;

    /// Derivation edge of an abstracted node, if any
    async fn derivation_edge(
        &self,
        tenant_id: &TenantId,
        abstracted_id: &str,
    ) -> Result<Option<DerivationEdge>, StoreError>;

    /// Original node by real id (case-insensitive)
    async fn original(
        &self,
        tenant_id: &TenantId,
        real_id: &str,
    ) -> Result<Option<ResourceRecord>, StoreError>;

    /// All abstracted nodes of a tenant
    async fn abstracted_resources(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AbstractedResource>, StoreError>;

    /// Node and edge counts
    async fn counts(&self, tenant_id: &TenantId) -> Result<GraphCounts, StoreError>;
}

#[async_trait]
impl<S: GraphStore + ?Sized> GraphStore for Arc<S> {
    async fn write_batch(&self, tenant_id: &TenantId, batch: &[DualWrite]) -> Result<(), StoreError> {
        (**self).write_batch(tenant_id, batch).await
    }

    async fn derivation_edge(
        &self,
        tenant_id: &TenantId,
        abstracted_id: &str,
    ) -> Result<Option<DerivationEdge>, StoreError> {
        (**self).derivation_edge(tenant_id, abstracted_id).await
    }

    async fn original(
        &self,
        tenant_id: &TenantId,
        real_id: &str,
    ) -> Result<Option<ResourceRecord>, StoreError> {
        (**self).original(tenant_id, real_id).await
    }

    async fn abstracted_resources(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AbstractedResource>, StoreError> {
        (**self).abstracted_resources(tenant_id).await
    }

    async fn counts(&self, tenant_id: &TenantId) -> Result<GraphCounts, StoreError> {
        (**self).counts(tenant_id).await
    }
}

/// One tenant's dual graph
#[derive(Debug, Default, Clone)]
struct TenantGraph {
    /// normalized real id -> original
    originals: HashMap<String, ResourceRecord>,
    /// abstracted id -> abstracted node
    abstracted: HashMap<String, AbstractedResource>,
    /// abstracted id -> real id
    edges: HashMap<String, String>,
    /// normalized real id -> abstracted id
    derived_from: HashMap<String, String>,
}

impl TenantGraph {
    fn apply(&mut self, write: &DualWrite) {
        let key = normalize_key(&write.original.real_id);
        let abstracted_id = write.abstracted.abstracted_id.clone();

        // A re-scan under a different abstracted id replaces the stale node
        if let Some(previous) = self.derived_from.get(&key) {
            if *previous != abstracted_id {
                let previous = previous.clone();
                self.abstracted.remove(&previous);
                self.edges.remove(&previous);
            }
        }

        self.originals.insert(key.clone(), write.original.clone());
        self.abstracted
            .insert(abstracted_id.clone(), write.abstracted.clone());
        self.edges
            .insert(abstracted_id.clone(), write.original.real_id.clone());
        self.derived_from.insert(key, abstracted_id);
    }

    fn counts(&self) -> GraphCounts {
        GraphCounts {
            originals: self.originals.len(),
            abstracted: self.abstracted.len(),
            edges: self.edges.len(),
        }
    }
}

/// In-memory graph store
///
/// A batch is applied under a single write lock, which makes it atomic
/// with respect to every reader.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    tenants: RwLock<HashMap<TenantId, TenantGraph>>,
}

impl InMemoryGraphStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an abstracted node with no derivation edge
    ///
    /// Models graphs written before edges were recorded, or imported from
    /// another system.
    pub fn insert_unlinked(&self, tenant_id: &TenantId, resource: AbstractedResource) {
        let mut tenants = self.tenants.write();
        let graph = tenants.entry(tenant_id.clone()).or_default();
        graph
            .abstracted
            .insert(resource.abstracted_id.clone(), resource);
    }

    /// Remove the derivation edge of an abstracted node
    ///
    /// Returns `true` if an edge existed.
    pub fn detach_edge(&self, tenant_id: &TenantId, abstracted_id: &str) -> bool {
        let mut tenants = self.tenants.write();
        let Some(graph) = tenants.get_mut(tenant_id) else {
            return false;
        };
        match graph.edges.remove(abstracted_id) {
            Some(real_id) => {
                graph.derived_from.remove(&normalize_key(&real_id));
                true
            }
            None => false,
        }
    }

    /// Export the whole store
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        let tenants = self.tenants.read();
        let mut out = BTreeMap::new();
        for (tenant_id, graph) in tenants.iter() {
            let mut originals: Vec<ResourceRecord> = graph.originals.values().cloned().collect();
            originals.sort_by(|a, b| a.real_id.cmp(&b.real_id));

            let mut abstracted: Vec<AbstractedResource> =
                graph.abstracted.values().cloned().collect();
            abstracted.sort_by(|a, b| a.abstracted_id.cmp(&b.abstracted_id));

            let mut edges: Vec<DerivationEdge> = graph
                .edges
                .iter()
                .map(|(abstracted_id, real_id)| DerivationEdge {
                    tenant_id: tenant_id.clone(),
                    abstracted_id: abstracted_id.clone(),
                    real_id: real_id.clone(),
                })
                .collect();
            edges.sort_by(|a, b| a.abstracted_id.cmp(&b.abstracted_id));

            out.insert(
                tenant_id.clone(),
                TenantSnapshot {
                    originals,
                    abstracted,
                    edges,
                },
            );
        }
        GraphSnapshot {
            version: GraphSnapshot::VERSION,
            exported_at: chrono::Utc::now(),
            tenants: out,
        }
    }

    /// Rebuild a store from a snapshot
    ///
    /// # Errors
    /// Returns `StoreError::Invalid` for unknown snapshot versions or edges
    /// pointing at missing nodes.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self, StoreError> {
        if snapshot.version != GraphSnapshot::VERSION {
            return Err(StoreError::Invalid(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut tenants = HashMap::new();
        for (tenant_id, data) in snapshot.tenants {
            let mut graph = TenantGraph::default();
            for original in data.originals {
                graph
                    .originals
                    .insert(normalize_key(&original.real_id), original);
            }
            for abstracted in data.abstracted {
                graph
                    .abstracted
                    .insert(abstracted.abstracted_id.clone(), abstracted);
            }
            for edge in data.edges {
                let key = normalize_key(&edge.real_id);
                if !graph.abstracted.contains_key(&edge.abstracted_id)
                    || !graph.originals.contains_key(&key)
                {
                    return Err(StoreError::Invalid(format!(
                        "dangling derivation edge {} -> {}",
                        edge.abstracted_id, edge.real_id
                    )));
                }
                graph.derived_from.insert(key, edge.abstracted_id.clone());
                graph.edges.insert(edge.abstracted_id, edge.real_id);
            }
            tenants.insert(tenant_id, graph);
        }

        Ok(Self {
            tenants: RwLock::new(tenants),
        })
    }

    /// Write a JSON snapshot to `path`
    ///
    /// The snapshot is written to a sibling temp file and renamed over
    /// `path`, so an interrupted save leaves the previous snapshot intact.
    ///
    /// # Errors
    /// Returns IO or serialization failures.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp = temp_path(path);
        let published = match write_synced(&tmp, &json).await {
            Ok(()) => tokio::fs::rename(&tmp, path)
                .await
                .map_err(|e| StoreError::io(path, e)),
            Err(e) => Err(e),
        };
        if published.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        published
    }

    /// Load a JSON snapshot from `path`
    ///
    /// # Errors
    /// Returns IO, parse or snapshot validation failures.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let snapshot: GraphSnapshot = serde_json::from_slice(&bytes)?;
        Self::from_snapshot(snapshot)
    }
}

/// Private sibling of `path` for staging a snapshot
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "snapshot".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(bytes).await.map_err(|e| StoreError::io(path, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(path, e))
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn write_batch(&self, tenant_id: &TenantId, batch: &[DualWrite]) -> Result<(), StoreError> {
        if let Some(bad) = batch
            .iter()
            .find(|w| w.original.real_id.trim().is_empty() || w.abstracted.abstracted_id.trim().is_empty())
        {
            return Err(StoreError::Invalid(format!(
                "write without identifiers (type {})",
                bad.original.resource_type
            )));
        }

        let mut tenants = self.tenants.write();
        let graph = tenants.entry(tenant_id.clone()).or_default();
        for write in batch {
            graph.apply(write);
        }
        Ok(())
    }

    async fn derivation_edge(
        &self,
        tenant_id: &TenantId,
        abstracted_id: &str,
    ) -> Result<Option<DerivationEdge>, StoreError> {
        let tenants = self.tenants.read();
        Ok(tenants
            .get(tenant_id)
            .and_then(|g| g.edges.get(abstracted_id))
            .map(|real_id| DerivationEdge {
                tenant_id: tenant_id.clone(),
                abstracted_id: abstracted_id.to_string(),
                real_id: real_id.clone(),
            }))
    }

    async fn original(
        &self,
        tenant_id: &TenantId,
        real_id: &str,
    ) -> Result<Option<ResourceRecord>, StoreError> {
        let tenants = self.tenants.read();
        Ok(tenants
            .get(tenant_id)
            .and_then(|g| g.originals.get(&normalize_key(real_id)))
            .cloned())
    }

    async fn abstracted_resources(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AbstractedResource>, StoreError> {
        let tenants = self.tenants.read();
        let mut out: Vec<AbstractedResource> = tenants
            .get(tenant_id)
            .map(|g| g.abstracted.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.abstracted_id.cmp(&b.abstracted_id));
        Ok(out)
    }

    async fn counts(&self, tenant_id: &TenantId) -> Result<GraphCounts, StoreError> {
        let tenants = self.tenants.read();
        Ok(tenants.get(tenant_id).map(TenantGraph::counts).unwrap_or_default())
    }
}

/// Serialized form of a graph store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Format version
    pub version: u32,
    /// Export time
    pub exported_at: chrono::DateTime<chrono::Utc>,
    /// Per-tenant graphs
    pub tenants: BTreeMap<TenantId, TenantSnapshot>,
}

impl GraphSnapshot {
    /// Current snapshot format
    pub const VERSION: u32 = 1;
}

/// Serialized graph of one tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSnapshot {
    /// Original nodes
    pub originals: Vec<ResourceRecord>,
    /// Abstracted nodes
    pub abstracted: Vec<AbstractedResource>,
    /// Derivation edges
    pub edges: Vec<DerivationEdge>,
}

/// Graph store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store temporarily unreachable (retryable)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Concurrent modification conflict (retryable)
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Rejected input (not retryable)
    #[error("invalid write: {0}")]
    Invalid(String),

    /// IO failure
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}
