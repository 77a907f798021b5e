//! Seed cache using moka
//!
//! Keeps resolved tenant seeds in process so repeated abstraction requests
//! do not hit the persistent store. The cache is an explicit object handed
//! to the abstractor, never process-wide state.

use crate::seed::{SeedError, SeedStore, TenantId, TenantSeed};
use moka::future::Cache;
use std::fmt;
use std::sync::Arc;

/// Read-through cache in front of a [`SeedStore`]
///
/// Concurrent first requests for the same tenant are coalesced: the store
/// is asked once and every caller observes the same seed or error.
#[derive(Clone)]
pub struct SeedCache {
    store: Arc<dyn SeedStore>,
    inner: Cache<TenantId, TenantSeed>,
}

impl SeedCache {
    /// Create cache over `store` holding at most `max_tenants` seeds
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn SeedStore>, max_tenants: u64) -> Self {
        Self {
            store,
            inner: Cache::new(max_tenants),
        }
    }

    /// Return the tenant's seed, creating and persisting it on first use
    ///
    /// # Errors
    /// Store failures come back as [`SeedError::Shared`], since every
    /// coalesced caller sees the same one; [`SeedError::root`] reaches the
    /// store's own error. Failures are not cached.
    pub async fn get_or_create(&self, tenant_id: &TenantId) -> Result<TenantSeed, SeedError> {
        let store = Arc::clone(&self.store);
        let tenant = tenant_id.clone();
        self.inner
            .try_get_with(tenant_id.clone(), async move {
                store.get_or_create(&tenant).await
            })
            .await
            .map_err(SeedError::Shared)
    }

    /// Cached seed for a tenant, without touching the store
    #[inline]
    #[must_use]
    pub async fn cached(&self, tenant_id: &TenantId) -> Option<TenantSeed> {
        self.inner.get(tenant_id).await
    }

    /// Drop a cached seed (the persisted seed is untouched)
    #[inline]
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.inner.invalidate(tenant_id).await;
    }

    /// Backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SeedStore> {
        &self.store
    }
}

impl fmt::Debug for SeedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedCache")
            .field("store", &self.store)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}
