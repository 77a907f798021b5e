//! Per-tenant secret seeds
//!
//! A [`TenantSeed`] is the HMAC key for identifier abstraction. Seeds are
//! created lazily on first use, persisted, and never regenerated: a new
//! seed would silently change every abstracted identifier of the tenant.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::{self, Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Seed width in bytes
pub const SEED_LEN: usize = 32;

/// Validated tenant identifier
///
/// Restricted to `[A-Za-z0-9._-]` so it can name a file on any platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant identifier
    ///
    /// # Errors
    /// Returns `SeedError::InvalidTenant` for empty ids or ids with
    /// characters outside `[A-Za-z0-9._-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, SeedError> {
        let id = id.into();
        let trimmed = id.trim();
        let valid = !trimmed.is_empty()
            && !trimmed.starts_with('.')
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(SeedError::InvalidTenant(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> serde::Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Per-tenant secret used as the abstraction hash key
///
/// `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantSeed([u8; SEED_LEN]);

impl TenantSeed {
    /// Wrap raw seed bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh seed from the thread-local CSPRNG
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random::<[u8; SEED_LEN]>())
    }

    /// Raw key bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    /// Lowercase hex encoding (persisted form)
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the persisted hex form
    ///
    /// # Errors
    /// Returns `SeedError::Corrupt` if the input is not 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, SeedError> {
        let bytes = hex::decode(s.trim()).map_err(|e| SeedError::Corrupt(e.to_string()))?;
        if bytes.len() != SEED_LEN {
            return Err(SeedError::Corrupt(format!(
                "expected {SEED_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; SEED_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for TenantSeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("TenantSeed(..)")
    }
}

/// Persistent seed storage
///
/// Implementations must commit at most one seed per tenant even when
/// several callers race on first access.
#[async_trait]
pub trait SeedStore: Send + Sync + fmt::Debug {
    /// Load an existing seed without creating one
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<TenantSeed>, SeedError>;

    /// Return the existing seed, or create, persist and return a new one
    ///
    /// # Errors
    /// Any persistence failure is returned; callers must not fall back to
    /// an unpersisted seed.
    async fn get_or_create(&self, tenant_id: &TenantId) -> Result<TenantSeed, SeedError>;
}

/// In-process seed store
///
/// Seeds live as long as the store; useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySeedStore {
    seeds: DashMap<TenantId, TenantSeed>,
}

impl MemorySeedStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tenants with a seed
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Check if no seed was created yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

#[async_trait]
impl SeedStore for MemorySeedStore {
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<TenantSeed>, SeedError> {
        Ok(self.seeds.get(tenant_id).map(|s| s.value().clone()))
    }

    async fn get_or_create(&self, tenant_id: &TenantId) -> Result<TenantSeed, SeedError> {
        let seed = self
            .seeds
            .entry(tenant_id.clone())
            .or_insert_with(TenantSeed::generate)
            .value()
            .clone();
        Ok(seed)
    }
}

/// File-backed seed store: one `<tenant>.seed` hex file per tenant
///
/// New seeds are written to a private temp file and published with a hard
/// link, which fails if the target exists. Exactly one racing writer wins;
/// the others discard their candidate and read the committed seed.
#[derive(Debug, Clone)]
pub struct FileSeedStore {
    dir: PathBuf,
}

impl FileSeedStore {
    /// Create store rooted at `dir` (created on first write)
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the seed file for a tenant
    #[inline]
    #[must_use]
    pub fn seed_path(&self, tenant_id: &TenantId) -> PathBuf {
        self.dir.join(format!("{tenant_id}.seed"))
    }

    async fn read_seed(path: &Path) -> Result<Option<TenantSeed>, SeedError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => TenantSeed::from_hex(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SeedError::io(path, e)),
        }
    }

    async fn write_candidate(path: &Path, seed: &TenantSeed) -> Result<(), SeedError> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| SeedError::io(path, e))?;
        file.write_all(seed.to_hex().as_bytes())
            .await
            .map_err(|e| SeedError::io(path, e))?;
        file.sync_all().await.map_err(|e| SeedError::io(path, e))
    }
}

#[async_trait]
impl SeedStore for FileSeedStore {
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<TenantSeed>, SeedError> {
        Self::read_seed(&self.seed_path(tenant_id)).await
    }

    async fn get_or_create(&self, tenant_id: &TenantId) -> Result<TenantSeed, SeedError> {
        let path = self.seed_path(tenant_id);
        if let Some(seed) = Self::read_seed(&path).await? {
            return Ok(seed);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SeedError::io(&self.dir, e))?;

        let candidate = TenantSeed::generate();
        let tmp = self
            .dir
            .join(format!(".{tenant_id}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let published = match Self::write_candidate(&tmp, &candidate).await {
            Ok(()) => tokio::fs::hard_link(&tmp, &path).await,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        let _ = tokio::fs::remove_file(&tmp).await;

        match published {
            Ok(()) => {
                tracing::info!(tenant_id = %tenant_id, path = %path.display(), "created tenant seed");
                Ok(candidate)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(tenant_id = %tenant_id, "lost seed creation race, reading committed seed");
                Self::read_seed(&path)
                    .await?
                    .ok_or_else(|| SeedError::Corrupt(format!("{} vanished", path.display())))
            }
            Err(e) => Err(SeedError::io(&path, e)),
        }
    }
}

#[async_trait]
impl<S: SeedStore + ?Sized> SeedStore for Arc<S> {
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<TenantSeed>, SeedError> {
        (**self).load(tenant_id).await
    }

    async fn get_or_create(&self, tenant_id: &TenantId) -> Result<TenantSeed, SeedError> {
        (**self).get_or_create(tenant_id).await
    }
}

/// Seed store errors (configuration class: fatal)
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// Tenant id unusable as a store key
    #[error("invalid tenant id: '{0}'")]
    InvalidTenant(String),

    /// Persisted seed could not be decoded
    #[error("corrupt seed: {0}")]
    Corrupt(String),

    /// IO failure on the seed store
    #[error("seed store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure shared by concurrent callers of the seed cache
    #[error(transparent)]
    Shared(Arc<SeedError>),
}

impl SeedError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Underlying error, looking through [`SeedError::Shared`]
    #[must_use]
    pub fn root(&self) -> &SeedError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_validation() {
        assert!(TenantId::new("72f988bf-86f1-41af-91ab-2d7cd011db47").is_ok());
        assert!(TenantId::new("contoso.onmicrosoft.com").is_ok());
        assert!(matches!(TenantId::new(""), Err(SeedError::InvalidTenant(_))));
        assert!(TenantId::new("../etc").is_err());
        assert!(TenantId::new("a/b").is_err());
        assert!(TenantId::new(".hidden").is_err());
    }

    #[test]
    fn seed_hex_round_trip_and_corruption() {
        let seed = TenantSeed::generate();
        assert_eq!(TenantSeed::from_hex(&seed.to_hex()).unwrap(), seed);
        assert!(matches!(TenantSeed::from_hex("abcd"), Err(SeedError::Corrupt(_))));
        assert!(matches!(TenantSeed::from_hex("zz"), Err(SeedError::Corrupt(_))));
    }

    #[test]
    fn seed_debug_hides_key() {
        let seed = TenantSeed::new([7u8; SEED_LEN]);
        assert_eq!(format!("{seed:?}"), "TenantSeed(..)");
    }

    #[tokio::test]
    async fn memory_store_returns_same_seed() {
        let store = MemorySeedStore::new();
        let tenant = TenantId::new("t1").unwrap();

        assert!(store.load(&tenant).await.unwrap().is_none());
        let s1 = store.get_or_create(&tenant).await.unwrap();
        let s2 = store.get_or_create(&tenant).await.unwrap();
        assert_eq!(s1, s2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new("tenant-a").unwrap();

        let first = FileSeedStore::new(dir.path().join("seeds"));
        let seed = first.get_or_create(&tenant).await.unwrap();

        let second = FileSeedStore::new(dir.path().join("seeds"));
        assert_eq!(second.load(&tenant).await.unwrap(), Some(seed.clone()));
        assert_eq!(second.get_or_create(&tenant).await.unwrap(), seed);
    }

    #[tokio::test]
    async fn file_store_concurrent_first_access_commits_one_seed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSeedStore::new(dir.path()));
        let tenant = TenantId::new("racy").unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move { store.get_or_create(&tenant).await }));
        }

        let mut seeds = Vec::new();
        for h in handles {
            seeds.push(h.await.unwrap().unwrap());
        }
        assert!(seeds.windows(2).all(|w| w[0] == w[1]));

        let committed = store.load(&tenant).await.unwrap().unwrap();
        assert_eq!(committed, seeds[0]);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_seed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSeedStore::new(dir.path());
        let tenant = TenantId::new("broken").unwrap();
        std::fs::write(store.seed_path(&tenant), "not hex").unwrap();

        assert!(matches!(
            store.get_or_create(&tenant).await,
            Err(SeedError::Corrupt(_))
        ));
    }
}
