//! Twin Identity
//!
//! Tenant-scoped, deterministic identifier abstraction.
//!
//! # Core Concepts
//!
//! - [`TenantSeed`]: per-tenant secret used as the HMAC key
//! - [`SeedStore`]: persistent seed storage ([`FileSeedStore`], [`MemorySeedStore`])
//! - [`SeedCache`]: explicit read-through cache in front of a store
//! - [`IdentityAbstractor`]: derives abstracted ids and scrubs property trees
//! - [`Value`]: recursive property value
//!
//! # Example
//!
//! ```rust,ignore
//! use twin_identity::{AbstractionConfig, FileSeedStore, IdentityAbstractor, SeedCache, TenantId};
//!
//! let cache = SeedCache::new(Arc::new(FileSeedStore::new("./seeds")), 1024);
//! let abstractor = IdentityAbstractor::new(cache, AbstractionConfig::default());
//!
//! let tenant = TenantId::new("contoso")?;
//! let id = abstractor
//!     .abstract_id(&tenant, "/subscriptions/s1/resourceGroups/rg", "Microsoft.Resources/resourceGroups")
//!     .await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod abstractor;
mod cache;
mod seed;
mod value;

pub use abstractor::{
    abstract_id, derive_abstract_id, id_token, normalize_real_id, replace_ignore_ascii_case,
    type_tag, AbstractionConfig, AbstractionError, IdentityAbstractor, DEFAULT_TYPE_TAG,
    SUBSCRIPTION_PLACEHOLDER, TOKEN_BYTES,
};
pub use cache::SeedCache;
pub use seed::{FileSeedStore, MemorySeedStore, SeedError, SeedStore, TenantId, TenantSeed, SEED_LEN};
pub use value::{Value, ValueMap};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
