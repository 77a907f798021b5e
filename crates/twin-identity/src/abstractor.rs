//! Deterministic identifier abstraction
//!
//! # Algorithm
//!
//! ```text
//! normalized    = lowercase(trim(real_id))
//! mac           = HMAC-SHA256(key = tenant seed, msg = UTF-8(normalized))
//! token         = lowercase_hex(mac[0..8])            (16 chars, 64 bits)
//! tag           = type tag of resource_type           (see type_tag)
//! abstracted_id = tag + "-" + token
//! ```
//!
//! The same `(seed, real_id)` always yields the same identifier, in any
//! process and any language that implements HMAC-SHA256.

use crate::cache::SeedCache;
use crate::seed::{SeedError, TenantId, TenantSeed};
use crate::value::Value;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of the MAC kept in the token
pub const TOKEN_BYTES: usize = 8;

/// Fallback tag for types without a usable segment
pub const DEFAULT_TYPE_TAG: &str = "resource";

/// Default placeholder replacing source subscription ids in properties
pub const SUBSCRIPTION_PLACEHOLDER: &str = "{{SUBSCRIPTION_ID}}";

/// Abstraction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbstractionConfig {
    /// Maximum length of the type tag prefix
    pub type_tag_max_len: usize,
    /// Property keys whose string values are identifiers to hash
    /// (compared case-insensitively)
    pub identifier_keys: Vec<String>,
    /// Token substituted for the source subscription id
    pub subscription_placeholder: String,
}

impl AbstractionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_identifier_key(&self, key: &str) -> bool {
        self.identifier_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }
}

impl Default for AbstractionConfig {
    fn default() -> Self {
        Self {
            type_tag_max_len: 16,
            identifier_keys: ["principalId", "objectId", "clientId", "applicationId", "tenantId"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            subscription_placeholder: SUBSCRIPTION_PLACEHOLDER.to_string(),
        }
    }
}

/// Normalize a resource path before hashing
#[inline]
#[must_use]
pub fn normalize_real_id(real_id: &str) -> String {
    real_id.trim().to_lowercase()
}

/// Short, identifier-safe tag for a resource type
///
/// Last `/` segment of the type, lowercased, ASCII alphanumerics only,
/// truncated to `max_len`. `Microsoft.Storage/storageAccounts` becomes
/// `storageaccounts`.
#[must_use]
pub fn type_tag(resource_type: &str, max_len: usize) -> String {
    let segment = resource_type
        .trim()
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default();
    let tag: String = segment
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(max_len)
        .collect();
    if tag.is_empty() {
        DEFAULT_TYPE_TAG.to_string()
    } else {
        tag
    }
}

/// Keyed hash token for a real id
#[must_use]
pub fn id_token(seed: &TenantSeed, real_id: &str) -> String {
    // HMAC accepts keys of any length; 32 bytes never fails
    let mut mac = <HmacSha256 as Mac>::new_from_slice(seed.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(normalize_real_id(real_id).as_bytes());
    let digest = mac.finalize().into_bytes();
    hex::encode(&digest[..TOKEN_BYTES])
}

/// Derive an abstracted id with an explicit tag length
#[must_use]
pub fn derive_abstract_id(
    seed: &TenantSeed,
    real_id: &str,
    resource_type: &str,
    tag_max_len: usize,
) -> String {
    format!(
        "{}-{}",
        type_tag(resource_type, tag_max_len),
        id_token(seed, real_id)
    )
}

/// Derive an abstracted id with the default tag length
#[inline]
#[must_use]
pub fn abstract_id(seed: &TenantSeed, real_id: &str, resource_type: &str) -> String {
    derive_abstract_id(
        seed,
        real_id,
        resource_type,
        AbstractionConfig::default().type_tag_max_len,
    )
}

/// Replace every ASCII-case-insensitive occurrence of `needle`
#[must_use]
pub fn replace_ignore_ascii_case(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    let lower_hay = haystack.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (start, _) in lower_hay.match_indices(&lower_needle) {
        out.push_str(&haystack[last..start]);
        out.push_str(replacement);
        last = start + needle.len();
    }
    out.push_str(&haystack[last..]);
    out
}

/// Tag used when hashing an embedded identifier found under `key`
fn embedded_tag(key: &str) -> String {
    let lower = key.to_ascii_lowercase();
    let stem = lower.strip_suffix("id").unwrap_or(&lower);
    type_tag(stem, usize::MAX)
}

/// Derives abstracted identifiers for a tenant
///
/// Holds the seed cache explicitly; seeds are resolved per tenant on demand.
#[derive(Debug, Clone)]
pub struct IdentityAbstractor {
    seeds: SeedCache,
    config: AbstractionConfig,
}

impl IdentityAbstractor {
    /// Create abstractor over a seed cache
    #[inline]
    #[must_use]
    pub fn new(seeds: SeedCache, config: AbstractionConfig) -> Self {
        Self { seeds, config }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AbstractionConfig {
        &self.config
    }

    /// Resolve (creating on first use) the tenant's seed
    ///
    /// # Errors
    /// Seed store failures are fatal for abstraction.
    pub async fn seed_for(&self, tenant_id: &TenantId) -> Result<TenantSeed, AbstractionError> {
        self.seeds
            .get_or_create(tenant_id)
            .await
            .map_err(AbstractionError::from)
    }

    /// Abstract one identifier for a tenant
    ///
    /// # Errors
    /// - `AbstractionError::EmptyIdentifier` for blank `real_id`
    /// - `AbstractionError::Seed` if the seed cannot be obtained
    pub async fn abstract_id(
        &self,
        tenant_id: &TenantId,
        real_id: &str,
        resource_type: &str,
    ) -> Result<String, AbstractionError> {
        let seed = self.seed_for(tenant_id).await?;
        self.abstract_with_seed(&seed, real_id, resource_type)
    }

    /// Abstract one identifier with an already resolved seed
    ///
    /// # Errors
    /// Returns `AbstractionError::EmptyIdentifier` for blank `real_id`.
    pub fn abstract_with_seed(
        &self,
        seed: &TenantSeed,
        real_id: &str,
        resource_type: &str,
    ) -> Result<String, AbstractionError> {
        if real_id.trim().is_empty() {
            return Err(AbstractionError::EmptyIdentifier);
        }
        Ok(derive_abstract_id(
            seed,
            real_id,
            resource_type,
            self.config.type_tag_max_len,
        ))
    }

    /// Replace the source subscription id with the placeholder
    #[must_use]
    pub fn scrub_subscription(&self, text: &str, subscription_id: Option<&str>) -> String {
        match subscription_id.map(str::trim) {
            Some(sub) if !sub.is_empty() => {
                replace_ignore_ascii_case(text, sub, &self.config.subscription_placeholder)
            }
            _ => text.to_string(),
        }
    }

    /// Abstract identifiers embedded in a property tree
    ///
    /// String values under identifier keys are hashed with the tenant seed;
    /// afterwards every occurrence of the source subscription id in any
    /// string is replaced with the placeholder (not hashed), so it can later
    /// be swapped for a target subscription.
    #[must_use]
    pub fn abstract_properties(
        &self,
        seed: &TenantSeed,
        properties: &Value,
        subscription_id: Option<&str>,
    ) -> Value {
        let mut out = self.hash_embedded(seed, properties);
        out.rewrite_strings(&mut |s| {
            let scrubbed = self.scrub_subscription(s, subscription_id);
            *s = scrubbed;
        });
        out
    }

    fn hash_embedded(&self, seed: &TenantSeed, value: &Value) -> Value {
        match value {
            Value::Map(m) => Value::Map(
                m.iter()
                    .map(|(k, v)| {
                        let abstracted = match v {
                            Value::String(s)
                                if self.config.is_identifier_key(k) && !s.trim().is_empty() =>
                            {
                                Value::String(derive_abstract_id(
                                    seed,
                                    s,
                                    &embedded_tag(k),
                                    self.config.type_tag_max_len,
                                ))
                            }
                            other => self.hash_embedded(seed, other),
                        };
                        (k.clone(), abstracted)
                    })
                    .collect(),
            ),
            Value::List(items) => {
                Value::List(items.iter().map(|v| self.hash_embedded(seed, v)).collect())
            }
            other => other.clone(),
        }
    }
}

/// Abstraction errors
#[derive(Debug, thiserror::Error)]
pub enum AbstractionError {
    /// Seed could not be obtained (fatal)
    #[error("seed unavailable: {0}")]
    Seed(#[from] SeedError),

    /// Resource carried no identifier
    #[error("empty resource identifier")]
    EmptyIdentifier,

    /// Resource carried no type
    #[error("empty resource type for {0}")]
    EmptyType(String),

    /// Two distinct real ids produced the same abstracted id
    #[error("abstracted id collision on {abstracted_id}: {first} vs {second}")]
    Collision {
        abstracted_id: String,
        first: String,
        second: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::MemorySeedStore;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    const STORAGE: &str = "Microsoft.Storage/storageAccounts";

    fn fixed_seed() -> TenantSeed {
        TenantSeed::new([0x42; 32])
    }

    fn abstractor() -> IdentityAbstractor {
        let cache = SeedCache::new(Arc::new(MemorySeedStore::new()), 16);
        IdentityAbstractor::new(cache, AbstractionConfig::default())
    }

    #[test]
    fn type_tag_uses_last_segment() {
        assert_eq!(type_tag(STORAGE, 16), "storageaccounts");
        assert_eq!(type_tag("Microsoft.Network/virtualNetworks/subnets", 16), "subnets");
        assert_eq!(type_tag("Microsoft.Web/sites/", 3), "sit");
        assert_eq!(type_tag("", 16), DEFAULT_TYPE_TAG);
        assert_eq!(type_tag("///", 16), DEFAULT_TYPE_TAG);
    }

    #[test]
    fn abstract_id_shape() {
        let id = abstract_id(&fixed_seed(), "/subscriptions/s1/x", STORAGE);
        let (tag, token) = id.split_once('-').unwrap();
        assert_eq!(tag, "storageaccounts");
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn abstract_id_matches_reference_hmac() {
        // Independent computation of the documented algorithm
        let seed = fixed_seed();
        let real_id = "  /Subscriptions/S1/resourceGroups/RG  ";
        let mut mac = HmacSha256::new_from_slice(seed.as_bytes()).unwrap();
        mac.update(b"/subscriptions/s1/resourcegroups/rg");
        let expected = format!("resourcegroups-{}", hex::encode(&mac.finalize().into_bytes()[..8]));

        assert_eq!(
            abstract_id(&seed, real_id, "Microsoft.Resources/resourceGroups"),
            expected
        );
    }

    #[test]
    fn abstract_id_is_case_and_whitespace_insensitive() {
        let seed = fixed_seed();
        assert_eq!(
            abstract_id(&seed, "/SUBSCRIPTIONS/S1/A", STORAGE),
            abstract_id(&seed, " /subscriptions/s1/a\n", STORAGE)
        );
    }

    #[test]
    fn abstract_id_depends_on_seed() {
        let other = TenantSeed::new([0x43; 32]);
        assert_ne!(
            abstract_id(&fixed_seed(), "/subscriptions/s1/a", STORAGE),
            abstract_id(&other, "/subscriptions/s1/a", STORAGE)
        );
    }

    #[test]
    fn no_collisions_for_ten_thousand_ids() {
        let seed = fixed_seed();
        let ids: HashSet<String> = (0..10_000)
            .map(|i| {
                abstract_id(
                    &seed,
                    &format!("/subscriptions/s1/resourceGroups/rg{}/providers/{STORAGE}/acct{i}", i % 37),
                    STORAGE,
                )
            })
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    proptest! {
        #[test]
        fn prop_abstract_id_deterministic(bytes in any::<[u8; 32]>(), real_id in "\\PC{1,80}") {
            let seed = TenantSeed::new(bytes);
            prop_assert_eq!(
                abstract_id(&seed, &real_id, STORAGE),
                abstract_id(&seed.clone(), &real_id, STORAGE)
            );
        }
    }

    #[test]
    fn replace_ignore_case_replaces_all() {
        assert_eq!(
            replace_ignore_ascii_case("/subscriptions/ABC/x/abc", "abc", "{S}"),
            "/subscriptions/{S}/x/{S}"
        );
        assert_eq!(replace_ignore_ascii_case("abc", "", "x"), "abc");
    }

    #[tokio::test]
    async fn abstractor_is_stable_across_calls() {
        let a = abstractor();
        let tenant = TenantId::new("t1").unwrap();
        let id1 = a.abstract_id(&tenant, "/subscriptions/s1/a", STORAGE).await.unwrap();
        let id2 = a.abstract_id(&tenant, "/subscriptions/s1/a", STORAGE).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn abstractor_rejects_empty_id() {
        let a = abstractor();
        let tenant = TenantId::new("t1").unwrap();
        assert!(matches!(
            a.abstract_id(&tenant, "   ", STORAGE).await,
            Err(AbstractionError::EmptyIdentifier)
        ));
    }

    #[test]
    fn abstract_properties_hashes_principals_and_scrubs_subscription() {
        let a = abstractor();
        let seed = fixed_seed();
        let sub = "11111111-2222-3333-4444-555555555555";
        let props = Value::from(json!({
            "principalId": "aaaa-bbbb",
            "roleDefinitionId": format!("/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/r1", sub.to_uppercase()),
            "nested": [{"objectId": "cccc"}],
            "count": 2
        }));

        let out = a.abstract_properties(&seed, &props, Some(sub));

        assert_eq!(
            out.get("principalId"),
            Some(&Value::from(derive_abstract_id(&seed, "aaaa-bbbb", "principal", 16)))
        );
        assert_eq!(
            out.get("roleDefinitionId").and_then(Value::as_str),
            Some("/subscriptions/{{SUBSCRIPTION_ID}}/providers/Microsoft.Authorization/roleDefinitions/r1")
        );
        let nested = out.get("nested").unwrap();
        let Value::List(items) = nested else { panic!("expected list") };
        assert!(items[0]
            .get("objectId")
            .and_then(Value::as_str)
            .unwrap()
            .starts_with("object-"));
        assert_eq!(out.get("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn abstract_properties_without_subscription_only_hashes() {
        let a = abstractor();
        let props = Value::from(json!({"text": "/subscriptions/s1"}));
        let out = a.abstract_properties(&fixed_seed(), &props, None);
        assert_eq!(out, props);
    }
}
