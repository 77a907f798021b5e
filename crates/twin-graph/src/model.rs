//! Resource graph model
//!
//! Both representations of a discovered resource and the edge linking them:
//! - [`ResourceRecord`]: the faithful original, as crawled
//! - [`AbstractedResource`]: the portable, identity-scrubbed counterpart
//! - [`DerivationEdge`]: `abstracted → original`, recorded at write time

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use twin_identity::{TenantId, Value};

/// Resource tags (ordered for stable output)
pub type Tags = BTreeMap<String, String>;

/// One physical cloud resource as discovered in the source tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Provider resource path, unique within the source tenant
    #[serde(alias = "id")]
    pub real_id: String,
    /// Provider/type string, e.g. `Microsoft.Storage/storageAccounts`
    #[serde(alias = "type")]
    pub resource_type: String,
    /// Resource name
    #[serde(default)]
    pub name: String,
    /// Region (absent for global types)
    #[serde(default)]
    pub location: Option<String>,
    /// Tags
    #[serde(default)]
    pub tags: Tags,
    /// Opaque nested properties
    #[serde(default)]
    pub properties: Value,
    /// Resource group name
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Source subscription id
    #[serde(default)]
    pub subscription_id: Option<String>,
}

impl ResourceRecord {
    /// Create record with required fields
    #[inline]
    #[must_use]
    pub fn new(real_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            real_id: real_id.into(),
            resource_type: resource_type.into(),
            name: String::new(),
            location: None,
            tags: Tags::new(),
            properties: Value::Null,
            resource_group: None,
            subscription_id: None,
        }
    }

    /// With name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With location
    #[inline]
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// With tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// With properties
    #[inline]
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// With resource group
    #[inline]
    #[must_use]
    pub fn with_resource_group(mut self, group: impl Into<String>) -> Self {
        self.resource_group = Some(group.into());
        self
    }

    /// With subscription id
    #[inline]
    #[must_use]
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Check the crawler contract: non-empty id and type
    #[inline]
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.real_id.trim().is_empty() && !self.resource_type.trim().is_empty()
    }
}

/// Portable counterpart of a [`ResourceRecord`]
///
/// Identifiers are translated; everything else is mirrored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractedResource {
    /// Deterministic, tenant-scoped identifier
    pub abstracted_id: String,
    /// Provider/type string
    pub resource_type: String,
    /// Resource name
    #[serde(default)]
    pub name: String,
    /// Region
    #[serde(default)]
    pub location: Option<String>,
    /// Tags
    #[serde(default)]
    pub tags: Tags,
    /// Properties with embedded identifiers abstracted
    #[serde(default)]
    pub properties: Value,
    /// Resource group name
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Subscription placeholder (never the source subscription)
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Cached original id from a prior resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
}

impl AbstractedResource {
    /// Create abstracted resource with required fields
    #[inline]
    #[must_use]
    pub fn new(abstracted_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            abstracted_id: abstracted_id.into(),
            resource_type: resource_type.into(),
            name: String::new(),
            location: None,
            tags: Tags::new(),
            properties: Value::Null,
            resource_group: None,
            subscription_id: None,
            original_id: None,
        }
    }

    /// With cached original id
    #[inline]
    #[must_use]
    pub fn with_original_id(mut self, original_id: impl Into<String>) -> Self {
        self.original_id = Some(original_id.into());
        self
    }

    /// With location
    #[inline]
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// With tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// With properties
    #[inline]
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Check if neither an abstracted nor a cached original id is present
    #[inline]
    #[must_use]
    pub fn has_no_identifiers(&self) -> bool {
        self.abstracted_id.trim().is_empty()
            && self.original_id.as_deref().map_or(true, |s| s.trim().is_empty())
    }
}

/// Directed link `abstracted → original`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationEdge {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Abstracted node
    pub abstracted_id: String,
    /// Original node
    pub real_id: String,
}

/// One resource's dual-graph write: original node, abstracted node, edge
#[derive(Debug, Clone, PartialEq)]
pub struct DualWrite {
    /// Original node
    pub original: ResourceRecord,
    /// Abstracted node
    pub abstracted: AbstractedResource,
}

impl DualWrite {
    /// Pair an original with its abstraction
    #[inline]
    #[must_use]
    pub fn new(original: ResourceRecord, abstracted: AbstractedResource) -> Self {
        Self {
            original,
            abstracted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_deserializes_crawler_aliases() {
        let record: ResourceRecord = serde_json::from_value(json!({
            "id": "/subscriptions/s1/resourceGroups/rg",
            "type": "Microsoft.Resources/resourceGroups",
            "name": "rg",
            "location": "eastus",
            "tags": {"env": "prod"}
        }))
        .unwrap();

        assert_eq!(record.real_id, "/subscriptions/s1/resourceGroups/rg");
        assert_eq!(record.resource_type, "Microsoft.Resources/resourceGroups");
        assert_eq!(record.tags.get("env").map(String::as_str), Some("prod"));
        assert!(record.properties.is_null());
        assert!(record.is_well_formed());
    }

    #[test]
    fn record_well_formed_requires_id_and_type() {
        assert!(!ResourceRecord::new("", "t").is_well_formed());
        assert!(!ResourceRecord::new("/x", " ").is_well_formed());
    }

    #[test]
    fn abstracted_identifier_presence() {
        assert!(AbstractedResource::new("", "t").has_no_identifiers());
        assert!(!AbstractedResource::new("", "t").with_original_id("/x").has_no_identifiers());
        assert!(!AbstractedResource::new("a-1", "t").has_no_identifiers());
    }

    #[test]
    fn abstracted_skips_absent_original_id() {
        let json = serde_json::to_value(AbstractedResource::new("a-1", "t")).unwrap();
        assert!(json.get("original_id").is_none());
    }
}
