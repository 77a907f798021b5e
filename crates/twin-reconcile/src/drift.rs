//! Property drift between an abstracted resource and its target match
//!
//! Compared: location, SKU (`properties.sku`), every tag key, and any extra
//! dotted field paths the caller configures, globally or per resource type. Null and missing are the same
//! thing; string values compare case-sensitively.

use crate::target::TargetResource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use twin_graph::AbstractedResource;
use twin_identity::Value;

/// One differing field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDrift {
    /// Field path, e.g. `location`, `sku`, `tags.env`
    pub field: String,
    /// Value from the abstracted resource (placeholders substituted)
    pub expected: Value,
    /// Value found in the target
    pub actual: Value,
}

/// Which fields participate in drift comparison
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftPolicy {
    extra_fields: Vec<String>,
    type_fields: BTreeMap<String, Vec<String>>,
}

impl DriftPolicy {
    /// Create policy comparing only the built-in fields
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With additional dotted field paths
    ///
    /// `properties.accessTier` and `accessTier` both address
    /// `properties.accessTier`.
    #[inline]
    #[must_use]
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.extra_fields = fields;
        self
    }

    /// With field paths compared only for `resource_type` (any casing)
    #[must_use]
    pub fn with_type_fields(mut self, resource_type: &str, fields: Vec<String>) -> Self {
        self.type_fields.insert(resource_type.to_lowercase(), fields);
        self
    }

    /// Additional field paths for every type
    #[inline]
    #[must_use]
    pub fn extra_fields(&self) -> &[String] {
        &self.extra_fields
    }

    /// Field paths compared for `resource_type`: global ones first
    pub fn fields_for<'a>(&'a self, resource_type: &str) -> impl Iterator<Item = &'a String> + 'a {
        let specific = self
            .type_fields
            .get(&resource_type.to_lowercase())
            .map_or(&[][..], Vec::as_slice);
        self.extra_fields.iter().chain(specific)
    }

    /// Compare `abstracted` against `target`
    ///
    /// `placeholder` occurrences in expected values are replaced with the
    /// target's subscription before comparison.
    #[must_use]
    pub fn compare(
        &self,
        abstracted: &AbstractedResource,
        target: &TargetResource,
        placeholder: &str,
    ) -> Vec<PropertyDrift> {
        let subscription = target.effective_subscription();
        let substitute = |value: Value| substitute_placeholder(value, placeholder, subscription.as_deref());
        let mut drifts = Vec::new();

        let mut check = |field: String, expected: Value, actual: Value| {
            let expected = substitute(expected);
            if !equivalent(&expected, &actual) {
                drifts.push(PropertyDrift {
                    field,
                    expected,
                    actual,
                });
            }
        };

        check(
            "location".to_string(),
            Value::from(abstracted.location.clone()),
            Value::from(target.location.clone()),
        );
        check(
            "sku".to_string(),
            field_value(&abstracted.properties, "sku"),
            field_value(&target.properties, "sku"),
        );

        let keys: BTreeSet<&String> = abstracted.tags.keys().chain(target.tags.keys()).collect();
        for key in keys {
            check(
                format!("tags.{key}"),
                Value::from(abstracted.tags.get(key).cloned()),
                Value::from(target.tags.get(key).cloned()),
            );
        }

        for path in self.fields_for(&abstracted.resource_type) {
            check(
                path.clone(),
                field_value(&abstracted.properties, path),
                field_value(&target.properties, path),
            );
        }

        drifts
    }
}

/// Value at a dotted path inside `properties` (Null if absent)
fn field_value(properties: &Value, path: &str) -> Value {
    let path = path.strip_prefix("properties.").unwrap_or(path);
    properties.get_path(path).cloned().unwrap_or_default()
}

fn substitute_placeholder(mut value: Value, placeholder: &str, subscription: Option<&str>) -> Value {
    if let Some(subscription) = subscription {
        value.rewrite_strings(&mut |s: &mut String| {
            if s.contains(placeholder) {
                *s = s.replace(placeholder, subscription);
            }
        });
    }
    value
}

/// Structural equality where null and missing map entries coincide
#[must_use]
pub fn equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Map(left), Value::Map(right)) => {
            let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
            keys.into_iter().all(|key| {
                equivalent(
                    left.get(key).unwrap_or(&Value::Null),
                    right.get(key).unwrap_or(&Value::Null),
                )
            })
        }
        (Value::List(left), Value::List(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(l, r)| equivalent(l, r))
        }
        #[allow(clippy::cast_precision_loss)]
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => (*i as f64 - f).abs() < f64::EPSILON,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use twin_identity::SUBSCRIPTION_PLACEHOLDER;

    const TARGET_ID: &str =
        "/subscriptions/S2/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct1";

    fn abstracted() -> AbstractedResource {
        AbstractedResource::new("storageaccounts-0011223344556677", "Microsoft.Storage/storageAccounts")
            .with_location("eastus")
            .with_tag("env", "prod")
            .with_properties(Value::from(json!({"sku": {"name": "Standard_LRS"}, "accessTier": "Hot"})))
    }

    fn target() -> TargetResource {
        TargetResource::new(TARGET_ID, "Microsoft.Storage/storageAccounts")
            .with_location("eastus")
            .with_tag("env", "prod")
            .with_properties(Value::from(json!({"sku": {"name": "Standard_LRS"}, "accessTier": "Hot"})))
    }

    #[test]
    fn identical_resources_have_no_drift() {
        let drifts = DriftPolicy::new().compare(&abstracted(), &target(), SUBSCRIPTION_PLACEHOLDER);
        assert!(drifts.is_empty());
    }

    #[test]
    fn location_drift_is_reported_once() {
        let target = target().with_location("westus");
        let drifts = DriftPolicy::new().compare(&abstracted(), &target, SUBSCRIPTION_PLACEHOLDER);

        assert_eq!(
            drifts,
            vec![PropertyDrift {
                field: "location".to_string(),
                expected: Value::from("eastus"),
                actual: Value::from("westus"),
            }]
        );
    }

    #[test]
    fn location_compare_is_case_sensitive() {
        let target = target().with_location("EastUS");
        let drifts = DriftPolicy::new().compare(&abstracted(), &target, SUBSCRIPTION_PLACEHOLDER);
        assert_eq!(drifts.len(), 1);
    }

    #[test]
    fn tag_added_and_removed() {
        let mut target = target().with_tag("owner", "ops");
        target.tags.remove("env");
        let drifts = DriftPolicy::new().compare(&abstracted(), &target, SUBSCRIPTION_PLACEHOLDER);

        let fields: Vec<&str> = drifts.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["tags.env", "tags.owner"]);
        assert!(drifts[0].actual.is_null());
        assert!(drifts[1].expected.is_null());
    }

    #[test]
    fn sku_drift() {
        let target = target().with_properties(Value::from(json!({"sku": {"name": "Premium_LRS"}})));
        let drifts = DriftPolicy::new().compare(&abstracted(), &target, SUBSCRIPTION_PLACEHOLDER);
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].field, "sku");
    }

    #[test]
    fn null_and_missing_are_equivalent() {
        let mut left = AbstractedResource::new("a-1", "t");
        left.properties = Value::from(json!({"sku": null}));
        let right = TargetResource::new(TARGET_ID, "t");
        assert!(DriftPolicy::new().compare(&left, &right, SUBSCRIPTION_PLACEHOLDER).is_empty());

        assert!(equivalent(
            &Value::from(json!({"a": 1, "b": null})),
            &Value::from(json!({"a": 1}))
        ));
    }

    #[test]
    fn extra_fields_are_compared() {
        let target = target().with_properties(Value::from(
            json!({"sku": {"name": "Standard_LRS"}, "accessTier": "Cool"}),
        ));
        let policy = DriftPolicy::new().with_fields(vec!["properties.accessTier".to_string()]);
        let drifts = policy.compare(&abstracted(), &target, SUBSCRIPTION_PLACEHOLDER);

        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].field, "properties.accessTier");
        assert_eq!(drifts[0].actual, Value::from("Cool"));
    }

    #[test]
    fn type_fields_apply_only_to_their_type() {
        let target = target().with_properties(Value::from(
            json!({"sku": {"name": "Standard_LRS"}, "accessTier": "Cool"}),
        ));
        let policy = DriftPolicy::new().with_type_fields("microsoft.storage/storageaccounts", vec!["accessTier".to_string()]);
        let drifts = policy.compare(&abstracted(), &target, SUBSCRIPTION_PLACEHOLDER);
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].field, "accessTier");

        let mut vault = abstracted();
        vault.resource_type = "Microsoft.KeyVault/vaults".to_string();
        assert!(policy.compare(&vault, &target, SUBSCRIPTION_PLACEHOLDER).is_empty());
    }

    #[test]
    fn placeholder_is_substituted_with_target_subscription() {
        let path = format!("/subscriptions/{SUBSCRIPTION_PLACEHOLDER}/resourceGroups/rg");
        let source = abstracted().with_properties(Value::from(json!({"scope": path})));
        let target = target().with_properties(Value::from(json!({"scope": "/subscriptions/S2/resourceGroups/rg"})));

        let policy = DriftPolicy::new().with_fields(vec!["scope".to_string()]);
        assert!(policy.compare(&source, &target, SUBSCRIPTION_PLACEHOLDER).is_empty());
    }

    #[test]
    fn numeric_kinds_compare_by_value() {
        assert!(equivalent(&Value::Int(3), &Value::Float(3.0)));
        assert!(!equivalent(&Value::Int(3), &Value::Float(3.5)));
    }
}
