//! Recursive property values
//!
//! Provides [`Value`], the tagged representation of the untyped nested
//! `properties` structure carried by every discovered resource.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Ordered map of property values (deterministic serialization)
pub type ValueMap = BTreeMap<String, Value>;

/// A recursive tagged property value
///
/// Serializes to plain JSON (untagged), so crawler output and target scans
/// can be read without an intermediate schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Absent / JSON null
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// List of values
    List(Vec<Value>),
    /// Nested map of values
    Map(ValueMap),
}

impl Value {
    /// Empty map value
    #[inline]
    #[must_use]
    pub fn map() -> Self {
        Self::Map(ValueMap::new())
    }

    /// Check for null
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow as string (if a string)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as map (if a map)
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a single key (maps only)
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Look up a dotted path such as `sku.name`
    ///
    /// Returns `None` when any segment is missing or a non-map value is
    /// traversed. An empty path returns `self`.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |current, segment| current.get(segment))
    }

    /// Insert a key into a map value, converting `Null` into an empty map
    ///
    /// Returns the previous value. Non-map values are left untouched and the
    /// new value is returned back as `Some`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        if self.is_null() {
            *self = Self::map();
        }
        match self {
            Self::Map(m) => m.insert(key.into(), value.into()),
            _ => Some(value.into()),
        }
    }

    /// Rewrite every string leaf in place
    pub fn rewrite_strings<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut String),
    {
        match self {
            Self::String(s) => f(s),
            Self::List(items) => {
                for item in items {
                    item.rewrite_strings(f);
                }
            }
            Self::Map(m) => {
                for item in m.values_mut() {
                    item.rewrite_strings(f);
                }
            }
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) => {}
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            other => match serde_json::to_string(other) {
                Ok(json) => f.write_str(&json),
                Err(_) => f.write_str("<unprintable>"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(m: ValueMap) -> Self {
        Self::Map(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(m) => {
                Self::Map(m.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_from_json_preserves_shape() {
        let v = Value::from(json!({
            "sku": {"name": "Standard_LRS"},
            "count": 3,
            "ratio": 0.5,
            "enabled": true,
            "list": ["a", null]
        }));

        assert_eq!(v.get_path("sku.name"), Some(&Value::from("Standard_LRS")));
        assert_eq!(v.get("count"), Some(&Value::Int(3)));
        assert_eq!(v.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(v.get("enabled"), Some(&Value::Bool(true)));
        assert_eq!(
            v.get("list"),
            Some(&Value::List(vec![Value::from("a"), Value::Null]))
        );
    }

    #[test]
    fn value_get_path_missing_segments() {
        let v = Value::from(json!({"a": {"b": 1}}));
        assert!(v.get_path("a.c").is_none());
        assert!(v.get_path("a.b.c").is_none());
        assert_eq!(v.get_path(""), Some(&v));
    }

    #[test]
    fn value_serde_is_untagged() {
        let v = Value::from(json!({"name": "acct1", "tags": {"env": "prod"}}));
        let encoded = serde_json::to_string(&v).unwrap();
        assert_eq!(encoded, r#"{"name":"acct1","tags":{"env":"prod"}}"#);

        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn value_insert_promotes_null_to_map() {
        let mut v = Value::Null;
        v.insert("k", "v");
        assert_eq!(v.get("k"), Some(&Value::from("v")));
    }

    #[test]
    fn value_rewrite_strings_visits_nested_leaves() {
        let mut v = Value::from(json!({"a": ["x", {"b": "x"}], "c": 1}));
        v.rewrite_strings(&mut |s| s.push('!'));
        assert_eq!(v, Value::from(json!({"a": ["x!", {"b": "x!"}], "c": 1})));
    }
}
