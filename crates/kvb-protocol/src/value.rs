//! Dynamic JSON-like document type.
//!
//! Re-architects the original's untyped `value: any` into a closed enum so
//! adapters and the dispatcher can pattern-match exhaustively, while still
//! round-tripping through `serde_json::Value` at the wire boundary via
//! explicit `From` conversions rather than `#[serde(untagged)]` (untagged
//! enums silently pick the first variant that happens to parse, which is the
//! wrong failure mode for a storage layer).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(field),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde_json::Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from(raw))
    }
}

/// A scalar used in `QUERY` predicates. The original's query operator is a
/// flat equality conjunction over scalar fields only — no nested documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl Scalar {
    /// Field equality as used by `QUERY`: a document field matches a scalar
    /// predicate iff the stored value is the same scalar kind and equal.
    pub fn matches(&self, field_value: &Value) -> bool {
        match (self, field_value) {
            (Scalar::Bool(a), Value::Bool(b)) => a == b,
            (Scalar::Number(a), Value::Number(b)) => a == b,
            (Scalar::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trips_nested_documents() {
        let json = serde_json::json!({"items": [], "total": 0, "nested": {"a": true}});
        let value: Value = serde_json::from_value(json.clone()).unwrap();
        let back: serde_json::Value = value.into();
        assert_eq!(json, back);
    }

    #[test]
    fn get_returns_field_on_objects_only() {
        let obj: Value = serde_json::from_value(serde_json::json!({"total": 7})).unwrap();
        assert_eq!(obj.get("total"), Some(&Value::Number(7.into())));
        assert_eq!(obj.get("missing"), None);
        assert_eq!(Value::Null.get("total"), None);
    }

    #[test]
    fn scalar_matches_same_kind_equal_values_only() {
        let total = Value::Number(7.into());
        assert!(Scalar::Number(7.into()).matches(&total));
        assert!(!Scalar::Number(8.into()).matches(&total));
        assert!(!Scalar::String("7".to_owned()).matches(&total));
    }
}
