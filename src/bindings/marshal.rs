//! Value Marshaling Layer
//!
//! Converts values coming from the scripting runtime into an engine-agnostic
//! property representation and back. Runtime adapters hand over JSON
//! (`serde_json::Value`), native code only ever sees [`PropValue`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered property map shared by nodes, scenes, materials and events.
pub type PropertyMap = BTreeMap<String, PropValue>;

/// A single marshaled runtime value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum PropValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropValue>),
    Object(PropertyMap),
}

impl PropValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&PropertyMap> {
        match self {
            PropValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Numeric components of an array value.
    ///
    /// Returns `None` unless the value is an array whose elements are all
    /// numbers.
    pub fn numeric_components(&self) -> Option<Vec<f64>> {
        self.as_array()?.iter().map(PropValue::as_f64).collect()
    }

    /// Runtime type name used in argument error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PropValue::Null => "null",
            PropValue::Bool(_) => "boolean",
            PropValue::Number(_) => "number",
            PropValue::String(_) => "string",
            PropValue::Array(_) => "array",
            PropValue::Object(_) => "object",
        }
    }
}

/// Converts a runtime value into a property map.
///
/// Anything that is not an object marshals to an empty map, matching how
/// props arguments were always treated by the native side.
pub fn to_property_map(value: &PropValue) -> PropertyMap {
    value.as_object().cloned().unwrap_or_default()
}

/// Shallow-merges `patch` into `base`. `null` entries in the patch delete
/// the key.
pub fn merge_props(base: &mut PropertyMap, patch: PropertyMap) {
    for (key, value) in patch {
        if value.is_null() {
            base.remove(&key);
        } else {
            base.insert(key, value);
        }
    }
}

/// Reads a boolean option, falling back to `default` on absence or type
/// mismatch.
pub fn bool_or(map: &PropertyMap, key: &str, default: bool) -> bool {
    map.get(key).and_then(PropValue::as_bool).unwrap_or(default)
}

/// Reads a string option, falling back to `default`.
pub fn str_or<'a>(map: &'a PropertyMap, key: &str, default: &'a str) -> &'a str {
    map.get(key).and_then(PropValue::as_str).unwrap_or(default)
}

impl From<serde_json::Value> for PropValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropValue::Null,
            serde_json::Value::Bool(b) => PropValue::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(PropValue::Null, PropValue::Number),
            serde_json::Value::String(s) => PropValue::String(s),
            serde_json::Value::Array(items) => {
                PropValue::Array(items.into_iter().map(PropValue::from).collect())
            }
            serde_json::Value::Object(map) => PropValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, PropValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<PropValue> for serde_json::Value {
    fn from(value: PropValue) -> Self {
        match value {
            PropValue::Null => serde_json::Value::Null,
            PropValue::Bool(b) => serde_json::Value::Bool(b),
            // JSON has no NaN/Infinity
            PropValue::Number(n) => serde_json::Number::from_f64(n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            PropValue::String(s) => serde_json::Value::String(s),
            PropValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            PropValue::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Number(value)
    }
}

impl From<u64> for PropValue {
    fn from(value: u64) -> Self {
        PropValue::Number(value as f64)
    }
}

impl From<usize> for PropValue {
    fn from(value: usize) -> Self {
        PropValue::Number(value as f64)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::String(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::String(value)
    }
}

impl From<Vec<f64>> for PropValue {
    fn from(values: Vec<f64>) -> Self {
        PropValue::Array(values.into_iter().map(PropValue::Number).collect())
    }
}

impl From<PropertyMap> for PropValue {
    fn from(map: PropertyMap) -> Self {
        PropValue::Object(map)
    }
}
