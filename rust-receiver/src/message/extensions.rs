//! Provider-specific fields with no canonical slot.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::receiver::Provider;

/// Extension values keyed by `"<provider>.<name>"`.
///
/// Empty values are never stored, so `contains` answers "did the provider
/// send something for this field".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Extensions {
    values: BTreeMap<String, Value>,
}

/// Whether a value carries no information.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn qualified(provider: Provider, name: &str) -> String {
    format!("{}.{}", provider.as_str(), name)
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under the provider's namespace. Returns whether it was kept.
    pub fn insert(&mut self, provider: Provider, name: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if is_empty_value(&value) {
            return false;
        }
        self.values.insert(qualified(provider, name), value);
        true
    }

    pub fn get(&self, provider: Provider, name: &str) -> Option<&Value> {
        self.values.get(&qualified(provider, name))
    }

    /// String value of an extension, if it is a string.
    pub fn get_str(&self, provider: Provider, name: &str) -> Option<&str> {
        self.get(provider, name).and_then(Value::as_str)
    }

    /// Numeric value of an extension, accepting numbers and numeric strings.
    pub fn get_f64(&self, provider: Provider, name: &str) -> Option<f64> {
        match self.get(provider, name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn contains(&self, provider: Provider, name: &str) -> bool {
        self.values.contains_key(&qualified(provider, name))
    }

    /// Fully qualified keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
