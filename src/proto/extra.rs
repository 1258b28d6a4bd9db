//! The `extra` dictionary attached to a payment requirement.
//!
//! Servers use it for chain-specific parameters: the EIP-712 domain `name` and
//! `version` of an ERC-3009 token, or the `feePayer` a Solana facilitator will
//! co-sign with. Strings, booleans, integers and nested maps are typed at
//! deserialization. Anything else (nulls, arrays, floats) is kept as
//! [`ExtraValue::Other`] so an odd key never makes a requirement unreadable.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One value of an [`Extra`] dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExtraValue {
    String(String),
    Bool(bool),
    Integer(i128),
    Map(Extra),
    /// A value with no typed accessor, carried through untouched.
    Other(serde_json::Value),
}

impl ExtraValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtraValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExtraValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            ExtraValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Extra> {
        match self {
            ExtraValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for ExtraValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Bool(b) => ExtraValue::Bool(b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => ExtraValue::Integer(i.into()),
                (None, Some(u)) => ExtraValue::Integer(u.into()),
                (None, None) => ExtraValue::Other(Value::Number(n)),
            },
            Value::String(s) => ExtraValue::String(s),
            Value::Object(map) => ExtraValue::Map(Extra(
                map.into_iter()
                    .map(|(k, v)| (k, ExtraValue::from(v)))
                    .collect(),
            )),
            other @ (Value::Null | Value::Array(_)) => ExtraValue::Other(other),
        }
    }
}

impl<'de> Deserialize<'de> for ExtraValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(ExtraValue::from)
    }
}

/// Typed `extra` dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra(BTreeMap<String, ExtraValue>);

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<ExtraValue>>(mut self, key: K, value: V) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ExtraValue::as_str)
    }

    /// EIP-712 domain name of the token contract.
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// EIP-712 domain version of the token contract.
    pub fn version(&self) -> Option<&str> {
        self.get_str("version")
    }

    /// Solana account the facilitator pays transaction fees from.
    pub fn fee_payer(&self) -> Option<&str> {
        self.get_str("feePayer")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ExtraValue {
    fn from(value: &str) -> Self {
        ExtraValue::String(value.to_string())
    }
}

impl From<String> for ExtraValue {
    fn from(value: String) -> Self {
        ExtraValue::String(value)
    }
}

impl From<bool> for ExtraValue {
    fn from(value: bool) -> Self {
        ExtraValue::Bool(value)
    }
}

impl From<i64> for ExtraValue {
    fn from(value: i64) -> Self {
        ExtraValue::Integer(value.into())
    }
}

impl From<Extra> for ExtraValue {
    fn from(value: Extra) -> Self {
        ExtraValue::Map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_accessors() {
        let extra: Extra = serde_json::from_value(json!({
            "name": "USD Coin",
            "version": "2",
            "feePayer": "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4",
            "decimals": 6,
            "gasless": true,
            "nested": { "inner": "x" }
        }))
        .unwrap();
        assert_eq!(extra.name(), Some("USD Coin"));
        assert_eq!(extra.version(), Some("2"));
        assert_eq!(
            extra.fee_payer(),
            Some("2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4")
        );
        assert_eq!(extra.get("decimals").and_then(ExtraValue::as_integer), Some(6));
        assert_eq!(extra.get("gasless").and_then(ExtraValue::as_bool), Some(true));
        let nested = extra.get("nested").and_then(ExtraValue::as_map).unwrap();
        assert_eq!(nested.get_str("inner"), Some("x"));
    }

    #[test]
    fn wrongly_typed_name_is_not_a_name() {
        let extra: Extra = serde_json::from_value(json!({ "name": 7 })).unwrap();
        assert_eq!(extra.name(), None);
    }

    #[test]
    fn keeps_floats_nulls_and_arrays_opaque() {
        let extra: Extra = serde_json::from_value(json!({
            "name": "USDC",
            "ratio": 1.5,
            "x": null,
            "list": [1],
            "nested": { "b": null }
        }))
        .unwrap();
        assert_eq!(extra.name(), Some("USDC"));
        assert_eq!(extra.get("ratio"), Some(&ExtraValue::Other(json!(1.5))));
        assert_eq!(extra.get("x"), Some(&ExtraValue::Other(json!(null))));
        assert_eq!(extra.get("list"), Some(&ExtraValue::Other(json!([1]))));
        let nested = extra.get("nested").and_then(ExtraValue::as_map).unwrap();
        assert_eq!(nested.get("b"), Some(&ExtraValue::Other(json!(null))));
        assert_eq!(extra.get_str("x"), None);
    }

    #[test]
    fn opaque_values_serialize_unchanged() {
        let input = json!({ "name": "USDC", "x": null, "list": [1, "a"] });
        let extra: Extra = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&extra).unwrap(), input);
    }

    #[test]
    fn serializes_back_to_plain_json() {
        let extra = Extra::new().with("name", "USDC").with("version", "2");
        let value = serde_json::to_value(&extra).unwrap();
        assert_eq!(value, json!({ "name": "USDC", "version": "2" }));
    }
}
