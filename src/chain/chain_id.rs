//! CAIP-2 chain identifiers.
//!
//! x402 v1 names networks with short strings such as `"base-sepolia"`; newer
//! peers use CAIP-2 (`"eip155:84532"`). [`ChainId::resolve`] accepts either form.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::networks;

/// A `namespace:reference` chain identifier, e.g. `eip155:8453`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub namespace: String,
    pub reference: String,
}

impl ChainId {
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Looks up a well-known v1 network name. Case-sensitive.
    pub fn from_network_name(network_name: &str) -> Option<Self> {
        networks::chain_id_by_network_name(network_name).cloned()
    }

    pub fn as_network_name(&self) -> Option<&'static str> {
        networks::network_name_by_chain_id(self)
    }

    /// Resolves a network string that is either a known name or a CAIP-2 id.
    pub fn resolve(network: &str) -> Option<Self> {
        Self::from_network_name(network).or_else(|| network.parse().ok())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid CAIP-2 chain id: {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, reference)) if !namespace.is_empty() && !reference.is_empty() => {
                Ok(ChainId::new(namespace, reference))
            }
            _ => Err(ChainIdFormatError(s.to_string())),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_roundtrip() {
        let chain_id = ChainId::new("eip155", "8453");
        let serialized = serde_json::to_string(&chain_id).unwrap();
        assert_eq!(serialized, "\"eip155:8453\"");
        let back: ChainId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, chain_id);
    }

    #[test]
    fn test_chain_id_rejects_missing_parts() {
        assert!("eip155".parse::<ChainId>().is_err());
        assert!(":1".parse::<ChainId>().is_err());
        assert!("eip155:".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_resolve_accepts_name_and_caip2() {
        assert_eq!(
            ChainId::resolve("base-sepolia"),
            Some(ChainId::new("eip155", "84532"))
        );
        assert_eq!(
            ChainId::resolve("eip155:31337"),
            Some(ChainId::new("eip155", "31337"))
        );
        assert_eq!(ChainId::resolve("Base-Sepolia"), None);
    }
}
