//! CAIP-2 chain identifier types for blockchain-agnostic identification.
//!
//! This module implements the [CAIP-2](https://standards.chainagnostic.org/CAIPs/caip-2) standard
//! for identifying blockchain networks in a chain-agnostic way. A CAIP-2 chain ID
//! consists of two parts separated by a colon:
//!
//! - **Namespace**: the blockchain ecosystem, always `eip155` in this facilitator
//! - **Reference**: the chain-specific identifier (e.g., `8453` for Base)
//!
//! # Examples
//!
//! ```
//! use x402_types::chain::ChainId;
//!
//! let base = ChainId::new("eip155", "8453");
//! assert_eq!(base.to_string(), "eip155:8453");
//!
//! let chain: ChainId = "eip155:84532".parse().unwrap();
//! assert_eq!(chain.namespace, "eip155");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::networks;

/// A CAIP-2 compliant blockchain identifier (`namespace:reference`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    /// The blockchain namespace. Always `eip155` for the networks this facilitator serves.
    pub namespace: String,
    /// The chain-specific reference (e.g. `8453` for Base).
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

    /// Builds a CAIP-2 chain id from an eip155 numeric chain id.
    pub fn eip155(chain_id: u64) -> Self {
        Self::new("eip155", chain_id.to_string())
    }

    /// Parses the reference as an eip155 numeric chain id, if this is an eip155 chain.
    pub fn eip155_chain_id(&self) -> Option<u64> {
        if self.namespace != "eip155" {
            return None;
        }
        self.reference.parse().ok()
    }

    /// Looks up a chain ID from a well-known network name (see [`crate::networks`]).
    pub fn from_network_name(network_name: &str) -> Option<Self> {
        networks::chain_id_by_network_name(network_name).cloned()
    }

    /// Returns the well-known network name for this chain ID, if any.
    pub fn as_network_name(&self) -> Option<&'static str> {
        networks::network_name_by_chain_id(self)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.to_string()
    }
}

/// Error returned when parsing an invalid chain ID string.
#[derive(Debug, thiserror::Error)]
#[error("invalid chain id format {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(2, ':').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        Ok(ChainId {
            namespace: parts[0].into(),
            reference: parts[1].into(),
        })
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

/// A pattern for matching chain IDs, used in network-registry configuration.
///
/// - **Wildcard**: `eip155:*` matches any eip155 chain
/// - **Exact**: `eip155:8453` matches only Base
/// - **Set**: `eip155:{1,8453,137}` matches any of the listed chains
#[derive(Debug, Clone)]
pub enum ChainIdPattern {
    Wildcard { namespace: String },
    Exact { namespace: String, reference: String },
    Set { namespace: String, references: HashSet<String> },
}

impl ChainIdPattern {
    pub fn wildcard<S: Into<String>>(namespace: S) -> Self {
        Self::Wildcard { namespace: namespace.into() }
    }

    pub fn exact<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self::Exact { namespace: namespace.into(), reference: reference.into() }
    }

    pub fn set<N: Into<String>>(namespace: N, references: HashSet<String>) -> Self {
        Self::Set { namespace: namespace.into(), references }
    }

    pub fn matches(&self, chain_id: &ChainId) -> bool {
        match self {
            ChainIdPattern::Wildcard { namespace } => chain_id.namespace == *namespace,
            ChainIdPattern::Exact { namespace, reference } => {
                chain_id.namespace == *namespace && chain_id.reference == *reference
            }
            ChainIdPattern::Set { namespace, references } => {
                chain_id.namespace == *namespace && references.contains(&chain_id.reference)
            }
        }
    }

    #[allow(dead_code)]
    pub fn namespace(&self) -> &str {
        match self {
            ChainIdPattern::Wildcard { namespace } => namespace,
            ChainIdPattern::Exact { namespace, .. } => namespace,
            ChainIdPattern::Set { namespace, .. } => namespace,
        }
    }
}

impl fmt::Display for ChainIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainIdPattern::Wildcard { namespace } => write!(f, "{}:*", namespace),
            ChainIdPattern::Exact { namespace, reference } => write!(f, "{}:{}", namespace, reference),
            ChainIdPattern::Set { namespace, references } => {
                let refs: Vec<&str> = references.iter().map(|s| s.as_ref()).collect();
                write!(f, "{}:{{{}}}", namespace, refs.join(","))
            }
        }
    }
}

impl FromStr for ChainIdPattern {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = s.split_once(':').ok_or_else(|| ChainIdFormatError(s.into()))?;
        if namespace.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        if rest == "*" {
            return Ok(ChainIdPattern::wildcard(namespace));
        }
        if let Some(inner) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let mut references = HashSet::new();
            for item in inner.split(',') {
                let item = item.trim();
                if item.is_empty() {
                    return Err(ChainIdFormatError(s.into()));
                }
                references.insert(item.into());
            }
            if references.is_empty() {
                return Err(ChainIdFormatError(s.into()));
            }
            return Ok(ChainIdPattern::set(namespace, references));
        }
        if rest.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        Ok(ChainIdPattern::exact(namespace, rest))
    }
}

impl Serialize for ChainIdPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainIdPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainIdPattern::from_str(&s).map_err(de::Error::custom)
    }
}

impl From<ChainId> for ChainIdPattern {
    fn from(chain_id: ChainId) -> Self {
        ChainIdPattern::exact(chain_id.namespace, chain_id.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::{chain_id_by_network_name, network_name_by_chain_id};

    #[test]
    fn chain_id_serialize() {
        let chain_id = ChainId::new("eip155", "8453");
        assert_eq!(serde_json::to_string(&chain_id).unwrap(), "\"eip155:8453\"");
    }

    #[test]
    fn chain_id_deserialize() {
        let chain_id: ChainId = serde_json::from_str("\"eip155:84532\"").unwrap();
        assert_eq!(chain_id.namespace, "eip155");
        assert_eq!(chain_id.reference, "84532");
    }

    #[test]
    fn chain_id_roundtrip() {
        let original = ChainId::new("eip155", "8453");
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: ChainId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn chain_id_rejects_missing_colon() {
        let result: Result<ChainId, _> = serde_json::from_str("\"invalid\"");
        assert!(result.is_err());
    }

    #[test]
    fn eip155_roundtrip() {
        let chain = ChainId::eip155(8453);
        assert_eq!(chain.eip155_chain_id(), Some(8453));
    }

    #[test]
    fn pattern_wildcard_matches() {
        let pattern = ChainIdPattern::wildcard("eip155");
        assert!(pattern.matches(&ChainId::new("eip155", "1")));
        assert!(pattern.matches(&ChainId::new("eip155", "8453")));
    }

    #[test]
    fn pattern_exact_matches() {
        let pattern = ChainIdPattern::exact("eip155", "1");
        assert!(pattern.matches(&ChainId::new("eip155", "1")));
        assert!(!pattern.matches(&ChainId::new("eip155", "8453")));
    }

    #[test]
    fn pattern_set_matches() {
        let references: HashSet<String> = vec!["1", "8453", "137"].into_iter().map(String::from).collect();
        let pattern = ChainIdPattern::set("eip155", references);
        assert!(pattern.matches(&ChainId::new("eip155", "8453")));
        assert!(!pattern.matches(&ChainId::new("eip155", "42")));
    }

    #[test]
    fn chain_id_from_network_name() {
        let base = chain_id_by_network_name("base").unwrap();
        assert_eq!(base.reference, "8453");
        let base_sepolia = chain_id_by_network_name("base-sepolia").unwrap();
        assert_eq!(base_sepolia.reference, "84532");
        assert!(chain_id_by_network_name("unknown").is_none());
    }

    #[test]
    fn network_name_by_chain_id_roundtrip() {
        let chain_id = ChainId::new("eip155", "8453");
        assert_eq!(network_name_by_chain_id(&chain_id), Some("base"));
        let unknown = ChainId::new("eip155", "999999");
        assert!(network_name_by_chain_id(&unknown).is_none());
    }
}
