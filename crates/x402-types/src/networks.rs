//! Known eip155 networks and CAIP-2 chain ID convenience lookups.
//!
//! This registry exists for developer experience and test fixtures: the
//! facilitator's actual set of served networks comes from the network-registry
//! configuration file at runtime, not from this static list. Only eip155
//! (EVM) networks are registered here; the facilitator serves no other
//! namespace (see §1 Non-goals: no arbitrary-token / non-EVM support).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::chain::ChainId;

/// A known network definition with its chain ID and human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub namespace: &'static str,
    pub reference: &'static str,
}

impl NetworkInfo {
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo { name: "base", namespace: "eip155", reference: "8453" },
    NetworkInfo { name: "base-sepolia", namespace: "eip155", reference: "84532" },
    NetworkInfo { name: "ethereum", namespace: "eip155", reference: "1" },
    NetworkInfo { name: "ethereum-sepolia", namespace: "eip155", reference: "11155111" },
    NetworkInfo { name: "polygon", namespace: "eip155", reference: "137" },
    NetworkInfo { name: "polygon-amoy", namespace: "eip155", reference: "80002" },
    NetworkInfo { name: "avalanche", namespace: "eip155", reference: "43114" },
    NetworkInfo { name: "avalanche-fuji", namespace: "eip155", reference: "43113" },
    NetworkInfo { name: "celo", namespace: "eip155", reference: "42220" },
    NetworkInfo { name: "celo-sepolia", namespace: "eip155", reference: "11142220" },
];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, ChainId>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.name, n.chain_id())).collect());

static CHAIN_ID_TO_NAME: LazyLock<HashMap<ChainId, &'static str>> =
    LazyLock::new(|| KNOWN_NETWORKS.iter().map(|n| (n.chain_id(), n.name)).collect());

/// Looks up a `ChainId` by well-known network name (e.g. `"base-sepolia"`).
pub fn chain_id_by_network_name(name: &str) -> Option<&'static ChainId> {
    NAME_TO_CHAIN_ID.get(name)
}

/// Reverse lookup: the well-known network name for a `ChainId`, if any.
pub fn network_name_by_chain_id(chain_id: &ChainId) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(chain_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_network_lookup() {
        let base = chain_id_by_network_name("base").unwrap();
        assert_eq!(base.namespace, "eip155");
        assert_eq!(base.reference, "8453");

        let celo = chain_id_by_network_name("celo").unwrap();
        assert_eq!(celo.reference, "42220");

        assert!(chain_id_by_network_name("unknown").is_none());
    }

    #[test]
    fn reverse_lookup() {
        let chain_id = ChainId::new("eip155", "8453");
        assert_eq!(network_name_by_chain_id(&chain_id), Some("base"));

        let unknown = ChainId::new("eip155", "999999");
        assert!(network_name_by_chain_id(&unknown).is_none());
    }
}
