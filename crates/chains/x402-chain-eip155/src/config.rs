//! Per-network configuration: RPC endpoints, escrow/collector/Multicall3
//! addresses, and the operator's signer keys.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use url::Url;

/// RPC provider configuration for a single endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    pub http: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// A transparent wrapper that resolves environment variables during
/// deserialization: `"$FACILITATOR_PRIVATE_KEY"` or `"${FACILITATOR_PRIVATE_KEY}"`
/// resolve to `std::env::var`, anything else is parsed as a literal.
///
/// Keeps operator private keys out of the network-registry config file on
/// disk (§6: "Environment configuration ... operator credentials
/// (`FACILITATOR_PRIVATE_KEY` or custodial keys)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if let Some(stripped) = s.strip_prefix("${") {
            stripped.strip_suffix('}').map(str::to_string)
        } else if let Some(stripped) = s.strip_prefix('$') {
            stripped
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
                .then(|| stripped.to_string())
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("failed to parse value: {e}")))
            .map(LiteralOrEnv)
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// A validated 32-byte EVM private key, deserialized via [`LiteralOrEnv`].
#[derive(Clone, Copy)]
pub struct EvmPrivateKey(pub B256);

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s).map(Self).map_err(|e| format!("invalid private key: {e}"))
    }
}

/// Everything the operator wallet needs to talk to one network's escrow
/// deployment. One of these per entry in the network registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Numeric EIP-155 chain id (the `reference` half of the network's
    /// `eip155:<reference>` CAIP-2 id).
    pub chain_id: u64,
    /// RPC endpoints, tried via fallback in order.
    pub rpc: Vec<RpcConfig>,
    /// The escrow contract this network's sessions are backed by.
    pub escrow: Address,
    /// The token collector contract that pulls ERC-3009 transfers for this
    /// network's accepted token.
    pub token_collector: Address,
    /// The ERC-3009-capable token this network accepts (spec Non-goal:
    /// arbitrary-token support is out of scope; one token per network).
    pub token: Address,
    /// Multicall3 deployment, if available on this chain. When absent, the
    /// capture scheduler falls back to sequential per-session calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicall3: Option<Address>,
    /// Whether to use EIP-1559 gas pricing (otherwise legacy `gasPrice`).
    #[serde(default = "defaults::eip1559")]
    pub eip1559: bool,
    /// Operator signer keys for this network. A single entry is the common
    /// case (spec Non-goal: multi-operator consensus is out of scope); more
    /// than one just round-robins submission across addresses.
    pub signers: Vec<LiteralOrEnv<EvmPrivateKey>>,
    /// Confirmations to wait for before treating a tx as settled.
    #[serde(default = "defaults::confirmations")]
    pub confirmations: u64,
    /// Seconds to wait for a transaction receipt before giving up.
    #[serde(default = "defaults::receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

mod defaults {
    pub fn eip1559() -> bool {
        true
    }
    pub fn confirmations() -> u64 {
        1
    }
    pub fn receipt_timeout_secs() -> u64 {
        30
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_or_env_resolves_literal() {
        let raw = serde_json::json!("0x".to_owned() + &"11".repeat(32));
        let parsed: LiteralOrEnv<EvmPrivateKey> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.into_inner().0, B256::repeat_byte(0x11));
    }

    #[test]
    fn literal_or_env_resolves_dollar_env_var() {
        unsafe {
            std::env::set_var("X402_TEST_PRIVATE_KEY", "0x".to_owned() + &"22".repeat(32));
        }
        let raw = serde_json::json!("$X402_TEST_PRIVATE_KEY");
        let parsed: LiteralOrEnv<EvmPrivateKey> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.into_inner().0, B256::repeat_byte(0x22));
    }

    #[test]
    fn literal_or_env_resolves_braced_env_var() {
        unsafe {
            std::env::set_var("X402_TEST_PRIVATE_KEY_BRACED", "0x".to_owned() + &"33".repeat(32));
        }
        let raw = serde_json::json!("${X402_TEST_PRIVATE_KEY_BRACED}");
        let parsed: LiteralOrEnv<EvmPrivateKey> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.into_inner().0, B256::repeat_byte(0x33));
    }

    #[test]
    fn missing_env_var_errors() {
        let raw = serde_json::json!("$X402_TEST_DOES_NOT_EXIST");
        let result: Result<LiteralOrEnv<EvmPrivateKey>, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }
}
