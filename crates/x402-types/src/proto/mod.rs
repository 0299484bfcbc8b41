//! Wire format types for the facilitator's HTTP surface (§6).
//!
//! The payload discrimination that the upstream x402 ecosystem usually does
//! with a dynamic dispatch registry keyed by `scheme` is replaced here with a
//! tagged variant over the parsed payload shape (see `SPEC_FULL.md` / design
//! notes): [`PaymentPayload::payload`] is kept as a raw [`serde_json::Value`]
//! until the scheme router has read `accepted.scheme` and knows which of
//! [`ExactPayload`], [`EscrowCreationPayload`], or [`EscrowUsagePayload`] to
//! parse it as.

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::collections::HashMap;

use crate::chain::ChainId;
use crate::error::ErrorCode;
use crate::timestamp::UnixTimestamp;

/// `exact` or `escrow` (with the deprecated `session` alias routed to escrow-usage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    Exact,
    Escrow,
    /// Deprecated alias for `escrow`-usage, kept for backward compatibility (§9 open question).
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub description: String,
    pub mime_type: String,
    pub url: String,
}

/// The advertised payment requirements for a resource (the `accepted` entry).
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: ChainId,
    #[serde_as(as = "DisplayFromStr")]
    pub max_amount_required: U256,
    pub pay_to: Address,
    pub max_timeout_seconds: u64,
    pub asset: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// ERC-3009 authorization fields shared by `exact` and `escrow` payloads.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc3009Authorization {
    pub from: Address,
    pub to: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub value: U256,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: B256,
}

/// `exact.payload` - a one-shot ERC-3009 `transferWithAuthorization`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    pub signature: Bytes,
    pub authorization: Erc3009Authorization,
}

/// The session-specific fields layered on top of the ERC-3009 authorization
/// for an `escrow-creation` payload.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    #[serde_as(as = "DisplayFromStr")]
    pub salt: U256,
    pub authorization_expiry: UnixTimestamp,
    pub refund_expiry: UnixTimestamp,
}

/// `escrow-creation.payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowCreationPayload {
    pub signature: Bytes,
    pub authorization: Erc3009Authorization,
    pub session_params: SessionParams,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub id: B256,
    pub token: String,
}

/// `escrow-usage.payload`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowUsagePayload {
    pub session: SessionRef,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
    pub request_id: String,
}

/// `escrow.payload`, discriminated by structural shape (creation carries
/// `authorization`+`sessionParams`, usage carries `session`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EscrowPayload {
    Creation(EscrowCreationPayload),
    Usage(EscrowUsagePayload),
}

/// The full payment payload envelope shared by every scheme (§9: "keep the
/// wire representation - single `payload` object - so `exact`/`escrow`/legacy
/// `session` schemes share an envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub accepted: PaymentRequirements,
    pub payload: serde_json::Value,
    pub resource: ResourceInfo,
    pub x402_version: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub x402_version: u8,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// `/settle` accepts the identical body shape as `/verify` (§6).
pub type SettleRequest = VerifyRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleSessionInfo {
    pub id: B256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde_as(as = "DisplayFromStr")]
    pub balance: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTimestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<ChainId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SettleSessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub x402_version: u8,
    pub scheme: Scheme,
    pub network: ChainId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
    pub signers: HashMap<ChainId, Vec<Address>>,
}

/// `{ "error": "<code>", "details"?: [...] }`, the generic envelope for
/// endpoints other than `/verify` and `/settle` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorEnvelope {
    pub fn new(error: ErrorCode) -> Self {
        Self { error, details: None }
    }

    pub fn with_details(error: ErrorCode, details: Vec<String>) -> Self {
        Self { error, details: Some(details) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_usage_payload_parses_as_untagged_usage() {
        let raw = serde_json::json!({
            "session": {"id": "0x".to_owned() + &"11".repeat(32), "token": "abc"},
            "amount": "1000",
            "requestId": "req-1",
        });
        let parsed: EscrowPayload = serde_json::from_value(raw).unwrap();
        assert!(matches!(parsed, EscrowPayload::Usage(_)));
    }

    #[test]
    fn scheme_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Scheme::Exact).unwrap(), "\"exact\"");
        assert_eq!(serde_json::to_string(&Scheme::Session).unwrap(), "\"session\"");
    }
}
