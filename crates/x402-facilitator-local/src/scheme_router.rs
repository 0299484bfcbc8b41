//! C5 Scheme Router: dispatches `/verify` and `/settle` by `accepted.scheme`
//! and, for `escrow`, by the payload's structural shape (spec §4.5).
//!
//! `exact` stays a one-shot ERC-3009 `transferWithAuthorization`: no Session
//! row, no escrow contract call. `escrow`/`session` (the deprecated alias,
//! §9 open question) share a single `Session`-backed path, split into
//! creation and usage by [`EscrowPayload`]'s untagged decode.

use std::str::FromStr;
use std::sync::Arc;

use uuid::Uuid;
use x402_chain_eip155::eip712::{self, TokenEip712Domain};
use x402_chain_eip155::error::EscrowOperation;
use x402_chain_eip155::provider::Eip155Provider;
use x402_store::Store;
use x402_types::chain::{ChainId, ChainRegistry};
use x402_types::error::ErrorCode;
use x402_types::proto::{
    EscrowPayload, ExactPayload, Scheme, SettleRequest, SettleResponse, SettleSessionInfo,
    VerifyRequest, VerifyResponse,
};
use x402_types::timestamp::UnixTimestamp;

use crate::error::{ApiError, chain_error};
use crate::session_engine::{CreateSessionInput, SessionEngine};

pub struct SchemeRouter<S: Store> {
    store: Arc<S>,
    engine: Arc<SessionEngine<S>>,
    chains: Arc<ChainRegistry<Eip155Provider>>,
}

impl<S: Store> SchemeRouter<S> {
    pub fn new(store: Arc<S>, engine: Arc<SessionEngine<S>>, chains: Arc<ChainRegistry<Eip155Provider>>) -> Self {
        Self { store, engine, chains }
    }

    async fn provider_and_domain(&self, network_id: &str) -> Result<(&Eip155Provider, TokenEip712Domain), ApiError> {
        let chain_id = ChainId::from_str(network_id).map_err(|_| ApiError::new(ErrorCode::InvalidNetwork))?;
        let provider = self.chains.by_chain_id(chain_id).ok_or_else(|| ApiError::new(ErrorCode::InvalidNetwork))?;
        let network = self
            .store
            .get_network(network_id)
            .await?
            .filter(|n| n.is_active)
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidNetwork))?;
        let domain = TokenEip712Domain {
            name: network.token_name,
            version: network.token_version,
            chain_id: network.chain_id as u64,
            verifying_contract: provider.token_address(),
        };
        Ok((provider, domain))
    }

    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, ApiError> {
        match request.payment_payload.accepted.scheme {
            Scheme::Exact => self.verify_exact(request).await,
            Scheme::Escrow | Scheme::Session => self.verify_escrow(request).await,
        }
    }

    pub async fn settle(&self, request: &SettleRequest, user_id: Uuid) -> Result<SettleResponse, ApiError> {
        match request.payment_payload.accepted.scheme {
            Scheme::Exact => self.settle_exact(request).await,
            Scheme::Escrow | Scheme::Session => self.settle_escrow(request, user_id).await,
        }
    }

    fn parse_exact(request: &VerifyRequest) -> Result<ExactPayload, ApiError> {
        serde_json::from_value(request.payment_payload.payload.clone()).map_err(|_| ApiError::new(ErrorCode::InvalidPayload))
    }

    async fn verify_exact(&self, request: &VerifyRequest) -> Result<VerifyResponse, ApiError> {
        let payload = Self::parse_exact(request)?;
        let requirements = &request.payment_requirements;
        let (_, domain) = self.provider_and_domain(&requirements.network.to_string()).await?;
        let auth = &payload.authorization;

        if auth.to != requirements.pay_to {
            return Ok(VerifyResponse { is_valid: false, invalid_reason: Some(ErrorCode::InvalidRecipient), payer: None });
        }
        if auth.value < requirements.max_amount_required {
            return Ok(VerifyResponse { is_valid: false, invalid_reason: Some(ErrorCode::InsufficientAmount), payer: None });
        }
        let now = UnixTimestamp::now();
        if auth.valid_after > now || now >= auth.valid_before {
            return Ok(VerifyResponse { is_valid: false, invalid_reason: Some(ErrorCode::AuthorizationExpired), payer: None });
        }

        let payer = match eip712::recover_payer(
            &domain,
            auth.from,
            auth.to,
            auth.value,
            auth.valid_after.as_secs(),
            auth.valid_before.as_secs(),
            auth.nonce,
            &payload.signature,
        ) {
            Ok(payer) if payer == auth.from => payer,
            Ok(_) => return Ok(VerifyResponse { is_valid: false, invalid_reason: Some(ErrorCode::InvalidSignature), payer: None }),
            Err(_) => return Ok(VerifyResponse { is_valid: false, invalid_reason: Some(ErrorCode::InvalidSignature), payer: None }),
        };

        Ok(VerifyResponse { is_valid: true, invalid_reason: None, payer: Some(payer) })
    }

    async fn settle_exact(&self, request: &SettleRequest) -> Result<SettleResponse, ApiError> {
        let verify = self.verify_exact(request).await?;
        if !verify.is_valid {
            return Ok(SettleResponse {
                success: false,
                error_reason: verify.invalid_reason,
                payer: verify.payer,
                transaction: None,
                network: None,
                session: None,
            });
        }
        let payload = Self::parse_exact(request)?;
        let requirements = &request.payment_requirements;
        let (provider, _) = self.provider_and_domain(&requirements.network.to_string()).await?;
        let auth = &payload.authorization;

        let tx = provider
            .transfer_with_authorization(
                auth.from,
                auth.to,
                auth.value,
                auth.valid_after.as_secs(),
                auth.valid_before.as_secs(),
                auth.nonce,
                &payload.signature,
            )
            .await
            .map_err(|e| chain_error(&e, EscrowOperation::Charge))?;

        Ok(SettleResponse {
            success: true,
            error_reason: None,
            payer: verify.payer,
            transaction: Some(tx),
            network: Some(requirements.network.clone()),
            session: None,
        })
    }

    /// Escrow fee bounds aren't carried on the wire (spec §4.4's `minFeeBps`
    /// /`maxFeeBps` are a `PaymentInfo` field, not part of the request
    /// payload): read from `requirements.extra`, defaulting to "no fee"
    /// when a resource doesn't configure one.
    fn fee_bps_range(requirements: &x402_types::proto::PaymentRequirements) -> (u16, u16) {
        let extra = requirements.extra.as_ref();
        let min = extra.and_then(|v| v.get("minFeeBps")).and_then(|v| v.as_u64()).unwrap_or(0) as u16;
        let max = extra.and_then(|v| v.get("maxFeeBps")).and_then(|v| v.as_u64()).unwrap_or(min) as u16;
        (min, max)
    }

    fn fee_receiver(requirements: &x402_types::proto::PaymentRequirements, operator: alloy_primitives::Address) -> alloy_primitives::Address {
        requirements
            .extra
            .as_ref()
            .and_then(|v| v.get("feeReceiver"))
            .and_then(|v| v.as_str())
            .and_then(|s| alloy_primitives::Address::from_str(s).ok())
            .unwrap_or(operator)
    }

    /// `minDeposit`, also only reachable via `extra` (spec §4.4 precondition
    /// (e); `PaymentRequirements` only carries the upper bound on the wire).
    fn min_deposit(requirements: &x402_types::proto::PaymentRequirements) -> alloy_primitives::U256 {
        requirements
            .extra
            .as_ref()
            .and_then(|v| v.get("minDeposit"))
            .and_then(|v| v.as_str())
            .and_then(|s| alloy_primitives::U256::from_str(s).ok())
            .unwrap_or(alloy_primitives::U256::ZERO)
    }

    async fn verify_escrow(&self, request: &VerifyRequest) -> Result<VerifyResponse, ApiError> {
        let escrow_payload: EscrowPayload =
            serde_json::from_value(request.payment_payload.payload.clone()).map_err(|_| ApiError::new(ErrorCode::InvalidPayload))?;

        match escrow_payload {
            EscrowPayload::Creation(creation) => {
                let requirements = &request.payment_requirements;
                let (provider, domain) = self.provider_and_domain(&requirements.network.to_string()).await?;
                let input = CreateSessionInput {
                    network_id: &requirements.network.to_string(),
                    user_id: Uuid::nil(),
                    operator: provider.operator_address(),
                    payer: creation.authorization.from,
                    requirements,
                    authorization: &creation.authorization,
                    session_params: &creation.session_params,
                    signature: &creation.signature,
                    resource_cost: requirements.max_amount_required,
                    min_deposit: Self::min_deposit(requirements),
                    request_id: &creation.request_id,
                    fee_bps_range: Self::fee_bps_range(requirements),
                    fee_receiver: Self::fee_receiver(requirements, provider.operator_address()),
                };
                match self.engine.check_creation_preconditions(&input, &domain, UnixTimestamp::now()).await {
                    Ok(_) => Ok(VerifyResponse { is_valid: true, invalid_reason: None, payer: Some(creation.authorization.from) }),
                    Err(err) => Ok(VerifyResponse { is_valid: false, invalid_reason: Some(err.code), payer: Some(creation.authorization.from) }),
                }
            }
            EscrowPayload::Usage(usage) => {
                let session_id = format!("0x{}", hex::encode(usage.session.id));
                match self
                    .engine
                    .check_usage_preconditions_for_verify(&session_id, &usage.session.token, UnixTimestamp::now().as_secs() as i64)
                    .await
                {
                    Ok(session) => {
                        let payer = alloy_primitives::Address::from_str(&session.payer).ok();
                        Ok(VerifyResponse { is_valid: true, invalid_reason: None, payer })
                    }
                    Err(err) => Ok(VerifyResponse { is_valid: false, invalid_reason: Some(err.code), payer: None }),
                }
            }
        }
    }

    async fn settle_escrow(&self, request: &SettleRequest, user_id: Uuid) -> Result<SettleResponse, ApiError> {
        let escrow_payload: EscrowPayload =
            serde_json::from_value(request.payment_payload.payload.clone()).map_err(|_| ApiError::new(ErrorCode::InvalidPayload))?;

        match escrow_payload {
            EscrowPayload::Creation(creation) => {
                let requirements = &request.payment_requirements;
                let (provider, domain) = self.provider_and_domain(&requirements.network.to_string()).await?;
                let operator = provider.operator_address();
                let input = CreateSessionInput {
                    network_id: &requirements.network.to_string(),
                    user_id,
                    operator,
                    payer: creation.authorization.from,
                    requirements,
                    authorization: &creation.authorization,
                    session_params: &creation.session_params,
                    signature: &creation.signature,
                    resource_cost: requirements.max_amount_required,
                    min_deposit: Self::min_deposit(requirements),
                    request_id: &creation.request_id,
                    fee_bps_range: Self::fee_bps_range(requirements),
                    fee_receiver: Self::fee_receiver(requirements, operator),
                };
                let (session, token, balance, session_id_hash) =
                    self.engine.create_session(input, &domain, UnixTimestamp::now()).await?;
                Ok(SettleResponse {
                    success: true,
                    error_reason: None,
                    payer: alloy_primitives::Address::from_str(&session.payer).ok(),
                    transaction: None,
                    network: Some(requirements.network.clone()),
                    session: Some(SettleSessionInfo {
                        id: session_id_hash,
                        token,
                        balance: alloy_primitives::U256::from(balance.available),
                        expires_at: Some(UnixTimestamp::from_secs(session.authorization_expiry as u64)),
                    }),
                })
            }
            EscrowPayload::Usage(usage) => {
                let session_id = format!("0x{}", hex::encode(usage.session.id));
                let amount = crate::convert::u256_to_u128(usage.amount)?;
                let now_secs = UnixTimestamp::now().as_secs() as i64;
                let (session, balance, _idempotent) = self
                    .engine
                    .debit(&session_id, user_id, &usage.session.token, &usage.request_id, amount, now_secs)
                    .await?;
                let network = ChainId::from_str(&session.network_id).ok();
                Ok(SettleResponse {
                    success: true,
                    error_reason: None,
                    payer: alloy_primitives::Address::from_str(&session.payer).ok(),
                    transaction: None,
                    network,
                    session: Some(SettleSessionInfo {
                        id: usage.session.id,
                        token: None,
                        balance: alloy_primitives::U256::from(balance.available),
                        expires_at: Some(UnixTimestamp::from_secs(session.authorization_expiry as u64)),
                    }),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use serde_json::json;
    use x402_types::proto::PaymentRequirements;

    fn requirements_with_extra(extra: Option<serde_json::Value>) -> PaymentRequirements {
        serde_json::from_value(json!({
            "scheme": "escrow",
            "network": "eip155:8453",
            "maxAmountRequired": "1000000",
            "payTo": "0x1111111111111111111111111111111111111111",
            "maxTimeoutSeconds": 60,
            "asset": "0x2222222222222222222222222222222222222222",
            "extra": extra,
        }))
        .unwrap()
    }

    // The router's fee/deposit helpers are free functions parameterized only
    // by `PaymentRequirements`, not by `S`; pin a concrete `Store` so the
    // turbofish below has something to resolve.
    type Router = SchemeRouter<x402_store::MemoryStore>;

    #[test]
    fn fee_bps_range_defaults_to_zero_when_extra_is_absent() {
        let requirements = requirements_with_extra(None);
        assert_eq!(Router::fee_bps_range(&requirements), (0, 0));
    }

    #[test]
    fn fee_bps_range_reads_min_and_max_from_extra() {
        let requirements = requirements_with_extra(Some(json!({"minFeeBps": 5, "maxFeeBps": 25})));
        assert_eq!(Router::fee_bps_range(&requirements), (5, 25));
    }

    #[test]
    fn fee_bps_range_defaults_max_to_min_when_max_is_absent() {
        let requirements = requirements_with_extra(Some(json!({"minFeeBps": 15})));
        assert_eq!(Router::fee_bps_range(&requirements), (15, 15));
    }

    #[test]
    fn fee_receiver_falls_back_to_operator_when_absent() {
        let requirements = requirements_with_extra(None);
        let operator = Address::from_str("0x9999999999999999999999999999999999999999").unwrap();
        assert_eq!(Router::fee_receiver(&requirements, operator), operator);
    }

    #[test]
    fn fee_receiver_reads_override_from_extra() {
        let receiver = Address::from_str("0x8888888888888888888888888888888888888888").unwrap();
        let requirements = requirements_with_extra(Some(json!({"feeReceiver": receiver.to_string()})));
        let operator = Address::from_str("0x9999999999999999999999999999999999999999").unwrap();
        assert_eq!(Router::fee_receiver(&requirements, operator), receiver);
    }

    #[test]
    fn min_deposit_defaults_to_zero_when_absent() {
        let requirements = requirements_with_extra(None);
        assert_eq!(Router::min_deposit(&requirements), alloy_primitives::U256::ZERO);
    }

    #[test]
    fn min_deposit_reads_override_from_extra() {
        let requirements = requirements_with_extra(Some(json!({"minDeposit": "500"})));
        assert_eq!(Router::min_deposit(&requirements), alloy_primitives::U256::from(500u128));
    }
}
