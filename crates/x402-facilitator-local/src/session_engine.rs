//! C4 Session Engine: the session lifecycle state machine (spec §4.4).
//!
//! Owns session creation (the ten preconditions (a)-(j)), usage/debit with
//! inline tier-3 capture, and the void/reclaim sub-protocol that both the
//! payer-initiated reclaim endpoint (C7) and the capture scheduler's
//! tier-2 pass can drive.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use uuid::Uuid;
use x402_chain_eip155::eip712::{self, TokenEip712Domain};
use x402_chain_eip155::error::EscrowOperation;
use x402_chain_eip155::provider::Eip155Provider;
use x402_store::Store;
use x402_store::models::{Balance, NewSession, Session, SessionStatus};
use x402_types::chain::{ChainId, ChainRegistry};
use x402_types::error::ErrorCode;
use x402_types::payment_info::PaymentInfo;
use x402_types::proto::{Erc3009Authorization, PaymentRequirements, SessionParams};
use x402_types::timestamp::UnixTimestamp;

use crate::config::EngineConfig;
use crate::convert::{session_to_payment_info, u256_to_u128};
use crate::error::{ApiError, chain_error};

/// Everything needed to evaluate and, on settle, create an escrow session
/// (spec §4.4 "Create session").
pub struct CreateSessionInput<'a> {
    pub network_id: &'a str,
    pub user_id: Uuid,
    pub operator: Address,
    pub payer: Address,
    pub requirements: &'a PaymentRequirements,
    pub authorization: &'a Erc3009Authorization,
    pub session_params: &'a SessionParams,
    pub signature: &'a Bytes,
    pub resource_cost: U256,
    pub min_deposit: U256,
    pub request_id: &'a str,
    pub fee_bps_range: (u16, u16),
    pub fee_receiver: Address,
}

pub struct SessionEngine<S: Store> {
    store: Arc<S>,
    chains: Arc<ChainRegistry<Eip155Provider>>,
    config: Arc<EngineConfig>,
}

impl<S: Store> SessionEngine<S> {
    pub fn new(store: Arc<S>, chains: Arc<ChainRegistry<Eip155Provider>>, config: Arc<EngineConfig>) -> Self {
        Self { store, chains, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn provider_for(&self, network_id: &str) -> Result<&Eip155Provider, ApiError> {
        let chain_id = ChainId::from_str(network_id).map_err(|_| ApiError::new(ErrorCode::InvalidNetwork))?;
        self.chains.by_chain_id(chain_id).ok_or_else(|| ApiError::new(ErrorCode::InvalidNetwork))
    }

    /// Builds the `PaymentInfo` a creation request describes, without
    /// touching the store or chain. Used by both `/verify` (dry-run) and
    /// `/settle` (authoritative) so the two paths check identical fields.
    fn build_payment_info(input: &CreateSessionInput<'_>) -> PaymentInfo {
        PaymentInfo {
            operator: input.operator,
            payer: input.payer,
            receiver: input.requirements.pay_to,
            token: input.requirements.asset,
            max_amount: input.authorization.value,
            pre_approval_expiry: input.authorization.valid_before,
            authorization_expiry: input.session_params.authorization_expiry,
            refund_expiry: input.session_params.refund_expiry,
            min_fee_bps: input.fee_bps_range.0,
            max_fee_bps: input.fee_bps_range.1,
            fee_receiver: input.fee_receiver,
            salt: input.session_params.salt,
        }
    }

    /// Preconditions (a)-(j), checked in the order spec §4.4 lists them.
    /// Shared verbatim by `/verify` and `/settle`.
    pub async fn check_creation_preconditions(
        &self,
        input: &CreateSessionInput<'_>,
        domain: &TokenEip712Domain,
        now: UnixTimestamp,
    ) -> Result<PaymentInfo, ApiError> {
        // (a) network active
        let network = self
            .store
            .get_network(input.network_id)
            .await?
            .filter(|n| n.is_active)
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidNetwork))?;

        // (b) signature recovers to payer
        let auth = input.authorization;
        eip712::assert_signer_is_payer(
            domain,
            input.payer,
            auth.to,
            auth.value,
            auth.valid_after.as_secs(),
            auth.valid_before.as_secs(),
            auth.nonce,
            input.signature,
        )
        .map_err(|e| chain_error(&e, EscrowOperation::Authorize))?;

        let provider = self.provider_for(input.network_id).await?;

        // (c) token collector matches network's configured collector
        if auth.to != provider.token_collector() {
            return Err(ApiError::new(ErrorCode::InvalidTokenCollector));
        }

        // (d) asset matches the advertised requirements. `pay_to` has no
        // on-chain counterpart to check it against here - it is copied
        // verbatim into `session.receiver` below, not compared to any
        // network-configured address.
        if input.requirements.asset != provider.token_address() {
            return Err(ApiError::new(ErrorCode::InvalidAsset));
        }
        let _ = network; // network row validated above; fields already cross-checked via the provider

        // (e) minDeposit <= depositAmount <= maxDeposit
        if auth.value < input.min_deposit || auth.value > input.requirements.max_amount_required {
            return Err(ApiError::new(ErrorCode::DepositOutOfBounds));
        }

        // (f) depositAmount >= resourceCost
        if auth.value < input.resource_cost {
            return Err(ApiError::new(ErrorCode::DepositLessThanCost));
        }

        // (g) validAfter <= now < validBefore
        if auth.valid_after > now {
            return Err(ApiError::new(ErrorCode::AuthorizationNotYetValid));
        }
        if now >= auth.valid_before {
            return Err(ApiError::new(ErrorCode::AuthorizationExpired));
        }

        // (h) authorizationExpiry <= validBefore
        if input.session_params.authorization_expiry > auth.valid_before {
            return Err(ApiError::new(ErrorCode::SessionExpiryExceedsAuthorization));
        }
        if !(input.session_params.authorization_expiry >= now) {
            return Err(ApiError::new(ErrorCode::SessionExpiryInvalid));
        }

        // (i) ERC-3009 nonce not used on-chain
        if provider
            .is_authorization_nonce_used(input.payer, auth.nonce)
            .await
            .map_err(|e| chain_error(&e, EscrowOperation::Authorize))?
        {
            return Err(ApiError::new(ErrorCode::NonceAlreadyUsed));
        }

        // (j) payer token-balance >= deposit
        let balance = provider
            .token_balance_of(input.payer)
            .await
            .map_err(|e| chain_error(&e, EscrowOperation::Authorize))?;
        if balance < auth.value {
            return Err(ApiError::new(ErrorCode::InsufficientFunds));
        }

        let payment_info = Self::build_payment_info(input);
        payment_info
            .validate()
            .map_err(|_| ApiError::new(ErrorCode::SessionExpiryInvalid))?;
        Ok(payment_info)
    }

    /// Status/expiry/token checks shared by `/verify`'s escrow-usage dry run
    /// and the authoritative `debit` (spec §4.4 "Usage (debit)"). Ownership
    /// is layered on separately by [`Self::load_active_session_for_debit`]:
    /// a dry-run `/verify` call has no session owner in scope, only the
    /// presented token.
    async fn check_usage_preconditions(
        &self,
        session_id: &str,
        presented_session_token: &str,
        now_secs: i64,
    ) -> Result<Session, ApiError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::SessionNotFound))?;

        if session.status != SessionStatus::Active {
            return Err(ApiError::new(ErrorCode::SessionInactive));
        }
        if session.authorization_expiry <= now_secs {
            return Err(ApiError::new(ErrorCode::SessionExpired));
        }
        if !crate::auth::hashes_match(&crate::auth::sha256_hex(presented_session_token), &session.session_token_hash) {
            return Err(ApiError::new(ErrorCode::InvalidSessionToken));
        }
        Ok(session)
    }

    /// Dry-run check for `/verify` against an escrow-usage payload: no
    /// ownership context, no mutation.
    pub async fn check_usage_preconditions_for_verify(
        &self,
        session_id: &str,
        presented_session_token: &str,
        now_secs: i64,
    ) -> Result<Session, ApiError> {
        self.check_usage_preconditions(session_id, presented_session_token, now_secs).await
    }

    /// Ownership + status/expiry/token checks for the authoritative
    /// `/settle` path (spec §4.4 "Usage (debit)").
    pub async fn load_active_session_for_debit(
        &self,
        session_id: &str,
        owner_user_id: Uuid,
        presented_session_token: &str,
        now_secs: i64,
    ) -> Result<Session, ApiError> {
        let session = self.check_usage_preconditions(session_id, presented_session_token, now_secs).await?;
        if session.user_id != owner_user_id {
            return Err(ApiError::new(ErrorCode::Unauthorized));
        }
        Ok(session)
    }

    /// Authoritative session creation. Idempotent on the escrow's canonical
    /// `getHash` session id: a pre-existing active session is not
    /// re-authorized on-chain, only debited for `resource_cost` under the
    /// given `request_id` (spec §4.4, §8 scenario "escrow-creation with
    /// identical PaymentInfo submitted twice").
    pub async fn create_session(
        &self,
        input: CreateSessionInput<'_>,
        domain: &TokenEip712Domain,
        now: UnixTimestamp,
    ) -> Result<(Session, Option<String>, Balance, B256), ApiError> {
        let payment_info = self.check_creation_preconditions(&input, domain, now).await?;
        let provider = self.provider_for(input.network_id).await?;

        let session_id_hash = provider
            .payment_info_hash(&payment_info)
            .await
            .map_err(|e| chain_error(&e, EscrowOperation::Authorize))?;
        let session_id = session_id_hash.to_string();

        if let Some(existing) = self.store.get_session(&session_id).await? {
            if existing.status == SessionStatus::Active {
                let balance = self
                    .store
                    .debit_session(&session_id, u256_to_u128(input.resource_cost)?, input.request_id, None)
                    .await?;
                return Ok((existing, None, balance.balance, session_id_hash));
            }
        }

        let collector_data = Bytes::from(input.signature.to_vec());
        let authorize_tx = provider
            .authorize(&payment_info, input.authorization.value, collector_data)
            .await
            .map_err(|e| chain_error(&e, EscrowOperation::Authorize))?;

        let session_token = {
            use rand::RngCore;
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            format!("0x{}", hex::encode(bytes))
        };
        let session_token_hash = crate::auth::sha256_hex(&session_token);

        let new_session = NewSession {
            id: session_id.clone(),
            network_id: input.network_id.to_string(),
            user_id: input.user_id,
            payer: format!("{:#x}", input.payer),
            receiver: format!("{:#x}", payment_info.receiver),
            token: format!("{:#x}", payment_info.token),
            authorized_amount: u256_to_u128(input.authorization.value)?,
            authorization_expiry: input.session_params.authorization_expiry.as_secs() as i64,
            refund_expiry: input.session_params.refund_expiry.as_secs() as i64,
            pre_approval_expiry: input.authorization.valid_before.as_secs() as i64,
            operator: format!("{:#x}", payment_info.operator),
            salt: payment_info.salt.to_string(),
            min_fee_bps: payment_info.min_fee_bps as i32,
            max_fee_bps: payment_info.max_fee_bps as i32,
            fee_receiver: format!("{:#x}", payment_info.fee_receiver),
            authorize_tx_hash: authorize_tx.to_string(),
            session_token_hash,
        };

        let (session, _created) = self.store.get_or_create_session(new_session).await?;
        let debit = self
            .store
            .debit_session(&session_id, u256_to_u128(input.resource_cost)?, input.request_id, None)
            .await?;

        Ok((session, Some(session_token), debit.balance, session_id_hash))
    }

    /// Usage (debit) against an existing session (spec §4.4 "Usage (debit)").
    pub async fn debit(
        &self,
        session_id: &str,
        owner_user_id: Uuid,
        presented_session_token: &str,
        request_id: &str,
        amount: u128,
        now_secs: i64,
    ) -> Result<(Session, Balance, bool), ApiError> {
        let session = self
            .load_active_session_for_debit(session_id, owner_user_id, presented_session_token, now_secs)
            .await?;

        // Inline tier-3 capture: flush pending before it's lost past expiry.
        let seconds_to_expiry = session.authorization_expiry - now_secs;
        if seconds_to_expiry < self.config.tier3_threshold_secs {
            let balance = self.store.balance_of(session_id).await?;
            if balance.pending > 0 {
                self.inline_capture(&session, balance.pending)
                    .await
                    .map_err(|_| ApiError::new(ErrorCode::Tier3CaptureFailed))?;
            }
        }

        let outcome = self.store.debit_session(session_id, amount, request_id, None).await?;
        let refreshed = self.store.get_session(session_id).await?.unwrap_or(session);
        Ok((refreshed, outcome.balance, outcome.idempotent))
    }

    async fn inline_capture(&self, session: &Session, pending: u128) -> Result<(), ApiError> {
        let provider = self.provider_for(&session.network_id).await?;
        let payment_info = session_to_payment_info(session)?;
        let tx = provider
            .capture(&payment_info, U256::from(pending), session.min_fee_bps as u16, Address::from_str(&session.fee_receiver).unwrap_or(Address::ZERO))
            .await
            .map_err(|e| chain_error(&e, EscrowOperation::Capture))?;
        self.store.sync_capture(&session.id, pending, &tx.to_string()).await?;
        Ok(())
    }

    /// Void/reclaim sub-protocol (spec §4.4): capture pending then void if
    /// the authorization hasn't expired, otherwise void only (pending is
    /// forfeit — §8 scenario 4).
    pub async fn reclaim_session(&self, session_id: &str, caller_payer: &str, now_secs: i64) -> Result<Balance, ApiError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::SessionNotFound))?;
        if !session.payer.eq_ignore_ascii_case(caller_payer) {
            return Err(ApiError::new(ErrorCode::Unauthorized));
        }
        if session.status != SessionStatus::Active {
            return Err(ApiError::new(ErrorCode::SessionInactive));
        }

        let provider = self.provider_for(&session.network_id).await?;
        let payment_info = session_to_payment_info(&session)?;
        let balance = self.store.balance_of(session_id).await?;
        let expired = session.authorization_expiry <= now_secs;

        let capture_tx_hash = if balance.pending > 0 && !expired {
            let tx = provider
                .capture(&payment_info, U256::from(balance.pending), session.min_fee_bps as u16, Address::from_str(&session.fee_receiver).unwrap_or(Address::ZERO))
                .await
                .map_err(|e| chain_error(&e, EscrowOperation::Capture))?;
            Some(tx.to_string())
        } else {
            None
        };

        let void_tx = provider.void(&payment_info).await.map_err(|e| chain_error(&e, EscrowOperation::Void))?;

        let balance = self
            .store
            .void_session(session_id, capture_tx_hash.as_deref(), &void_tx.to_string())
            .await?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use x402_store::MemoryStore;
    use x402_store::models::{Network, NewSession};

    fn engine(store: Arc<MemoryStore>) -> SessionEngine<MemoryStore> {
        let chains = Arc::new(ChainRegistry::new(HashMap::new()));
        SessionEngine::new(store, chains, Arc::new(EngineConfig::default()))
    }

    fn sample_network(active: bool) -> Network {
        Network {
            id: "eip155:8453".to_string(),
            chain_id: 8453,
            rpc_url: "https://example.invalid".to_string(),
            escrow_address: "0x1111111111111111111111111111111111111111".to_string(),
            token_address: "0x2222222222222222222222222222222222222222".to_string(),
            token_collector_address: "0x3333333333333333333333333333333333333333".to_string(),
            multicall3_address: None,
            token_name: "USD Coin".to_string(),
            token_version: "2".to_string(),
            is_active: active,
        }
    }

    fn sample_session() -> NewSession {
        NewSession {
            id: "0xsession".to_string(),
            network_id: "eip155:8453".to_string(),
            user_id: Uuid::new_v4(),
            payer: "0x4444444444444444444444444444444444444444".to_string(),
            receiver: "0x5555555555555555555555555555555555555555".to_string(),
            token: "0x2222222222222222222222222222222222222222".to_string(),
            authorized_amount: 100_000,
            authorization_expiry: UnixTimestamp::now().as_secs() as i64 + 3600,
            refund_expiry: UnixTimestamp::now().as_secs() as i64 + 7200,
            pre_approval_expiry: UnixTimestamp::now().as_secs() as i64 - 1,
            operator: "0x6666666666666666666666666666666666666666".to_string(),
            salt: "1".to_string(),
            min_fee_bps: 0,
            max_fee_bps: 0,
            fee_receiver: "0x6666666666666666666666666666666666666666".to_string(),
            authorize_tx_hash: "0xauth".to_string(),
            session_token_hash: crate::auth::sha256_hex("session-token"),
        }
    }

    #[tokio::test]
    async fn check_usage_preconditions_rejects_unknown_session() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let err = engine
            .check_usage_preconditions_for_verify("0xmissing", "tok", UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn check_usage_preconditions_rejects_wrong_token() {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_session(sample_session()).await.unwrap();
        let engine = engine(store);
        let err = engine
            .check_usage_preconditions_for_verify("0xsession", "wrong-token", UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSessionToken);
    }

    #[tokio::test]
    async fn check_usage_preconditions_rejects_expired_session() {
        let store = Arc::new(MemoryStore::new());
        let mut new_session = sample_session();
        new_session.authorization_expiry = UnixTimestamp::now().as_secs() as i64 - 10;
        store.get_or_create_session(new_session).await.unwrap();
        let engine = engine(store);
        let err = engine
            .check_usage_preconditions_for_verify("0xsession", "session-token", UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionExpired);
    }

    #[tokio::test]
    async fn check_usage_preconditions_accepts_active_session_with_matching_token() {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_session(sample_session()).await.unwrap();
        let engine = engine(store);
        let session = engine
            .check_usage_preconditions_for_verify("0xsession", "session-token", UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap();
        assert_eq!(session.id, "0xsession");
    }

    #[tokio::test]
    async fn load_active_session_for_debit_rejects_non_owner() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = store.get_or_create_session(sample_session()).await.unwrap();
        let engine = engine(store);
        let err = engine
            .load_active_session_for_debit("0xsession", Uuid::new_v4(), "session-token", UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        let _ = session;
    }

    #[tokio::test]
    async fn create_session_preconditions_reject_inactive_network() {
        let store = Arc::new(MemoryStore::new());
        store.seed_network(sample_network(false));
        let chains = Arc::new(ChainRegistry::new(HashMap::new()));
        let engine = SessionEngine::new(store, chains, Arc::new(EngineConfig::default()));

        let requirements = x402_types::proto::PaymentRequirements {
            scheme: x402_types::proto::Scheme::Escrow,
            network: ChainId::from_str("eip155:8453").unwrap(),
            max_amount_required: U256::from(1_000u128),
            pay_to: Address::ZERO,
            max_timeout_seconds: 60,
            asset: Address::ZERO,
            extra: None,
        };
        let authorization = Erc3009Authorization {
            from: Address::ZERO,
            to: Address::ZERO,
            value: U256::from(1_000u128),
            valid_after: UnixTimestamp::from_secs(0),
            valid_before: UnixTimestamp::from_secs(u32::MAX as u64),
            nonce: B256::ZERO,
        };
        let session_params =
            SessionParams { salt: U256::from(1u128), authorization_expiry: UnixTimestamp::now(), refund_expiry: UnixTimestamp::now() };
        let signature = Bytes::new();
        let input = CreateSessionInput {
            network_id: "eip155:8453",
            user_id: Uuid::nil(),
            operator: Address::ZERO,
            payer: Address::ZERO,
            requirements: &requirements,
            authorization: &authorization,
            session_params: &session_params,
            signature: &signature,
            resource_cost: U256::from(1_000u128),
            min_deposit: U256::ZERO,
            request_id: "req-1",
            fee_bps_range: (0, 0),
            fee_receiver: Address::ZERO,
        };
        let domain =
            TokenEip712Domain { name: "USD Coin".to_string(), version: "2".to_string(), chain_id: 8453, verifying_contract: Address::ZERO };
        let err = engine.check_creation_preconditions(&input, &domain, UnixTimestamp::now()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNetwork);
    }

    #[tokio::test]
    async fn reclaim_session_rejects_unknown_session() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let err = engine.reclaim_session("0xmissing", "0xpayer", UnixTimestamp::now().as_secs() as i64).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn reclaim_session_rejects_non_owner() {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_session(sample_session()).await.unwrap();
        let engine = engine(store);
        let err = engine
            .reclaim_session("0xsession", "0xnotthepayer", UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn reclaim_session_rejects_already_voided_session() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = store.get_or_create_session(sample_session()).await.unwrap();
        store.void_session(&session.id, None, "0xvoid").await.unwrap();
        let engine = engine(store);
        let err = engine
            .reclaim_session("0xsession", &session.payer, UnixTimestamp::now().as_secs() as i64)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionInactive);
    }
}
