//! C7 Reclaim Orchestrator: lets a payer recover escrowed funds early,
//! either one session at a time or across every active session they own
//! (spec §4.7).
//!
//! Single reclaim reuses [`crate::session_engine::SessionEngine::reclaim_session`]
//! directly (its own capture-then-void decision already matches §4.4's
//! void/reclaim sub-protocol). Reclaim-all additionally aggregates the
//! capture+void pairs for all of a payer's sessions on one network into a
//! single Multicall3 transaction, same simplification as the capture
//! scheduler: a reverted aggregate tx fails the whole network's batch, a
//! successful one is read back per-call from `send_multicall`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use x402_chain_eip155::provider::{Eip155Provider, EscrowCall};
use x402_store::Store;
use x402_store::models::Session;
use x402_types::chain::{ChainId, ChainRegistry};
use x402_types::error::ErrorCode;

use crate::convert::session_to_payment_info;
use crate::error::ApiError;

pub struct ReclaimOrchestrator<S: Store> {
    store: Arc<S>,
    chains: Arc<ChainRegistry<Eip155Provider>>,
}

#[derive(Debug, Default)]
pub struct ReclaimAllSummary {
    pub attempted: usize,
    pub reclaimed: usize,
    pub failed: usize,
    /// Sum of `available` refunded to the payer across every voided session
    /// (spec §4.7 "total reclaimed").
    pub total_reclaimed: u128,
    /// One Multicall3 tx hash per network whose batch confirmed.
    pub tx_hashes: HashMap<String, String>,
    pub errors: Vec<String>,
}

impl<S: Store> ReclaimOrchestrator<S> {
    pub fn new(store: Arc<S>, chains: Arc<ChainRegistry<Eip155Provider>>) -> Self {
        Self { store, chains }
    }

    /// Reclaims every active session a payer owns with `available > 0`,
    /// grouped per network and aggregated into one Multicall3 tx per network.
    pub async fn reclaim_all(&self, payer: &str, now_secs: i64) -> Result<ReclaimAllSummary, ApiError> {
        let sessions = self.store.active_sessions_for_payer(payer).await?;
        if sessions.is_empty() {
            return Ok(ReclaimAllSummary::default());
        }

        let mut by_network: HashMap<String, Vec<Session>> = HashMap::new();
        for session in sessions {
            by_network.entry(session.network_id.clone()).or_default().push(session);
        }

        let mut summary = ReclaimAllSummary::default();
        for (network_id, sessions) in by_network {
            let outcome = self.reclaim_network_batch(&network_id, sessions, now_secs).await?;
            summary.attempted += outcome.attempted;
            summary.reclaimed += outcome.reclaimed;
            summary.failed += outcome.failed;
            summary.total_reclaimed += outcome.total_reclaimed;
            summary.tx_hashes.extend(outcome.tx_hashes);
            summary.errors.extend(outcome.errors);
        }
        Ok(summary)
    }

    async fn reclaim_network_batch(
        &self,
        network_id: &str,
        sessions: Vec<Session>,
        now_secs: i64,
    ) -> Result<ReclaimAllSummary, ApiError> {
        let mut summary = ReclaimAllSummary { attempted: sessions.len(), ..Default::default() };

        let chain_id = ChainId::from_str(network_id).map_err(|_| ApiError::new(ErrorCode::InvalidNetwork))?;
        let provider = self.chains.by_chain_id(chain_id).ok_or_else(|| ApiError::new(ErrorCode::InvalidNetwork))?;

        // Each session contributes one or two calls (capture-if-pending, then
        // void); `boundaries` records how many calls belong to each session
        // so the flat per-call result vector can be re-associated afterward.
        let mut calls: Vec<EscrowCall> = Vec::new();
        let mut plan: Vec<(&Session, u128, bool)> = Vec::new(); // (session, available, had_capture_call)

        for session in &sessions {
            let balance = self.store.balance_of(&session.id).await?;
            let payment_info = match session_to_payment_info(session) {
                Ok(p) => p,
                Err(_) => {
                    summary.failed += 1;
                    summary.errors.push(format!("{}: malformed session row", session.id));
                    continue;
                }
            };
            let expired = session.authorization_expiry <= now_secs;
            let had_capture_call = balance.pending > 0 && !expired;
            if had_capture_call {
                let fee_receiver = Address::from_str(&session.fee_receiver).unwrap_or(Address::ZERO);
                calls.push(provider.encode_capture(&payment_info, U256::from(balance.pending), session.min_fee_bps as u16, fee_receiver));
            }
            calls.push(provider.encode_void(&payment_info));
            plan.push((session, balance.available, had_capture_call));
        }

        if calls.is_empty() {
            return Ok(summary);
        }

        match provider.send_multicall(calls).await {
            Ok((tx_hash, per_call_ok)) => {
                let mut idx = 0usize;
                for (session, available, had_capture_call) in plan {
                    let capture_ok = if had_capture_call {
                        let ok = per_call_ok.get(idx).copied().unwrap_or(false);
                        idx += 1;
                        ok
                    } else {
                        true
                    };
                    let void_ok = per_call_ok.get(idx).copied().unwrap_or(false);
                    idx += 1;

                    if void_ok {
                        let capture_hash = if had_capture_call && capture_ok { Some(tx_hash.to_string()) } else { None };
                        self.store.void_session(&session.id, capture_hash.as_deref(), &tx_hash.to_string()).await?;
                        summary.reclaimed += 1;
                        summary.total_reclaimed += available;
                        summary.tx_hashes.insert(network_id.to_string(), tx_hash.to_string());
                    } else {
                        summary.failed += 1;
                        summary.errors.push(format!("{}: {}", session.id, "void call did not confirm"));
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, network_id, "multicall reclaim-all batch failed outright");
                summary.failed += plan.len();
                summary.errors.push(format!("{network_id}: multicall reclaim-all batch failed outright: {err}"));
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use x402_store::MemoryStore;
    use x402_store::models::NewSession;

    fn orchestrator(store: Arc<MemoryStore>) -> ReclaimOrchestrator<MemoryStore> {
        let chains = Arc::new(ChainRegistry::new(HashMap::new()));
        ReclaimOrchestrator::new(store, chains)
    }

    fn sample_session(id: &str, payer: &str, authorized: u128) -> NewSession {
        NewSession {
            id: id.to_string(),
            network_id: "eip155:8453".to_string(),
            user_id: Uuid::new_v4(),
            payer: payer.to_string(),
            receiver: "0x2222222222222222222222222222222222222222".to_string(),
            token: "0x3333333333333333333333333333333333333333".to_string(),
            authorized_amount: authorized,
            authorization_expiry: Utc::now().timestamp() + 3600,
            refund_expiry: Utc::now().timestamp() + 7200,
            pre_approval_expiry: Utc::now().timestamp() - 1,
            operator: "0x4444444444444444444444444444444444444444".to_string(),
            salt: "1".to_string(),
            min_fee_bps: 0,
            max_fee_bps: 0,
            fee_receiver: "0x4444444444444444444444444444444444444444".to_string(),
            authorize_tx_hash: "0xauth".to_string(),
            session_token_hash: "tokhash".to_string(),
        }
    }

    #[tokio::test]
    async fn reclaim_all_with_no_sessions_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let summary = orchestrator(store).reclaim_all("0xpayer", 0).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.reclaimed, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_reclaimed, 0);
        assert!(summary.tx_hashes.is_empty());
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn reclaim_all_fails_sessions_on_a_network_with_no_configured_provider() {
        let store = Arc::new(MemoryStore::new());
        let payer = "0x1111111111111111111111111111111111111111";
        store.get_or_create_session(sample_session("s1", payer, 100_000)).await.unwrap();

        let err = orchestrator(store).reclaim_all(payer, Utc::now().timestamp()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNetwork);
    }

    #[tokio::test]
    async fn reclaim_all_only_considers_the_calling_payer_sessions() {
        let store = Arc::new(MemoryStore::new());
        let other_payer = "0x9999999999999999999999999999999999999999";
        store.get_or_create_session(sample_session("s2", other_payer, 100_000)).await.unwrap();

        let summary = orchestrator(store).reclaim_all("0x1111111111111111111111111111111111111111", 0).await.unwrap();
        assert_eq!(summary.attempted, 0);
    }
}
