//! C6 Capture Scheduler: periodically sweeps tier-1 (over-threshold) and
//! tier-2 (near-expiry) sessions into batched on-chain captures (spec §4.6).
//!
//! Tier-3 (inline, at-risk-of-loss) capture is the Session Engine's concern
//! at debit time, not this scheduler's.

use std::collections::HashMap;
use std::sync::Arc;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use x402_chain_eip155::provider::{Eip155Provider, EscrowCall};
use x402_store::Store;
use x402_store::models::Session;
use x402_types::chain::{ChainId, ChainRegistry};

use crate::config::EngineConfig;
use crate::convert::session_to_payment_info;

pub struct CaptureScheduler<S: Store> {
    store: Arc<S>,
    chains: Arc<ChainRegistry<Eip155Provider>>,
    config: Arc<EngineConfig>,
}

#[derive(Debug, Default)]
pub struct CaptureRunSummary {
    pub attempted: usize,
    pub captured: usize,
    pub failed: usize,
}

/// Unions tier-1 and tier-2 session lists, deduplicated by session id, each
/// tagged with the tier whose query matched it. A session present in both
/// keeps its tier-1 tag: tier-1 fired on pending amount, the stronger signal.
fn dedupe_with_tier(tier1: Vec<Session>, tier2: Vec<Session>) -> Vec<(Session, i16)> {
    let mut sessions: HashMap<String, Session> = HashMap::new();
    let mut tiers: HashMap<String, i16> = HashMap::new();

    for session in tier1 {
        tiers.insert(session.id.clone(), 1);
        sessions.insert(session.id.clone(), session);
    }
    for session in tier2 {
        tiers.entry(session.id.clone()).or_insert(2);
        sessions.entry(session.id.clone()).or_insert(session);
    }

    sessions
        .into_values()
        .map(|session| {
            let tier = tiers.get(&session.id).copied().unwrap_or(1);
            (session, tier)
        })
        .collect()
}

impl<S: Store> CaptureScheduler<S> {
    pub fn new(store: Arc<S>, chains: Arc<ChainRegistry<Eip155Provider>>, config: Arc<EngineConfig>) -> Self {
        Self { store, chains, config }
    }

    /// One scheduler pass: tier-1 (`pending >= capture_threshold`) union
    /// tier-2 (`authorization_expiry` within `capture_pre_expiry_window_secs`
    /// and `pending > 0`), deduplicated by session id, grouped per network
    /// and aggregated into one Multicall3 tx per network (spec §4.6).
    pub async fn run_once(&self, now_secs: i64) -> Result<CaptureRunSummary, x402_store::StoreError> {
        let tier1 = self
            .store
            .sessions_needing_capture_tier1(self.config.capture_threshold, self.config.capture_batch_size)
            .await?;
        let tier2 = self
            .store
            .sessions_needing_capture_tier2(now_secs + self.config.capture_pre_expiry_window_secs, self.config.capture_batch_size)
            .await?;

        let mut by_network: HashMap<String, Vec<(Session, i16)>> = HashMap::new();
        for (session, tier) in dedupe_with_tier(tier1, tier2) {
            by_network.entry(session.network_id.clone()).or_default().push((session, tier));
        }

        let mut summary = CaptureRunSummary::default();
        for (network_id, sessions) in by_network {
            let outcome = self.capture_network_batch(&network_id, sessions).await?;
            summary.attempted += outcome.attempted;
            summary.captured += outcome.captured;
            summary.failed += outcome.failed;
        }
        Ok(summary)
    }

    async fn capture_network_batch(
        &self,
        network_id: &str,
        sessions: Vec<(Session, i16)>,
    ) -> Result<CaptureRunSummary, x402_store::StoreError> {
        let mut summary = CaptureRunSummary { attempted: sessions.len(), ..Default::default() };

        let chain_id = match ChainId::from_str(network_id) {
            Ok(id) => id,
            Err(_) => {
                summary.failed = sessions.len();
                return Ok(summary);
            }
        };
        let Some(provider) = self.chains.by_chain_id(chain_id) else {
            summary.failed = sessions.len();
            return Ok(summary);
        };

        // (session, tier, amount, call) rows survive conversion; rows that
        // fail to parse are recorded as failed captures without being
        // submitted.
        let mut batch: Vec<(&Session, i16, u128, EscrowCall)> = Vec::new();
        for (session, tier) in &sessions {
            let balance = self.store.balance_of(&session.id).await?;
            if balance.pending == 0 {
                continue;
            }
            let payment_info = match session_to_payment_info(session) {
                Ok(p) => p,
                Err(_) => {
                    self.store
                        .record_failed_capture(&session.id, network_id, balance.pending, *tier)
                        .await?;
                    summary.failed += 1;
                    continue;
                }
            };
            let fee_receiver = Address::from_str(&session.fee_receiver).unwrap_or(Address::ZERO);
            let call = provider.encode_capture(&payment_info, U256::from(balance.pending), session.min_fee_bps as u16, fee_receiver);
            batch.push((session, *tier, balance.pending, call));
        }

        if batch.is_empty() {
            return Ok(summary);
        }

        let calls: Vec<EscrowCall> = batch.iter().map(|(_, _, _, c)| c.clone()).collect();
        match provider.send_multicall(calls).await {
            Ok((tx_hash, per_call_ok)) => {
                // `send_multicall`'s per-call results currently only reflect
                // whether the outer aggregate3 tx reverted, not individual
                // call success (see its doc comment) - treat every call in a
                // successful tx as confirmed, conservatively.
                for (i, (session, tier, amount, _)) in batch.iter().enumerate() {
                    let ok = per_call_ok.get(i).copied().unwrap_or(false);
                    if ok {
                        self.store.batch_capture(&session.id, &tx_hash.to_string(), *tier).await?;
                        summary.captured += 1;
                    } else {
                        self.store.record_failed_capture(&session.id, network_id, *amount, *tier).await?;
                        summary.failed += 1;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, network_id, "multicall capture batch failed outright");
                for (session, tier, amount, _) in &batch {
                    self.store.record_failed_capture(&session.id, network_id, *amount, *tier).await?;
                }
                summary.failed += batch.len();
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

    fn scheduler(store: Arc<MemoryStore>, config: EngineConfig) -> CaptureScheduler<MemoryStore> {
        let chains = Arc::new(ChainRegistry::new(HashMap::new()));
        CaptureScheduler::new(store, chains, Arc::new(config))
    }

    fn sample_session(id: &str, authorized: u128, expiry_secs_from_now: i64) -> NewSession {
        NewSession {
            id: id.to_string(),
            network_id: "eip155:8453".to_string(),
            user_id: Uuid::new_v4(),
            payer: "0x1111111111111111111111111111111111111111".to_string(),
            receiver: "0x2222222222222222222222222222222222222222".to_string(),
            token: "0x3333333333333333333333333333333333333333".to_string(),
            authorized_amount: authorized,
            authorization_expiry: Utc::now().timestamp() + expiry_secs_from_now,
            refund_expiry: Utc::now().timestamp() + expiry_secs_from_now + 100,
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
    async fn run_once_with_no_sessions_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let summary = scheduler(store, EngineConfig::default()).run_once(0).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.captured, 0);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn run_once_fails_sessions_on_a_network_with_no_configured_provider() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = store.get_or_create_session(sample_session("s1", 100_000_000, 3600)).await.unwrap();
        store.debit_session(&session.id, 10_000_000, "req-a", None).await.unwrap();

        let mut config = EngineConfig::default();
        config.capture_threshold = 1_000_000;
        let summary = scheduler(store, config).run_once(Utc::now().timestamp()).await.unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.captured, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn run_once_skips_sessions_below_both_tier_thresholds() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = store.get_or_create_session(sample_session("s2", 100_000, 100_000)).await.unwrap();
        store.debit_session(&session.id, 1_000, "req-a", None).await.unwrap();

        let summary = scheduler(store, EngineConfig::default()).run_once(Utc::now().timestamp()).await.unwrap();
        assert_eq!(summary.attempted, 0);
    }

    #[tokio::test]
    async fn run_once_dedupes_a_session_matching_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        // Near expiry (tier-2) and over threshold (tier-1): must only be counted once.
        let (session, _) = store.get_or_create_session(sample_session("s3", 100_000_000, 60)).await.unwrap();
        store.debit_session(&session.id, 10_000_000, "req-a", None).await.unwrap();

        let mut config = EngineConfig::default();
        config.capture_threshold = 1_000_000;
        config.capture_pre_expiry_window_secs = 3600;
        let summary = scheduler(store, config).run_once(Utc::now().timestamp()).await.unwrap();
        assert_eq!(summary.attempted, 1);
    }

    fn bare_session(id: &str) -> Session {
        let new = sample_session(id, 100_000, 3600);
        Session {
            id: new.id,
            network_id: new.network_id,
            user_id: new.user_id,
            payer: new.payer,
            receiver: new.receiver,
            token: new.token,
            authorized_amount: new.authorized_amount.to_string(),
            authorization_expiry: new.authorization_expiry,
            refund_expiry: new.refund_expiry,
            pre_approval_expiry: new.pre_approval_expiry,
            operator: new.operator,
            salt: new.salt,
            min_fee_bps: new.min_fee_bps,
            max_fee_bps: new.max_fee_bps,
            fee_receiver: new.fee_receiver,
            authorize_tx_hash: new.authorize_tx_hash,
            void_tx_hash: None,
            session_token_hash: new.session_token_hash,
            status: x402_store::models::SessionStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dedupe_with_tier_tags_tier_only_sessions_correctly() {
        let tier1_only = bare_session("s4");
        let tier2_only = bare_session("s5");

        let tagged = dedupe_with_tier(vec![tier1_only], vec![tier2_only]);
        let mut by_id: HashMap<String, i16> = tagged.into_iter().map(|(s, t)| (s.id, t)).collect();

        assert_eq!(by_id.remove("s4"), Some(1));
        assert_eq!(by_id.remove("s5"), Some(2));
        assert!(by_id.is_empty());
    }

    #[test]
    fn dedupe_with_tier_prefers_tier_one_when_a_session_matches_both() {
        let both = bare_session("s6");
        let tagged = dedupe_with_tier(vec![both.clone()], vec![both]);
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].1, 1);
    }
}
