//! An in-memory `Store` used by the session engine's own test suite, so its
//! concurrency and balance-invariant tests don't need a live Postgres
//! (grounded on the cowprotocol-services `database` crate convention of
//! testing query logic behind a trait).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::StoreError;
use crate::models::{
    ApiKey, Balance, CaptureLog, CaptureLogStatus, DebitOutcome, NewSession, Network, Session,
    SessionStatus, UsageLog, UsageLogStatus,
};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    networks: HashMap<String, Network>,
    api_keys: HashMap<Uuid, ApiKey>,
    sessions: HashMap<String, Session>,
    usage_logs: Vec<UsageLog>,
    capture_logs: Vec<CaptureLog>,
}

/// A process-local, mutex-guarded `Store`. Not for production use: there is
/// no durability and no cross-process locking, only the invariant-preserving
/// logic the real Postgres implementation also enforces.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_network(&self, network: Network) {
        self.inner.lock().unwrap().networks.insert(network.id.clone(), network);
    }

    pub fn seed_api_key(&self, key: ApiKey) {
        self.inner.lock().unwrap().api_keys.insert(key.id, key);
    }

    fn balance_of_locked(inner: &Inner, session_id: &str, authorized: u128) -> Balance {
        let captured: u128 = inner
            .usage_logs
            .iter()
            .filter(|l| l.session_id == session_id && l.status == UsageLogStatus::Settled)
            .map(|l| l.amount.parse::<u128>().unwrap_or(0))
            .sum();
        let pending: u128 = inner
            .usage_logs
            .iter()
            .filter(|l| l.session_id == session_id && l.status == UsageLogStatus::Pending)
            .map(|l| l.amount.parse::<u128>().unwrap_or(0))
            .sum();
        let available = authorized.saturating_sub(captured + pending);
        Balance { authorized, captured, pending, available }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_network(&self, id: &str) -> Result<Option<Network>, StoreError> {
        Ok(self.inner.lock().unwrap().networks.get(id).cloned())
    }

    async fn list_active_networks(&self) -> Result<Vec<Network>, StoreError> {
        Ok(self.inner.lock().unwrap().networks.values().filter(|n| n.is_active).cloned().collect())
    }

    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .api_keys
            .values()
            .find(|k| k.secret_hash == secret_hash)
            .cloned())
    }

    async fn touch_api_key_last_used(&self, api_key_id: Uuid) {
        if let Some(key) = self.inner.lock().unwrap().api_keys.get_mut(&api_key_id) {
            key.last_used_at = Some(Utc::now());
        }
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.lock().unwrap().sessions.get(id).cloned())
    }

    async fn get_or_create_session(&self, new: NewSession) -> Result<(Session, bool), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.sessions.get(&new.id) {
            return Ok((existing.clone(), false));
        }
        let session = Session {
            id: new.id.clone(),
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
            status: SessionStatus::Active,
            created_at: Utc::now(),
        };
        inner.sessions.insert(new.id, session.clone());
        Ok((session, true))
    }

    async fn balance_of(&self, session_id: &str) -> Result<Balance, StoreError> {
        let inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        Ok(Self::balance_of_locked(&inner, session_id, authorized))
    }

    async fn debit_session(
        &self,
        session_id: &str,
        amount: u128,
        request_id: &str,
        description: Option<&str>,
    ) -> Result<DebitOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();

        if session.status != SessionStatus::Active {
            return Err(StoreError::SessionNotActive(session_id.to_string()));
        }
        if session.authorization_expiry < Utc::now().timestamp() {
            return Err(StoreError::SessionExpired(session_id.to_string()));
        }

        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);

        let already_logged =
            inner.usage_logs.iter().any(|l| l.session_id == session_id && l.request_id == request_id);
        if already_logged {
            let balance = Self::balance_of_locked(&inner, session_id, authorized);
            return Ok(DebitOutcome { idempotent: true, balance });
        }

        let balance = Self::balance_of_locked(&inner, session_id, authorized);
        if amount > balance.available {
            return Err(StoreError::InsufficientBalance {
                session_id: session_id.to_string(),
                amount,
                available: balance.available,
            });
        }

        inner.usage_logs.push(UsageLog {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            request_id: request_id.to_string(),
            amount: amount.to_string(),
            description: description.map(str::to_string),
            status: UsageLogStatus::Pending,
            capture_log_id: None,
            created_at: Utc::now(),
        });

        let new_balance = Balance {
            authorized,
            captured: balance.captured,
            pending: balance.pending + amount,
            available: balance.available - amount,
        };
        Ok(DebitOutcome { idempotent: false, balance: new_balance })
    }

    async fn batch_capture(
        &self,
        session_id: &str,
        tx_hash: &str,
        tier: i16,
    ) -> Result<Balance, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        let balance = Self::balance_of_locked(&inner, session_id, authorized);

        if balance.pending > 0 {
            let capture_log_id = Uuid::new_v4();
            inner.capture_logs.push(CaptureLog {
                id: capture_log_id,
                session_id: session_id.to_string(),
                network_id: session.network_id.clone(),
                amount: balance.pending.to_string(),
                tx_hash: tx_hash.to_string(),
                tier,
                status: CaptureLogStatus::Confirmed,
                created_at: Utc::now(),
            });
            for log in inner.usage_logs.iter_mut() {
                if log.session_id == session_id && log.status == UsageLogStatus::Pending {
                    log.status = UsageLogStatus::Settled;
                    log.capture_log_id = Some(capture_log_id);
                }
            }
        }

        Ok(Balance {
            authorized,
            captured: balance.captured + balance.pending,
            pending: 0,
            available: balance.available,
        })
    }

    async fn sync_capture(
        &self,
        session_id: &str,
        amount: u128,
        tx_hash: &str,
    ) -> Result<Balance, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);

        let mut pending_ids: Vec<Uuid> = inner
            .usage_logs
            .iter()
            .filter(|l| l.session_id == session_id && l.status == UsageLogStatus::Pending)
            .map(|l| l.id)
            .collect();
        pending_ids.sort_by_key(|id| {
            inner.usage_logs.iter().find(|l| l.id == *id).unwrap().created_at
        });

        let capture_log_id = Uuid::new_v4();
        let mut inserted = false;
        let mut remaining = amount;

        for id in pending_ids {
            if remaining == 0 {
                break;
            }
            let log_amount: u128 = inner
                .usage_logs
                .iter()
                .find(|l| l.id == id)
                .map(|l| l.amount.parse().unwrap_or(0))
                .unwrap_or(0);
            if log_amount > remaining {
                break;
            }
            if !inserted {
                inner.capture_logs.push(CaptureLog {
                    id: capture_log_id,
                    session_id: session_id.to_string(),
                    network_id: session.network_id.clone(),
                    amount: amount.to_string(),
                    tx_hash: tx_hash.to_string(),
                    tier: 3,
                    status: CaptureLogStatus::Confirmed,
                    created_at: Utc::now(),
                });
                inserted = true;
            }
            if let Some(log) = inner.usage_logs.iter_mut().find(|l| l.id == id) {
                log.status = UsageLogStatus::Settled;
                log.capture_log_id = Some(capture_log_id);
            }
            remaining -= log_amount;
        }

        Ok(Self::balance_of_locked(&inner, session_id, authorized))
    }

    async fn void_session(
        &self,
        session_id: &str,
        capture_tx_hash: Option<&str>,
        void_tx_hash: &str,
    ) -> Result<Balance, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
            .clone();
        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        let balance = Self::balance_of_locked(&inner, session_id, authorized);

        let mut final_captured = balance.captured;
        let mut final_pending = balance.pending;
        if balance.pending > 0 {
            if let Some(capture_tx_hash) = capture_tx_hash {
                let capture_log_id = Uuid::new_v4();
                inner.capture_logs.push(CaptureLog {
                    id: capture_log_id,
                    session_id: session_id.to_string(),
                    network_id: session.network_id.clone(),
                    amount: balance.pending.to_string(),
                    tx_hash: capture_tx_hash.to_string(),
                    tier: 3,
                    status: CaptureLogStatus::Confirmed,
                    created_at: Utc::now(),
                });
                for log in inner.usage_logs.iter_mut() {
                    if log.session_id == session_id && log.status == UsageLogStatus::Pending {
                        log.status = UsageLogStatus::Settled;
                        log.capture_log_id = Some(capture_log_id);
                    }
                }
                final_captured += balance.pending;
                final_pending = 0;
            }
        }

        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.status = SessionStatus::Voided;
            session.void_tx_hash = Some(void_tx_hash.to_string());
        }

        Ok(Balance { authorized, captured: final_captured, pending: final_pending, available: balance.available })
    }

    async fn record_failed_capture(
        &self,
        session_id: &str,
        network_id: &str,
        amount: u128,
        tier: i16,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.capture_logs.push(CaptureLog {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            network_id: network_id.to_string(),
            amount: amount.to_string(),
            tx_hash: String::new(),
            tier,
            status: CaptureLogStatus::Failed,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn sessions_needing_capture_tier1(
        &self,
        threshold: u128,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for session in inner.sessions.values() {
            if session.status != SessionStatus::Active {
                continue;
            }
            let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
            let balance = Self::balance_of_locked(&inner, &session.id, authorized);
            if balance.pending >= threshold {
                out.push(session.clone());
            }
            if out.len() as i64 >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn sessions_needing_capture_tier2(
        &self,
        expiry_before: i64,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for session in inner.sessions.values() {
            if session.status != SessionStatus::Active || session.authorization_expiry > expiry_before {
                continue;
            }
            let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
            let balance = Self::balance_of_locked(&inner, &session.id, authorized);
            if balance.pending > 0 {
                out.push(session.clone());
            }
            if out.len() as i64 >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn active_sessions_for_payer(&self, payer: &str) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for session in inner.sessions.values() {
            if session.status != SessionStatus::Active || session.payer != payer {
                continue;
            }
            let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
            let balance = Self::balance_of_locked(&inner, &session.id, authorized);
            if balance.available > 0 {
                out.push(session.clone());
            }
        }
        Ok(out)
    }

    async fn list_sessions_for_user(
        &self,
        user_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && status.is_none_or(|st| s.status == st))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn usage_logs_for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<UsageLog>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut logs: Vec<UsageLog> =
            inner.usage_logs.iter().filter(|l| l.session_id == session_id).cloned().collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn capture_logs_for_session(&self, session_id: &str) -> Result<Vec<CaptureLog>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut logs: Vec<CaptureLog> =
            inner.capture_logs.iter().filter(|l| l.session_id == session_id).cloned().collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    async fn mark_capture_log_status(
        &self,
        capture_log_id: Uuid,
        status: CaptureLogStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(log) = inner.capture_logs.iter_mut().find(|l| l.id == capture_log_id) {
            log.status = status;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSession;

    fn sample_session(id: &str, authorized: u128, expiry_secs_from_now: i64) -> NewSession {
        NewSession {
            id: id.to_string(),
            network_id: "eip155:8453".to_string(),
            user_id: Uuid::new_v4(),
            payer: "0xpayer".to_string(),
            receiver: "0xreceiver".to_string(),
            token: "0xtoken".to_string(),
            authorized_amount: authorized,
            authorization_expiry: Utc::now().timestamp() + expiry_secs_from_now,
            refund_expiry: Utc::now().timestamp() + expiry_secs_from_now + 100,
            pre_approval_expiry: Utc::now().timestamp() - 1,
            operator: "0xoperator".to_string(),
            salt: "1".to_string(),
            min_fee_bps: 0,
            max_fee_bps: 0,
            fee_receiver: "0xfee".to_string(),
            authorize_tx_hash: "0xauth".to_string(),
            session_token_hash: "tokhash".to_string(),
        }
    }

    #[tokio::test]
    async fn debit_then_balance_matches_scenario_1() {
        let store = MemoryStore::new();
        let (session, created) =
            store.get_or_create_session(sample_session("s1", 100_000, 3600)).await.unwrap();
        assert!(created);

        for i in 0..3 {
            store.debit_session(&session.id, 10_000, &format!("req-{i}"), None).await.unwrap();
        }

        let balance = store.balance_of(&session.id).await.unwrap();
        assert_eq!(balance.captured, 0);
        assert_eq!(balance.pending, 30_000);
        assert_eq!(balance.available, 70_000);
    }

    #[tokio::test]
    async fn duplicate_request_id_is_idempotent() {
        let store = MemoryStore::new();
        let (session, _) = store.get_or_create_session(sample_session("s2", 50_000, 3600)).await.unwrap();

        let first = store.debit_session(&session.id, 10_000, "req-a", None).await.unwrap();
        assert!(!first.idempotent);
        let second = store.debit_session(&session.id, 10_000, "req-a", None).await.unwrap();
        assert!(second.idempotent);
        assert_eq!(second.balance.pending, 10_000);
    }

    #[tokio::test]
    async fn debit_exceeding_available_is_rejected() {
        let store = MemoryStore::new();
        let (session, _) = store.get_or_create_session(sample_session("s3", 1_000, 3600)).await.unwrap();
        let err = store.debit_session(&session.id, 1_001, "req-a", None).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn reclaim_with_pending_matches_scenario_3() {
        let store = MemoryStore::new();
        let (session, _) =
            store.get_or_create_session(sample_session("s4", 100_000, 3600)).await.unwrap();
        for i in 0..4 {
            store.debit_session(&session.id, 10_000, &format!("req-{i}"), None).await.unwrap();
        }
        let balance = store.void_session(&session.id, Some("0xcapture"), "0xvoid").await.unwrap();
        assert_eq!(balance.captured, 40_000);
        assert_eq!(balance.pending, 0);

        let reloaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Voided);
    }

    #[tokio::test]
    async fn expired_reclaim_does_not_capture_pending() {
        let store = MemoryStore::new();
        let (session, _) = store.get_or_create_session(sample_session("s5", 100_000, 3600)).await.unwrap();
        store.debit_session(&session.id, 40_000, "req-a", None).await.unwrap();

        let balance = store.void_session(&session.id, None, "0xvoid").await.unwrap();
        assert_eq!(balance.captured, 0);
        assert_eq!(balance.pending, 40_000);
    }
}
