//! The `Store` trait: the only way the Session Engine, Scheme Router, Capture
//! Scheduler, and Reclaim Orchestrator touch persisted state (spec §9 design
//! note: "the server's Session Engine depends only on the Store trait").
//!
//! Every mutating method here corresponds to one of the atomic stored
//! procedures spec §4.3 names; callers never need a follow-up read to learn
//! the post-state balance.

use async_trait::async_trait;
use uuid::Uuid;

use crate::StoreError;
use crate::models::{
    ApiKey, Balance, CaptureLog, CaptureLogStatus, DebitOutcome, NewSession, Network, Session,
    SessionStatus, UsageLog,
};

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // --- Networks --------------------------------------------------------

    async fn get_network(&self, id: &str) -> Result<Option<Network>, StoreError>;
    async fn list_active_networks(&self) -> Result<Vec<Network>, StoreError>;

    // --- Auth --------------------------------------------------------------

    /// Looks up an active API key by the sha-256 hash of its secret.
    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Fire-and-forget `last_used_at` bump (spec §9: "must not block the
    /// request path and must tolerate write errors silently").
    async fn touch_api_key_last_used(&self, api_key_id: Uuid);

    // --- Sessions ------------------------------------------------------

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Inserts a Session row if `new.id` is not already present. Returns the
    /// existing row and `created=false` on conflict (spec §4.4: "Idempotent
    /// on `sessionId`: if a row already exists and is `active`, skip on-chain
    /// and only debit the requested `requestId`" - the on-chain skip decision
    /// is the Session Engine's; this just exposes whether the row was new).
    async fn get_or_create_session(&self, new: NewSession) -> Result<(Session, bool), StoreError>;

    async fn balance_of(&self, session_id: &str) -> Result<Balance, StoreError>;

    /// `debit_session` (spec §4.3): locks the session, checks status/expiry,
    /// checks `(session_id, request_id)` idempotency, recomputes balance from
    /// logs, and inserts a pending UsageLog if `amount <= available`.
    async fn debit_session(
        &self,
        session_id: &str,
        amount: u128,
        request_id: &str,
        description: Option<&str>,
    ) -> Result<DebitOutcome, StoreError>;

    /// `batch_capture` (spec §4.3): inserts a CaptureLog for the current
    /// pending total and settles all pending UsageLogs against it.
    async fn batch_capture(
        &self,
        session_id: &str,
        tx_hash: &str,
        tier: i16,
    ) -> Result<Balance, StoreError>;

    /// `sync_capture` (spec §4.3): settles UsageLogs in FIFO order until
    /// `amount` is covered; any remainder stays pending.
    async fn sync_capture(
        &self,
        session_id: &str,
        amount: u128,
        tx_hash: &str,
    ) -> Result<Balance, StoreError>;

    /// `void_session` (spec §4.3): if pending > 0, writes a tier-3 CaptureLog
    /// and settles all pending logs; transitions status to `voided`.
    async fn void_session(
        &self,
        session_id: &str,
        capture_tx_hash: Option<&str>,
        void_tx_hash: &str,
    ) -> Result<Balance, StoreError>;

    /// Records a capture attempt that failed on-chain (spec §4.6: "Failures
    /// are recorded as `CaptureLog.status='failed'` and do not block other
    /// sessions in the batch"), without touching UsageLog status.
    async fn record_failed_capture(
        &self,
        session_id: &str,
        network_id: &str,
        amount: u128,
        tier: i16,
    ) -> Result<(), StoreError>;

    /// `sessions-needing-capture-tier1(threshold, limit)`.
    async fn sessions_needing_capture_tier1(
        &self,
        threshold: u128,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError>;

    /// `sessions-needing-capture-tier2(expiry_before, limit)`.
    async fn sessions_needing_capture_tier2(
        &self,
        expiry_before: i64,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError>;

    /// All active sessions owned by `payer` with `available > 0`, grouped by
    /// caller for `reclaim-all` (spec §4.7).
    async fn active_sessions_for_payer(&self, payer: &str) -> Result<Vec<Session>, StoreError>;

    async fn list_sessions_for_user(
        &self,
        user_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StoreError>;

    async fn usage_logs_for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<UsageLog>, StoreError>;

    async fn capture_logs_for_session(&self, session_id: &str) -> Result<Vec<CaptureLog>, StoreError>;

    /// Marks a CaptureLog's status, used once a capture tx's receipt is
    /// observed (confirmed) or times out (failed).
    async fn mark_capture_log_status(
        &self,
        capture_log_id: Uuid,
        status: CaptureLogStatus,
    ) -> Result<(), StoreError>;
}
