//! Postgres-backed `Store` implementation.
//!
//! Transactions use `SELECT ... FOR UPDATE` on the session row and its usage
//! logs to get the serialization spec §5 asks for ("Core mutation paths
//! ... are serialized in the store via row locks on the session row and its
//! usage_logs; application-level mutexes are not required"), rather than
//! relying on `SERIALIZABLE` isolation.
//!
//! Queries are issued with `sqlx::query_as`/`sqlx::query` at runtime rather
//! than the `query!`/`query_as!` macros, since there is no live database to
//! check them against at this point.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::StoreError;
use crate::models::{
    ApiKey, Balance, CaptureLog, CaptureLogStatus, DebitOutcome, NewSession, Network, Session,
    SessionStatus, UsageLog,
};
use crate::store::Store;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Sums pending/settled UsageLog amounts for a session within `tx`,
    /// returning the Balance computed against the session's authorized
    /// amount. Caller must already hold the row locks this is meant to read
    /// under.
    async fn balance_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        session_id: &str,
        authorized: u128,
    ) -> Result<Balance, StoreError> {
        let row: (Option<String>, Option<String>) = sqlx::query_as(
            r#"
            SELECT
                (SELECT SUM(amount::numeric) FROM usage_logs WHERE session_id = $1 AND status = 'settled')::text,
                (SELECT SUM(amount::numeric) FROM usage_logs WHERE session_id = $1 AND status = 'pending')::text
            "#,
        )
        .bind(session_id)
        .fetch_one(&mut **tx)
        .await?;

        let captured: u128 = row.0.as_deref().unwrap_or("0").parse().unwrap_or(0);
        let pending: u128 = row.1.as_deref().unwrap_or("0").parse().unwrap_or(0);
        let available = authorized.saturating_sub(captured + pending);
        Ok(Balance { authorized, captured, pending, available })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_network(&self, id: &str) -> Result<Option<Network>, StoreError> {
        let network = sqlx::query_as::<_, Network>("SELECT * FROM networks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(network)
    }

    async fn list_active_networks(&self) -> Result<Vec<Network>, StoreError> {
        let networks =
            sqlx::query_as::<_, Network>("SELECT * FROM networks WHERE is_active = true")
                .fetch_all(&self.pool)
                .await?;
        Ok(networks)
    }

    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE secret_hash = $1 AND status = 'active'",
        )
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    async fn touch_api_key_last_used(&self, api_key_id: Uuid) {
        if let Err(error) =
            sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
                .bind(api_key_id)
                .execute(&self.pool)
                .await
        {
            tracing::warn!(%error, %api_key_id, "failed to bump api key last_used_at");
        }
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn get_or_create_session(&self, new: NewSession) -> Result<(Session, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(&new.id)
                .fetch_optional(&mut *tx)
                .await?
        {
            tx.commit().await?;
            return Ok((existing, false));
        }

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (
                id, network_id, user_id, payer, receiver, token, authorized_amount,
                authorization_expiry, refund_expiry, pre_approval_expiry,
                operator, salt, min_fee_bps, max_fee_bps, fee_receiver,
                authorize_tx_hash, session_token_hash, status
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 'active'
            )
            RETURNING *
            "#,
        )
        .bind(&new.id)
        .bind(&new.network_id)
        .bind(new.user_id)
        .bind(&new.payer)
        .bind(&new.receiver)
        .bind(&new.token)
        .bind(new.authorized_amount.to_string())
        .bind(new.authorization_expiry)
        .bind(new.refund_expiry)
        .bind(new.pre_approval_expiry)
        .bind(&new.operator)
        .bind(&new.salt)
        .bind(new.min_fee_bps)
        .bind(new.max_fee_bps)
        .bind(&new.fee_receiver)
        .bind(&new.authorize_tx_hash)
        .bind(&new.session_token_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((session, true))
    }

    async fn balance_of(&self, session_id: &str) -> Result<Balance, StoreError> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        let mut tx = self.pool.begin().await?;
        let balance = Self::balance_in_tx(&mut tx, session_id, authorized).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn debit_session(
        &self,
        session_id: &str,
        amount: u128,
        request_id: &str,
        description: Option<&str>,
    ) -> Result<DebitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        if session.status != SessionStatus::Active {
            return Err(StoreError::SessionNotActive(session_id.to_string()));
        }
        if session.authorization_expiry < Utc::now().timestamp() {
            return Err(StoreError::SessionExpired(session_id.to_string()));
        }

        // Lock the usage_logs rows so concurrent debits serialize.
        sqlx::query("SELECT id FROM usage_logs WHERE session_id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_all(&mut *tx)
            .await?;

        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);

        let already_logged = sqlx::query_as::<_, UsageLog>(
            "SELECT * FROM usage_logs WHERE session_id = $1 AND request_id = $2",
        )
        .bind(session_id)
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        if already_logged {
            let balance = Self::balance_in_tx(&mut tx, session_id, authorized).await?;
            tx.commit().await?;
            return Ok(DebitOutcome { idempotent: true, balance });
        }

        let balance = Self::balance_in_tx(&mut tx, session_id, authorized).await?;
        if amount > balance.available {
            return Err(StoreError::InsufficientBalance {
                session_id: session_id.to_string(),
                amount,
                available: balance.available,
            });
        }

        sqlx::query(
            "INSERT INTO usage_logs (id, session_id, request_id, amount, description, status) \
             VALUES ($1, $2, $3, $4, $5, 'pending')",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(request_id)
        .bind(amount.to_string())
        .bind(description)
        .execute(&mut *tx)
        .await?;

        let new_balance = Balance {
            authorized,
            captured: balance.captured,
            pending: balance.pending + amount,
            available: balance.available - amount,
        };
        tx.commit().await?;
        Ok(DebitOutcome { idempotent: false, balance: new_balance })
    }

    async fn batch_capture(
        &self,
        session_id: &str,
        tx_hash: &str,
        tier: i16,
    ) -> Result<Balance, StoreError> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        let balance = Self::balance_in_tx(&mut tx, session_id, authorized).await?;

        if balance.pending > 0 {
            let capture_log_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO capture_logs (id, session_id, network_id, amount, tx_hash, tier, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, 'confirmed')",
            )
            .bind(capture_log_id)
            .bind(session_id)
            .bind(&session.network_id)
            .bind(balance.pending.to_string())
            .bind(tx_hash)
            .bind(tier)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE usage_logs SET status = 'settled', capture_log_id = $2 \
                 WHERE session_id = $1 AND status = 'pending'",
            )
            .bind(session_id)
            .bind(capture_log_id)
            .execute(&mut *tx)
            .await?;
        }

        let final_balance = Balance {
            authorized,
            captured: balance.captured + balance.pending,
            pending: 0,
            available: balance.available,
        };
        tx.commit().await?;
        Ok(final_balance)
    }

    async fn sync_capture(
        &self,
        session_id: &str,
        amount: u128,
        tx_hash: &str,
    ) -> Result<Balance, StoreError> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        let pending_logs = sqlx::query_as::<_, UsageLog>(
            "SELECT * FROM usage_logs WHERE session_id = $1 AND status = 'pending' ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await?;

        let capture_log_id = Uuid::new_v4();
        let mut inserted_capture_log = false;
        let mut remaining = amount;
        let mut settled_amount: u128 = 0;

        for log in &pending_logs {
            if remaining == 0 {
                break;
            }
            let log_amount: u128 = log.amount.parse().unwrap_or(0);
            if log_amount > remaining {
                break;
            }
            if !inserted_capture_log {
                sqlx::query(
                    "INSERT INTO capture_logs (id, session_id, network_id, amount, tx_hash, tier, status) \
                     VALUES ($1, $2, $3, $4, $5, 3, 'confirmed')",
                )
                .bind(capture_log_id)
                .bind(session_id)
                .bind(&session.network_id)
                .bind(amount.to_string())
                .bind(tx_hash)
                .execute(&mut *tx)
                .await?;
                inserted_capture_log = true;
            }
            sqlx::query(
                "UPDATE usage_logs SET status = 'settled', capture_log_id = $1 WHERE id = $2",
            )
            .bind(capture_log_id)
            .bind(log.id)
            .execute(&mut *tx)
            .await?;
            remaining -= log_amount;
            settled_amount += log_amount;
        }

        let balance = Self::balance_in_tx(&mut tx, session_id, authorized).await?;
        let final_balance = Balance {
            authorized,
            captured: balance.captured + settled_amount,
            pending: balance.pending - settled_amount,
            available: balance.available,
        };
        tx.commit().await?;
        Ok(final_balance)
    }

    async fn void_session(
        &self,
        session_id: &str,
        capture_tx_hash: Option<&str>,
        void_tx_hash: &str,
    ) -> Result<Balance, StoreError> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        let authorized: u128 = session.authorized_amount.parse().unwrap_or(0);
        let balance = Self::balance_in_tx(&mut tx, session_id, authorized).await?;

        let mut final_captured = balance.captured;
        if balance.pending > 0 {
            if let Some(capture_tx_hash) = capture_tx_hash {
                let capture_log_id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO capture_logs (id, session_id, network_id, amount, tx_hash, tier, status) \
                     VALUES ($1, $2, $3, $4, $5, 3, 'confirmed')",
                )
                .bind(capture_log_id)
                .bind(session_id)
                .bind(&session.network_id)
                .bind(balance.pending.to_string())
                .bind(capture_tx_hash)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE usage_logs SET status = 'settled', capture_log_id = $2 \
                     WHERE session_id = $1 AND status = 'pending'",
                )
                .bind(session_id)
                .bind(capture_log_id)
                .execute(&mut *tx)
                .await?;
                final_captured += balance.pending;
            }
        }

        sqlx::query("UPDATE sessions SET status = 'voided', void_tx_hash = $2 WHERE id = $1")
            .bind(session_id)
            .bind(void_tx_hash)
            .execute(&mut *tx)
            .await?;

        let final_balance = Balance {
            authorized,
            captured: final_captured,
            pending: if capture_tx_hash.is_some() { 0 } else { balance.pending },
            available: balance.available,
        };
        tx.commit().await?;
        Ok(final_balance)
    }

    async fn record_failed_capture(
        &self,
        session_id: &str,
        network_id: &str,
        amount: u128,
        tier: i16,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO capture_logs (id, session_id, network_id, amount, tx_hash, tier, status) \
             VALUES ($1, $2, $3, $4, '', $5, 'failed')",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(network_id)
        .bind(amount.to_string())
        .bind(tier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sessions_needing_capture_tier1(
        &self,
        threshold: u128,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT s.* FROM sessions s
            WHERE s.status = 'active'
              AND (SELECT COALESCE(SUM(amount::numeric), 0) FROM usage_logs
                   WHERE session_id = s.id AND status = 'pending') >= $1::numeric
            LIMIT $2
            "#,
        )
        .bind(threshold.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn sessions_needing_capture_tier2(
        &self,
        expiry_before: i64,
        limit: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT s.* FROM sessions s
            WHERE s.status = 'active'
              AND s.authorization_expiry <= $1
              AND (SELECT COALESCE(SUM(amount::numeric), 0) FROM usage_logs
                   WHERE session_id = s.id AND status = 'pending') > 0
            LIMIT $2
            "#,
        )
        .bind(expiry_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn active_sessions_for_payer(&self, payer: &str) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT s.* FROM sessions s
            WHERE s.status = 'active' AND s.payer = $1
              AND (s.authorized_amount::numeric -
                   (SELECT COALESCE(SUM(amount::numeric), 0) FROM usage_logs
                    WHERE session_id = s.id AND status IN ('pending', 'settled'))) > 0
            "#,
        )
        .bind(payer)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn list_sessions_for_user(
        &self,
        user_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = match status {
            Some(status) => {
                sqlx::query_as::<_, Session>(
                    "SELECT * FROM sessions WHERE user_id = $1 AND status = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4",
                )
                .bind(user_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Session>(
                    "SELECT * FROM sessions WHERE user_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(sessions)
    }

    async fn usage_logs_for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<UsageLog>, StoreError> {
        let logs = sqlx::query_as::<_, UsageLog>(
            "SELECT * FROM usage_logs WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn capture_logs_for_session(&self, session_id: &str) -> Result<Vec<CaptureLog>, StoreError> {
        let logs = sqlx::query_as::<_, CaptureLog>(
            "SELECT * FROM capture_logs WHERE session_id = $1 ORDER BY created_at DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn mark_capture_log_status(
        &self,
        capture_log_id: Uuid,
        status: CaptureLogStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE capture_logs SET status = $2 WHERE id = $1")
            .bind(capture_log_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
