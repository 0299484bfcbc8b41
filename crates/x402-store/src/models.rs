//! Row types for the networks / users / api_keys / sessions / usage_logs /
//! capture_logs tables (spec §3).
//!
//! Addresses and session ids are stored as lowercased `0x`-prefixed hex
//! strings and amounts as decimal strings, mirroring the `DisplayFromStr`
//! wire encoding `x402_types::proto` uses for `U256` — the store never needs
//! to do EVM arithmetic itself, only comparisons and sums, which are done by
//! the SQL the stored procedures issue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured EVM network (spec §3 Network).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Network {
    /// CAIP-2 id, e.g. `eip155:8453`.
    pub id: String,
    pub chain_id: i64,
    pub rpc_url: String,
    pub escrow_address: String,
    pub token_address: String,
    pub token_collector_address: String,
    #[sqlx(default)]
    pub multicall3_address: Option<String>,
    pub token_name: String,
    pub token_version: String,
    pub is_active: bool,
}

/// A dashboard user, keyed by their (lowercased) wallet address (spec §3 User).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub wallet: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

/// An API key used to authenticate `/verify`, `/settle`, `/capture` traffic
/// (spec §3 ApiKey). The secret is returned once at creation and only its
/// sha-256 hash is persisted.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub secret_hash: String,
    pub status: ApiKeyStatus,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Voided,
    Expired,
    Captured,
}

/// An escrow session (spec §3 Session). `id` is the escrow contract's
/// `getHash(PaymentInfo)` output, hex-encoded; it is never recomputed by the
/// store, only carried as an opaque key.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub network_id: String,
    pub user_id: Uuid,
    pub payer: String,
    pub receiver: String,
    pub token: String,
    pub authorized_amount: String,
    pub authorization_expiry: i64,
    pub refund_expiry: i64,
    pub pre_approval_expiry: i64,
    pub operator: String,
    pub salt: String,
    pub min_fee_bps: i32,
    pub max_fee_bps: i32,
    pub fee_receiver: String,
    pub authorize_tx_hash: String,
    #[sqlx(default)]
    pub void_tx_hash: Option<String>,
    pub session_token_hash: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UsageLogStatus {
    Pending,
    Settled,
}

/// A single debit against a session's authorized amount (spec §3 UsageLog).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: Uuid,
    pub session_id: String,
    pub request_id: String,
    pub amount: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub status: UsageLogStatus,
    #[sqlx(default)]
    pub capture_log_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaptureLogStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A batch or inline capture transaction against a session (spec §3 CaptureLog).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CaptureLog {
    pub id: Uuid,
    pub session_id: String,
    pub network_id: String,
    pub amount: String,
    pub tx_hash: String,
    pub tier: i16,
    pub status: CaptureLogStatus,
    pub created_at: DateTime<Utc>,
}

/// The computed balance view for a session (spec §3 Balance).
///
/// `captured + pending + available = authorized` is a global invariant
/// enforced by the stored procedures, not recomputed or asserted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub authorized: u128,
    pub captured: u128,
    pub pending: u128,
    pub available: u128,
}

impl Balance {
    pub fn zero(authorized: u128) -> Self {
        Self { authorized, captured: 0, pending: 0, available: authorized }
    }
}

/// Outcome of a `debit_session` call (spec §4.3 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitOutcome {
    pub idempotent: bool,
    pub balance: Balance,
}

/// The fields needed to create a Session row (spec §4.4 "Create session").
/// `id` is the caller-supplied escrow `getHash` output; the store does not
/// compute it.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub network_id: String,
    pub user_id: Uuid,
    pub payer: String,
    pub receiver: String,
    pub token: String,
    pub authorized_amount: u128,
    pub authorization_expiry: i64,
    pub refund_expiry: i64,
    pub pre_approval_expiry: i64,
    pub operator: String,
    pub salt: String,
    pub min_fee_bps: i32,
    pub max_fee_bps: i32,
    pub fee_receiver: String,
    pub authorize_tx_hash: String,
    pub session_token_hash: String,
}
