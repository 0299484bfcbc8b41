//! Engine-wide tunables spec §9 open question 2 leaves to the implementer:
//! capture tier thresholds/batch size, reclaim timeouts, and the shared
//! secrets auth depends on. The `facilitator` binary resolves these from env
//! vars (§6's environment-configuration table plus the ambient additions in
//! `SPEC_FULL.md` §B) and constructs one [`EngineConfig`] at startup.

use std::time::Duration;

/// Atomic-unit default for the tier-1 capture threshold: 1 USDC at 6 decimals.
pub const DEFAULT_CAPTURE_THRESHOLD: u128 = 1_000_000;
pub const DEFAULT_CAPTURE_BATCH_SIZE: i64 = 50;
pub const DEFAULT_CAPTURE_PRE_EXPIRY_WINDOW_SECS: i64 = 2 * 3600;
pub const DEFAULT_TIER3_THRESHOLD_SECS: i64 = 30 * 60;
pub const DEFAULT_RECLAIM_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_RECLAIM_ALL_TIMEOUT_SECS: u64 = 2 * DEFAULT_RECLAIM_TIMEOUT_SECS;
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SETTLE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tier-1: pending at or above this (atomic units) is eligible for batch capture.
    pub capture_threshold: u128,
    /// Tier-1/2: max sessions captured per scheduler run.
    pub capture_batch_size: i64,
    /// Tier-2: sessions expiring within this many seconds, with pending > 0.
    pub capture_pre_expiry_window_secs: i64,
    /// Tier-3: inline capture triggers when `authorization_expiry - now` drops below this.
    pub tier3_threshold_secs: i64,
    pub reclaim_timeout: Duration,
    pub reclaim_all_timeout: Duration,
    pub verify_timeout: Duration,
    pub settle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_threshold: DEFAULT_CAPTURE_THRESHOLD,
            capture_batch_size: DEFAULT_CAPTURE_BATCH_SIZE,
            capture_pre_expiry_window_secs: DEFAULT_CAPTURE_PRE_EXPIRY_WINDOW_SECS,
            tier3_threshold_secs: DEFAULT_TIER3_THRESHOLD_SECS,
            reclaim_timeout: Duration::from_secs(DEFAULT_RECLAIM_TIMEOUT_SECS),
            reclaim_all_timeout: Duration::from_secs(DEFAULT_RECLAIM_ALL_TIMEOUT_SECS),
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            settle_timeout: Duration::from_secs(DEFAULT_SETTLE_TIMEOUT_SECS),
        }
    }
}
