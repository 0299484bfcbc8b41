//! Process-local rate limiting (spec §4.8/§5, Open Question 3 — resolved in
//! `DESIGN.md` as process-local `DashMap` buckets; multi-instance sharing is
//! explicitly out of scope).
//!
//! Three independent buckets, per spec §4.8: authenticated requests keyed by
//! API key id, repeated auth failures keyed by client IP, and reclaim-all
//! calls keyed by payer wallet.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A fixed-window counter. Simpler than a leaky/token bucket, matching the
/// teacher's preference for the plainest structure that satisfies the
/// invariant (the teacher's `PendingNonceManager` is similarly a bare
/// `DashMap` rather than a generic rate-limiting crate).
struct Window {
    count: u32,
    window_started_at: Instant,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    period: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self { windows: DashMap::new(), limit, period }
    }

    /// Returns `true` if the call under `key` is allowed, incrementing its
    /// counter as a side effect.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window { count: 0, window_started_at: now });

        if now.duration_since(entry.window_started_at) >= self.period {
            entry.count = 0;
            entry.window_started_at = now;
        }

        if entry.count >= self.limit {
            false
        } else {
            entry.count += 1;
            true
        }
    }
}

/// The three rate limiters the API surface applies (§4.8).
pub struct RateLimiters {
    pub authenticated: RateLimiter,
    pub auth_failure: RateLimiter,
    pub reclaim: RateLimiter,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self {
            authenticated: RateLimiter::new(120, Duration::from_secs(60)),
            auth_failure: RateLimiter::new(10, Duration::from_secs(60)),
            reclaim: RateLimiter::new(5, Duration::from_secs(60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));
    }

    #[test]
    fn separate_keys_have_independent_budgets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(!limiter.check("a"));
    }
}
