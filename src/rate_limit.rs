//! Fixed-window rate limiting on top of [`CounterStore`].
//!
//! Each (policy, identity) pair owns one counter per window. Admission is a
//! single atomic increment followed by a compare against the policy limit, so
//! two racing requests can never both observe room for the last slot.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::quota::SubscriptionTier;
use crate::store::CounterStore;

/// Which request outcomes count against a policy's limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// Every admitted request counts
    #[default]
    All,
    /// Only requests that ultimately succeed count
    SuccessesOnly,
    /// Only requests that ultimately fail count
    FailuresOnly,
}

/// A named rate limit rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub name: String,
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(default)]
    pub count: CountMode,
}

impl RateLimitPolicy {
    pub fn new(name: &str, max_requests: u32, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_requests,
            window,
            count: CountMode::All,
        }
    }

    /// Default policy for unauthenticated traffic: 100 requests per minute
    pub fn general() -> Self {
        Self::new("general", 100, Duration::from_secs(60))
    }

    /// Login and signup: 5 failed attempts per 15 minutes
    pub fn auth_endpoints() -> Self {
        Self {
            count: CountMode::FailuresOnly,
            ..Self::new("auth", 5, Duration::from_secs(15 * 60))
        }
    }

    /// Programmatic API keys: 1000 requests per hour
    pub fn api_key() -> Self {
        Self::new("api_key", 1000, Duration::from_secs(60 * 60))
    }

    /// Error analysis submissions: 50 per minute
    pub fn error_analysis() -> Self {
        Self::new("analysis", 50, Duration::from_secs(60))
    }

    /// File uploads: 10 per 5 minutes
    pub fn uploads() -> Self {
        Self::new("uploads", 10, Duration::from_secs(5 * 60))
    }

    /// Per-minute burst ceiling for an authenticated subscription tier
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        let max_requests = match tier {
            SubscriptionTier::Free => 10,
            SubscriptionTier::Pro => 50,
            SubscriptionTier::Team => 200,
        };
        Self::new(
            &format!("tier:{}", tier.as_str()),
            max_requests,
            Duration::from_secs(60),
        )
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("max_requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("window must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the current window ends
    pub reset_at: u64,
    /// Seconds to wait before retrying, present only when blocked
    pub retry_after: Option<u64>,
}

impl RateDecision {
    pub fn allowed(limit: u32, remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
        }
    }

    pub fn blocked(limit: u32, reset_at: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
        }
    }
}

struct Window {
    id: u64,
    reset_at_ms: u64,
}

impl Window {
    fn current(window: Duration, now_ms: u64) -> Self {
        let window_ms = (window.as_millis() as u64).max(1);
        let id = now_ms / window_ms;
        Self {
            id,
            reset_at_ms: (id + 1) * window_ms,
        }
    }
}

/// Fixed-window rate limiter shared across all policies
pub struct WindowedRateLimiter {
    store: Arc<dyn CounterStore>,
    prefix: String,
}

impl WindowedRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_prefix(store, "ratelimit")
    }

    pub fn with_prefix(store: Arc<dyn CounterStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    /// Check and consume one slot for `identity` under `policy`.
    ///
    /// When the counter store is unreachable the request is admitted, so a
    /// store outage degrades protection instead of availability.
    pub async fn check(&self, policy: &RateLimitPolicy, identity: &str) -> RateDecision {
        let now_ms = now_ms();
        let window = Window::current(policy.window, now_ms);
        let key = self.window_key(policy, identity, window.id);
        let reset_at = window.reset_at_ms / 1000;

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    policy = %policy.name,
                    identity = %identity,
                    error = %e,
                    "Counter store unavailable, admitting request"
                );
                return RateDecision::allowed(policy.max_requests, policy.max_requests, reset_at);
            }
        };

        if count == 1 {
            // First hit in this window; give the counter a TTL slightly
            // past the window boundary
            let ttl = policy.window.as_secs().max(1) + 1;
            if let Err(e) = self.store.expire(&key, ttl).await {
                warn!(key = %key, error = %e, "Failed to set TTL on window counter");
            }
        }

        if count > policy.max_requests as i64 {
            let retry_after = (window.reset_at_ms.saturating_sub(now_ms) + 999) / 1000;
            RateDecision::blocked(policy.max_requests, reset_at, retry_after.max(1))
        } else {
            let remaining = policy.max_requests.saturating_sub(count as u32);
            RateDecision::allowed(policy.max_requests, remaining, reset_at)
        }
    }

    /// Report how an admitted request ended.
    ///
    /// Policies counting only successes or only failures give the slot back
    /// when the outcome is the kind they ignore.
    pub async fn record_outcome(&self, policy: &RateLimitPolicy, identity: &str, success: bool) {
        let discount = match policy.count {
            CountMode::All => false,
            CountMode::SuccessesOnly => !success,
            CountMode::FailuresOnly => success,
        };
        if !discount {
            return;
        }

        let window = Window::current(policy.window, now_ms());
        let key = self.window_key(policy, identity, window.id);

        match self.store.incr_by(&key, -1).await {
            Ok(value) if value < 0 => {
                // The window rolled over between check and outcome;
                // put the stray decrement back
                let _ = self.store.incr(&key).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(policy = %policy.name, error = %e, "Failed to record request outcome");
            }
        }
    }

    fn window_key(&self, policy: &RateLimitPolicy, identity: &str, window_id: u64) -> String {
        format!("{}:{}:{}:{}", self.prefix, policy.name, identity, window_id)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailingStore, InMemoryCounterStore};

    fn limiter() -> WindowedRateLimiter {
        WindowedRateLimiter::new(Arc::new(InMemoryCounterStore::new()))
    }

    #[test]
    fn test_policy_catalog() {
        assert_eq!(RateLimitPolicy::general().max_requests, 100);
        assert_eq!(RateLimitPolicy::auth_endpoints().max_requests, 5);
        assert_eq!(
            RateLimitPolicy::auth_endpoints().window,
            Duration::from_secs(900)
        );
        assert_eq!(RateLimitPolicy::auth_endpoints().count, CountMode::FailuresOnly);
        assert_eq!(RateLimitPolicy::api_key().max_requests, 1000);
        assert_eq!(RateLimitPolicy::error_analysis().max_requests, 50);
        assert_eq!(RateLimitPolicy::uploads().max_requests, 10);
        assert_eq!(
            RateLimitPolicy::for_tier(SubscriptionTier::Free).max_requests,
            10
        );
        assert_eq!(
            RateLimitPolicy::for_tier(SubscriptionTier::Pro).max_requests,
            50
        );
        assert_eq!(
            RateLimitPolicy::for_tier(SubscriptionTier::Team).max_requests,
            200
        );
    }

    #[test]
    fn test_policy_validation() {
        assert!(RateLimitPolicy::general().validate().is_ok());
        assert!(RateLimitPolicy::new("bad", 0, Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(RateLimitPolicy::new("bad", 10, Duration::ZERO)
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_allows_up_to_limit_then_blocks() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("test", 3, Duration::from_secs(60));

        for i in 0..3 {
            let decision = limiter.check(&policy, "client").await;
            assert!(decision.allowed, "request {} should be allowed", i);
            assert_eq!(decision.remaining, 2 - i);
        }

        let decision = limiter.check(&policy, "client").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after.unwrap_or(0) >= 1);
    }

    #[tokio::test]
    async fn test_identities_do_not_share_windows() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("test", 1, Duration::from_secs(60));

        assert!(limiter.check(&policy, "a").await.allowed);
        assert!(!limiter.check(&policy, "a").await.allowed);
        assert!(limiter.check(&policy, "b").await.allowed);
    }

    #[tokio::test]
    async fn test_window_rollover_restarts_count() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("test", 2, Duration::from_secs(1));

        assert!(limiter.check(&policy, "client").await.allowed);
        assert!(limiter.check(&policy, "client").await.allowed);
        assert!(!limiter.check(&policy, "client").await.allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let decision = limiter.check(&policy, "client").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_failures_only_policy_ignores_successes() {
        let limiter = limiter();
        let policy = RateLimitPolicy {
            count: CountMode::FailuresOnly,
            ..RateLimitPolicy::new("auth", 2, Duration::from_secs(60))
        };

        // Successful attempts hand their slot back, so they never exhaust
        // the window
        for _ in 0..5 {
            let decision = limiter.check(&policy, "client").await;
            assert!(decision.allowed);
            limiter.record_outcome(&policy, "client", true).await;
        }

        // Failed attempts stick
        assert!(limiter.check(&policy, "client").await.allowed);
        limiter.record_outcome(&policy, "client", false).await;
        assert!(limiter.check(&policy, "client").await.allowed);
        limiter.record_outcome(&policy, "client", false).await;
        assert!(!limiter.check(&policy, "client").await.allowed);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let limiter = WindowedRateLimiter::new(Arc::new(FailingStore));
        let policy = RateLimitPolicy::new("test", 1, Duration::from_secs(60));

        for _ in 0..10 {
            assert!(limiter.check(&policy, "client").await.allowed);
        }
    }
}
