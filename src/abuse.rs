//! Demo abuse protection for the unauthenticated analyze endpoint.
//!
//! Tracking is per composite key (fingerprint + IP) but blocking is per
//! fingerprint, so clearing cookies, going incognito or switching IPs does
//! not grant a fresh allowance. Rotating the full browser profile does; that
//! is outside this guard's reach.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::fingerprint::{composite_key, device_fingerprint};
use crate::store::CounterStore;

const TRACK_PREFIX: &str = "demo:track";
const BLOCK_PREFIX: &str = "demo:block";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseGuardConfig {
    /// Demo analyses allowed per device per window
    pub demo_limit: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Minimum gap between consecutive demo requests from one device
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for AbuseGuardConfig {
    fn default() -> Self {
        Self {
            demo_limit: 2,
            window: Duration::from_secs(24 * 60 * 60),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Per-device tracking record, stored as JSON under the composite key.
///
/// `block_until` marks the end of the device's current window whether or not
/// the device ever gets blocked; the record expires with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintRecord {
    pub count: u32,
    pub first_request: u64,
    pub last_request: u64,
    pub block_until: u64,
    pub fingerprint: String,
    pub ip: String,
    pub timestamps: Vec<u64>,
}

impl FingerprintRecord {
    fn fresh(fingerprint: &str, ip: &str, now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            first_request: now_ms,
            last_request: now_ms,
            block_until: now_ms + window_ms,
            fingerprint: fingerprint.to_string(),
            ip: ip.to_string(),
            timestamps: vec![now_ms],
        }
    }

    fn window_expired(&self, now_ms: u64) -> bool {
        now_ms > self.block_until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoRejectReason {
    DailyLimitExceeded,
    RateLimitTooFast,
}

impl DemoRejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemoRejectReason::DailyLimitExceeded => "daily_limit_exceeded",
            DemoRejectReason::RateLimitTooFast => "rate_limit_too_fast",
        }
    }
}

/// Outcome of a demo admission check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix seconds at which the device's window ends
    pub reset_at: u64,
    pub reason: Option<DemoRejectReason>,
}

impl DemoDecision {
    pub fn allowed(remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            reason: None,
        }
    }

    pub fn rejected(reason: DemoRejectReason, remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: false,
            remaining,
            reset_at,
            reason: Some(reason),
        }
    }
}

/// Fingerprint-based admission control for anonymous demo traffic
pub struct DeviceAbuseGuard {
    store: Arc<dyn CounterStore>,
    config: AbuseGuardConfig,
}

impl DeviceAbuseGuard {
    pub fn new(store: Arc<dyn CounterStore>, config: AbuseGuardConfig) -> Self {
        Self { store, config }
    }

    /// Decide whether this device may run another demo analysis.
    ///
    /// The cooldown rejection does not consume quota. Store failures admit
    /// the request. The record update is read-then-write; two requests racing
    /// on the same composite key can undercount by one, which the per-window
    /// limit tolerates.
    pub async fn evaluate(&self, headers: &HeaderMap, ip: &str) -> DemoDecision {
        let now = now_ms();
        let fingerprint = device_fingerprint(headers);
        let track_key = format!("{}:{}", TRACK_PREFIX, composite_key(&fingerprint, ip));
        let block_key = format!("{}:{}", BLOCK_PREFIX, fingerprint);

        // Global fingerprint block, shared by every IP the device uses
        match self.store.get(&block_key).await {
            Ok(Some(raw)) => {
                let block_until: u64 = raw.parse().unwrap_or(0);
                if now < block_until {
                    return DemoDecision::rejected(
                        DemoRejectReason::DailyLimitExceeded,
                        0,
                        block_until / 1000,
                    );
                }
                // Block lapsed, start the device over
                let _ = self.store.delete(&block_key).await;
                let _ = self.store.delete(&track_key).await;
            }
            Ok(None) => {}
            Err(e) => return self.admit_on_store_failure(now, &e),
        }

        let existing = match self.store.get(&track_key).await {
            Ok(Some(raw)) => serde_json::from_str::<FingerprintRecord>(&raw).ok(),
            Ok(None) => None,
            Err(e) => return self.admit_on_store_failure(now, &e),
        };

        let mut record = match existing {
            Some(record) if !record.window_expired(now) => record,
            _ => {
                let window_ms = self.config.window.as_millis() as u64;
                let record = FingerprintRecord::fresh(&fingerprint, ip, now, window_ms);
                self.persist(&track_key, &record, now).await;
                if record.count >= self.config.demo_limit {
                    self.block_fingerprint(&block_key, record.block_until, now)
                        .await;
                }
                return DemoDecision::allowed(
                    self.config.demo_limit.saturating_sub(record.count),
                    record.block_until / 1000,
                );
            }
        };

        if record.count >= self.config.demo_limit {
            // At the limit but not yet in the block set, e.g. exhausted
            // through another composite key before blocking landed
            self.block_fingerprint(&block_key, record.block_until, now)
                .await;
            return DemoDecision::rejected(
                DemoRejectReason::DailyLimitExceeded,
                0,
                record.block_until / 1000,
            );
        }

        let cooldown_ms = self.config.cooldown.as_millis() as u64;
        if now.saturating_sub(record.last_request) < cooldown_ms {
            return DemoDecision::rejected(
                DemoRejectReason::RateLimitTooFast,
                self.config.demo_limit - record.count,
                record.block_until / 1000,
            );
        }

        record.count += 1;
        record.last_request = now;
        record.timestamps.push(now);
        self.persist(&track_key, &record, now).await;

        if record.count >= self.config.demo_limit {
            // Pre-emptive block so a concurrent composite key for the same
            // device is barred as well
            self.block_fingerprint(&block_key, record.block_until, now)
                .await;
        }

        DemoDecision::allowed(
            self.config.demo_limit - record.count,
            record.block_until / 1000,
        )
    }

    /// Drop expired tracking records and lapsed blocks
    pub async fn sweep(&self) -> u64 {
        match self.store.cleanup().await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "Swept expired demo tracking entries");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Demo tracking sweep failed");
                0
            }
        }
    }

    async fn persist(&self, track_key: &str, record: &FingerprintRecord, now: u64) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize fingerprint record");
                return;
            }
        };
        let ttl = secs_until(record.block_until, now);
        if let Err(e) = self.store.set(track_key, &json, ttl).await {
            warn!(error = %e, "Failed to persist fingerprint record");
        }
    }

    async fn block_fingerprint(&self, block_key: &str, block_until: u64, now: u64) {
        let ttl = secs_until(block_until, now);
        if let Err(e) = self
            .store
            .set(block_key, &block_until.to_string(), ttl)
            .await
        {
            warn!(error = %e, "Failed to record fingerprint block");
        }
    }

    fn admit_on_store_failure(&self, now: u64, error: &crate::store::StoreError) -> DemoDecision {
        warn!(error = %error, "Counter store unavailable, admitting demo request");
        let window_ms = self.config.window.as_millis() as u64;
        DemoDecision::allowed(self.config.demo_limit, (now + window_ms) / 1000)
    }
}

fn secs_until(until_ms: u64, now_ms: u64) -> u64 {
    ((until_ms.saturating_sub(now_ms) + 999) / 1000).max(1)
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
    use axum::http::HeaderValue;

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        headers.insert("accept-language", HeaderValue::from_static("en-US"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        headers
    }

    fn guard(limit: u32, cooldown: Duration) -> DeviceAbuseGuard {
        DeviceAbuseGuard::new(
            Arc::new(InMemoryCounterStore::new()),
            AbuseGuardConfig {
                demo_limit: limit,
                window: Duration::from_secs(24 * 60 * 60),
                cooldown,
            },
        )
    }

    #[tokio::test]
    async fn test_fresh_device_is_allowed() {
        let guard = guard(2, Duration::ZERO);

        let decision = guard.evaluate(&headers(), "203.0.113.1").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert!(decision.reason.is_none());
    }

    #[tokio::test]
    async fn test_demo_limit_is_exactly_enforced() {
        let guard = guard(2, Duration::ZERO);
        let headers = headers();

        assert!(guard.evaluate(&headers, "203.0.113.1").await.allowed);
        let second = guard.evaluate(&headers, "203.0.113.1").await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = guard.evaluate(&headers, "203.0.113.1").await;
        assert!(!third.allowed);
        assert_eq!(third.reason, Some(DemoRejectReason::DailyLimitExceeded));
        assert!(third.reset_at > 0);
    }

    #[tokio::test]
    async fn test_block_follows_fingerprint_across_ips() {
        let guard = guard(2, Duration::ZERO);
        let headers = headers();

        guard.evaluate(&headers, "203.0.113.1").await;
        guard.evaluate(&headers, "203.0.113.1").await;

        // Same browser signature from a new address is still barred
        let elsewhere = guard.evaluate(&headers, "198.51.100.7").await;
        assert!(!elsewhere.allowed);
        assert_eq!(
            elsewhere.reason,
            Some(DemoRejectReason::DailyLimitExceeded)
        );
    }

    #[tokio::test]
    async fn test_cooldown_rejects_without_consuming_quota() {
        let guard = guard(3, Duration::from_millis(100));
        let headers = headers();

        assert!(guard.evaluate(&headers, "203.0.113.1").await.allowed);

        let rushed = guard.evaluate(&headers, "203.0.113.1").await;
        assert!(!rushed.allowed);
        assert_eq!(rushed.reason, Some(DemoRejectReason::RateLimitTooFast));
        assert_eq!(rushed.remaining, 2);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // The rushed attempt did not count
        let after = guard.evaluate(&headers, "203.0.113.1").await;
        assert!(after.allowed);
        assert_eq!(after.remaining, 1);
    }

    #[tokio::test]
    async fn test_exhausted_device_reports_daily_limit_not_cooldown() {
        let guard = guard(1, Duration::from_secs(60));
        let headers = headers();

        assert!(guard.evaluate(&headers, "203.0.113.1").await.allowed);

        // Within cooldown and over the limit; the limit wins
        let decision = guard.evaluate(&headers, "203.0.113.1").await;
        assert_eq!(decision.reason, Some(DemoRejectReason::DailyLimitExceeded));
    }

    #[tokio::test]
    async fn test_expired_block_grants_a_fresh_window() {
        let guard = DeviceAbuseGuard::new(
            Arc::new(InMemoryCounterStore::new()),
            AbuseGuardConfig {
                demo_limit: 1,
                window: Duration::from_secs(1),
                cooldown: Duration::ZERO,
            },
        );
        let headers = headers();

        assert!(guard.evaluate(&headers, "203.0.113.1").await.allowed);
        assert!(!guard.evaluate(&headers, "203.0.113.1").await.allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let decision = guard.evaluate(&headers, "203.0.113.1").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_reaching_limit_blocks_other_composites_preemptively() {
        let guard = guard(1, Duration::ZERO);
        let headers = headers();

        // One call exhausts the allowance and should immediately bar the
        // fingerprint under every other IP
        assert!(guard.evaluate(&headers, "203.0.113.1").await.allowed);
        assert!(!guard.evaluate(&headers, "198.51.100.7").await.allowed);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let guard = DeviceAbuseGuard::new(Arc::new(FailingStore), AbuseGuardConfig::default());

        let decision = guard.evaluate(&headers(), "203.0.113.1").await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_sweep_reports_zero_on_clean_store() {
        let guard = guard(2, Duration::ZERO);
        assert_eq!(guard.sweep().await, 0);
    }
}
