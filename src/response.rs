use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::abuse::{DemoDecision, DemoRejectReason};
use crate::quota::{QuotaDecision, SubscriptionTier};
use crate::rate_limit::RateDecision;

/// Body returned with every 429, regardless of which admission layer
/// produced the rejection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    pub reset_time: u64,
    pub retry_after_seconds: u64,
    /// Present only on free-tier quota rejections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<bool>,
}

impl RejectionBody {
    pub fn rate_limited(decision: &RateDecision) -> Self {
        Self {
            error: "rate_limit_exceeded".to_string(),
            message: format!(
                "Rate limit of {} requests exceeded. Try again shortly.",
                decision.limit
            ),
            reset_time: decision.reset_at,
            retry_after_seconds: decision.retry_after.unwrap_or(1),
            upgrade: None,
        }
    }

    pub fn quota_exceeded(decision: &QuotaDecision) -> Self {
        let reset_time = decision.reset_at.unwrap_or(0);
        let message = if decision.tier == SubscriptionTier::Free {
            "Analysis quota reached. Upgrade for unlimited analyses.".to_string()
        } else {
            format!(
                "Analysis quota reached for the {} plan.",
                decision.tier.as_str()
            )
        };
        Self {
            error: "quota_exceeded".to_string(),
            message,
            reset_time,
            retry_after_seconds: reset_time.saturating_sub(now_secs()),
            upgrade: (decision.tier == SubscriptionTier::Free).then_some(true),
        }
    }

    pub fn demo_rejected(decision: &DemoDecision, cooldown: Duration) -> Self {
        let reason = decision
            .reason
            .unwrap_or(DemoRejectReason::DailyLimitExceeded);
        let (message, retry_after_seconds) = match reason {
            DemoRejectReason::DailyLimitExceeded => (
                "Demo limit reached for this device. Create an account to continue.".to_string(),
                decision.reset_at.saturating_sub(now_secs()),
            ),
            DemoRejectReason::RateLimitTooFast => (
                "You're sending requests too quickly. Wait a few seconds and try again."
                    .to_string(),
                cooldown.as_secs(),
            ),
        };
        Self {
            error: reason.as_str().to_string(),
            message,
            reset_time: decision.reset_at,
            retry_after_seconds,
            upgrade: None,
        }
    }
}

impl IntoResponse for RejectionBody {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_seconds;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        response
            .headers_mut()
            .insert("Retry-After", retry_after.to_string().parse().unwrap());
        response
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store_connected: bool,
}

impl HealthResponse {
    pub fn healthy(store_connected: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: now_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected,
        }
    }

    pub fn unhealthy(store_connected: bool) -> Self {
        Self {
            status: "unhealthy".to_string(),
            timestamp: now_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub status: String,
    pub store: String,
    pub providers: String,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaRemaining;

    #[test]
    fn test_rate_limited_body_shape() {
        let decision = RateDecision::blocked(10, 1_900_000_000, 42);
        let body = RejectionBody::rate_limited(&decision);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["error"], "rate_limit_exceeded");
        assert_eq!(json["resetTime"], 1_900_000_000u64);
        assert_eq!(json["retryAfterSeconds"], 42);
        assert!(json.get("upgrade").is_none());
    }

    #[test]
    fn test_into_response_sets_retry_after_header() {
        let decision = RateDecision::blocked(10, 1_900_000_000, 42);
        let response = RejectionBody::rate_limited(&decision).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["Retry-After"], "42");
    }

    #[test]
    fn test_quota_exceeded_free_carries_upgrade() {
        let decision = QuotaDecision {
            allowed: false,
            used: 50,
            remaining: QuotaRemaining::Limited(0),
            reset_at: Some(now_secs() + 3600),
            subscription_expired: false,
            tier: SubscriptionTier::Free,
        };
        let json = serde_json::to_value(RejectionBody::quota_exceeded(&decision)).unwrap();

        assert_eq!(json["error"], "quota_exceeded");
        assert_eq!(json["upgrade"], true);
        assert!(json["retryAfterSeconds"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_quota_exceeded_paid_has_no_upgrade() {
        let decision = QuotaDecision {
            allowed: false,
            used: 1000,
            remaining: QuotaRemaining::Limited(0),
            reset_at: Some(now_secs() + 60),
            subscription_expired: false,
            tier: SubscriptionTier::Pro,
        };
        let json = serde_json::to_value(RejectionBody::quota_exceeded(&decision)).unwrap();

        assert!(json.get("upgrade").is_none());
        assert!(json["message"].as_str().unwrap().contains("pro"));
    }

    #[test]
    fn test_demo_rejection_names_the_reason() {
        let daily = DemoDecision::rejected(
            DemoRejectReason::DailyLimitExceeded,
            0,
            now_secs() + 7200,
        );
        let body = RejectionBody::demo_rejected(&daily, Duration::from_secs(10));
        assert_eq!(body.error, "daily_limit_exceeded");
        assert!(body.retry_after_seconds > 0);

        let fast =
            DemoDecision::rejected(DemoRejectReason::RateLimitTooFast, 1, now_secs() + 7200);
        let body = RejectionBody::demo_rejected(&fast, Duration::from_secs(10));
        assert_eq!(body.error, "rate_limit_too_fast");
        assert_eq!(body.retry_after_seconds, 10);
    }
}
