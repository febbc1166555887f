//! HTTP handlers for the analysis and operations endpoints.
//!
//! Admission runs in a fixed order: validation, burst rate limit, quota (or
//! the demo guard on the anonymous route). The cascade only runs for admitted
//! requests, so a rejected request never costs a provider call.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::warn;
use validator::Validate;

use crate::abuse::{AbuseGuardConfig, DeviceAbuseGuard};
use crate::analysis::AnalyzeRequest;
use crate::cascade::ProviderCascade;
use crate::config::Config;
use crate::error::ApiError;
use crate::filter::TierResponseFilter;
use crate::metrics::{AdmissionOutcome, MetricsCollector};
use crate::middleware::ClientIp;
use crate::providers::ProviderClients;
use crate::quota::{QuotaEnforcer, QuotaPolicy, SubscriptionStore, SubscriptionTier, UsageLedger};
use crate::rate_limit::{RateLimitPolicy, WindowedRateLimiter};
use crate::response::{HealthResponse, ReadinessResponse, RejectionBody};
use crate::store::CounterStore;

pub type SharedState = Arc<AppState>;

/// Everything the handlers share across requests
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CounterStore>,
    pub rate_limiter: WindowedRateLimiter,
    pub general_policy: RateLimitPolicy,
    pub quota: QuotaEnforcer,
    pub abuse_guard: DeviceAbuseGuard,
    pub cascade: ProviderCascade,
    pub ledger: Arc<dyn UsageLedger>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn CounterStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let abuse_config = AbuseGuardConfig {
            demo_limit: config.demo_limit,
            window: config.demo_window,
            cooldown: config.demo_cooldown,
        };
        let free_policy = match config.free_daily_limit {
            Some(limit) => QuotaPolicy::DailyLimit(limit),
            None => QuotaPolicy::MonthlyLimit(config.free_monthly_limit),
        };
        let cascade = ProviderCascade::new(
            ProviderClients::from_config(&config.providers),
            metrics.clone(),
        );

        Self {
            rate_limiter: WindowedRateLimiter::new(store.clone()),
            general_policy: RateLimitPolicy::general(),
            quota: QuotaEnforcer::new(subscriptions, ledger.clone(), free_policy),
            abuse_guard: DeviceAbuseGuard::new(store.clone(), abuse_config),
            cascade,
            ledger,
            metrics,
            store,
            config,
        }
    }
}

/// Authenticated analysis endpoint
pub async fn analyze(
    State(state): State<SharedState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    let user_id = request.user_id.ok_or_else(|| {
        ApiError::InvalidRequest(
            "userId is required; use /api/demo/analyze for anonymous access".to_string(),
        )
    })?;
    let declared_tier = request.tier.unwrap_or_default();

    // Burst ceiling keyed on the declared tier; the quota check below
    // re-resolves the real tier from the subscription record
    let burst_policy = RateLimitPolicy::for_tier(declared_tier);
    let burst = state
        .rate_limiter
        .check(&burst_policy, &user_id.to_string())
        .await;
    if !burst.allowed {
        state
            .metrics
            .record_admission(AdmissionOutcome::RateLimited)
            .await;
        let mut response = RejectionBody::rate_limited(&burst).into_response();
        let headers = response.headers_mut();
        headers.insert("X-RateLimit-Limit", burst.limit.to_string().parse().unwrap());
        headers.insert("X-RateLimit-Remaining", "0".parse().unwrap());
        headers.insert(
            "X-RateLimit-Reset",
            burst.reset_at.to_string().parse().unwrap(),
        );
        return Ok(response);
    }

    let decision = state.quota.authorize(user_id, declared_tier).await;
    if !decision.allowed {
        state
            .metrics
            .record_admission(AdmissionOutcome::QuotaExceeded)
            .await;
        return Ok(RejectionBody::quota_exceeded(&decision).into_response());
    }

    state
        .metrics
        .record_admission(AdmissionOutcome::Admitted)
        .await;

    let result = state.cascade.analyze(decision.tier, &request).await;

    if let Err(e) = state.ledger.record(user_id, result.timestamp).await {
        // A dropped entry under-counts this month's usage; the analysis
        // itself already happened and still goes back to the caller
        warn!(user_id = %user_id, error = %e, "Failed to record usage");
    }

    Ok(Json(TierResponseFilter::filter(result, decision.tier)).into_response())
}

/// Anonymous demo endpoint, gated by the device abuse guard
pub async fn demo_analyze(
    State(state): State<SharedState>,
    Extension(client_ip): Extension<ClientIp>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    let decision = state.abuse_guard.evaluate(&headers, &client_ip.0).await;
    if !decision.allowed {
        state
            .metrics
            .record_admission(AdmissionOutcome::DemoRejected)
            .await;
        let body = RejectionBody::demo_rejected(&decision, state.config.demo_cooldown);
        return Ok(body.into_response());
    }

    state
        .metrics
        .record_admission(AdmissionOutcome::Admitted)
        .await;

    let result = state.cascade.analyze(SubscriptionTier::Free, &request).await;
    let filtered = TierResponseFilter::filter(result, SubscriptionTier::Free);

    let mut response = Json(filtered).into_response();
    response.headers_mut().insert(
        "X-Demo-Remaining",
        decision.remaining.to_string().parse().unwrap(),
    );
    Ok(response)
}

/// Liveness probe; 503 when the counter store is unreachable
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store_connected = state.store.get("health:probe").await.is_ok();
    if store_connected {
        (StatusCode::OK, Json(HealthResponse::healthy(true)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::unhealthy(false)),
        )
    }
}

/// Readiness probe. Always ready: admission fails open without the store and
/// the cascade ends at the pattern table, which needs no credentials.
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = if state.store.get("health:probe").await.is_ok() {
        "connected"
    } else {
        "degraded"
    };
    let providers = if state.config.providers.any_configured() {
        "configured"
    } else {
        "mock-only"
    };

    Json(ReadinessResponse {
        status: "ready".to_string(),
        store: store.to_string(),
        providers: providers.to_string(),
    })
}

/// Admission and provider counters since startup
pub async fn metrics_snapshot(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.metrics.snapshot().await)
}
