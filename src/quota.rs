//! Subscription tiers and usage quota enforcement.
//!
//! Quota is counted from the usage ledger (one entry per persisted analysis)
//! over calendar buckets, monthly by default or daily when the stricter free
//! policy is configured. Deleting an analysis therefore never refunds quota
//! inside the current bucket.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct QuotaError(pub String);

/// Subscription tiers offered by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
    Team,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Team => "team",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, SubscriptionTier::Free)
    }

    /// The quota rule this tier is held to. The free policy comes from
    /// configuration; paid tiers are never metered.
    pub fn quota_policy(&self, free_policy: QuotaPolicy) -> QuotaPolicy {
        match self {
            SubscriptionTier::Free => free_policy,
            SubscriptionTier::Pro | SubscriptionTier::Team => QuotaPolicy::Unlimited,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How many analyses a tier may persist per calendar bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPolicy {
    MonthlyLimit(u32),
    DailyLimit(u32),
    Unlimited,
}

/// A user's subscription record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub tier: SubscriptionTier,
    /// When the paid period ends; free subscriptions have no end date
    pub end_date: Option<DateTime<Utc>>,
}

impl Subscription {
    /// A paid subscription whose end date has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.tier.is_paid() && matches!(self.end_date, Some(end) if end <= now)
    }
}

/// Lookup and mutation of subscription records
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find(&self, user_id: Uuid) -> Result<Option<Subscription>, QuotaError>;

    /// Replace an expired paid subscription with a free one. Idempotent.
    async fn downgrade_to_free(&self, user_id: Uuid) -> Result<(), QuotaError>;
}

/// Append-only record of persisted analyses, used to count quota
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), QuotaError>;

    /// Number of analyses persisted in `[from, to)`
    async fn count_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, QuotaError>;
}

/// Remaining allowance, serialized as a number or the string `"unlimited"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaRemaining {
    Limited(u64),
    Unlimited,
}

impl Serialize for QuotaRemaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QuotaRemaining::Limited(n) => serializer.serialize_u64(*n),
            QuotaRemaining::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u64,
    pub remaining: QuotaRemaining,
    /// Unix seconds at which the current bucket rolls over; absent for
    /// unlimited tiers
    pub reset_at: Option<u64>,
    /// True when a paid subscription lapsed and the user was downgraded
    pub subscription_expired: bool,
    /// Tier the decision was made for, after any downgrade
    pub tier: SubscriptionTier,
}

/// Tier resolution and quota checks ahead of each persisted analysis
pub struct QuotaEnforcer {
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn UsageLedger>,
    free_policy: QuotaPolicy,
}

impl QuotaEnforcer {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn UsageLedger>,
        free_policy: QuotaPolicy,
    ) -> Self {
        Self {
            subscriptions,
            ledger,
            free_policy,
        }
    }

    /// Resolve the user's effective tier and decide whether another analysis
    /// fits their allowance.
    ///
    /// The subscription record wins over the tier declared in the request;
    /// the declared tier only applies to users without a record. Expired paid
    /// subscriptions are downgraded on the spot and flagged in the decision.
    /// Seam failures admit the request rather than reject it.
    pub async fn authorize(&self, user_id: Uuid, declared_tier: SubscriptionTier) -> QuotaDecision {
        let now = Utc::now();
        let mut tier = declared_tier;
        let mut expired = false;

        match self.subscriptions.find(user_id).await {
            Ok(Some(subscription)) => {
                if subscription.is_expired(now) {
                    expired = true;
                    tier = SubscriptionTier::Free;
                    if let Err(e) = self.subscriptions.downgrade_to_free(user_id).await {
                        warn!(user_id = %user_id, error = %e, "Failed to downgrade expired subscription");
                    }
                } else {
                    tier = subscription.tier;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Subscription store unavailable, using declared tier");
            }
        }

        match tier.quota_policy(self.free_policy) {
            QuotaPolicy::Unlimited => QuotaDecision {
                allowed: true,
                used: 0,
                remaining: QuotaRemaining::Unlimited,
                reset_at: None,
                subscription_expired: expired,
                tier,
            },
            QuotaPolicy::MonthlyLimit(limit) => {
                let (from, to) = month_bounds(now);
                self.check_bucket(user_id, tier, expired, limit, from, to)
                    .await
            }
            QuotaPolicy::DailyLimit(limit) => {
                let (from, to) = day_bounds(now);
                self.check_bucket(user_id, tier, expired, limit, from, to)
                    .await
            }
        }
    }

    async fn check_bucket(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
        expired: bool,
        limit: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> QuotaDecision {
        let reset_at = Some(to.timestamp().max(0) as u64);

        let used = match self.ledger.count_between(user_id, from, to).await {
            Ok(used) => used,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Usage ledger unavailable, admitting request");
                return QuotaDecision {
                    allowed: true,
                    used: 0,
                    remaining: QuotaRemaining::Limited(limit as u64),
                    reset_at,
                    subscription_expired: expired,
                    tier,
                };
            }
        };

        if used >= limit as u64 {
            QuotaDecision {
                allowed: false,
                used,
                remaining: QuotaRemaining::Limited(0),
                reset_at,
                subscription_expired: expired,
                tier,
            }
        } else {
            QuotaDecision {
                allowed: true,
                used,
                remaining: QuotaRemaining::Limited(limit as u64 - used),
                reset_at,
                subscription_expired: expired,
                tier,
            }
        }
    }
}

/// Start of the current UTC month and start of the next one
fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = month_start(now.year(), now.month(), now);
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = month_start(next_year, next_month, now);
    (start, end)
}

/// Midnight UTC on the first of the given month; the inputs are always a
/// valid calendar date so the fallback never fires
fn month_start(year: i32, month: u32, fallback: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(fallback)
}

/// Start of the current UTC day and start of the next one
fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = now.date_naive();
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    let end = date
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    (start, end)
}

/// In-memory subscription store for development and tests
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<Uuid, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn upsert(&self, subscription: Subscription) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.user_id, subscription);
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find(&self, user_id: Uuid) -> Result<Option<Subscription>, QuotaError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(&user_id).cloned())
    }

    async fn downgrade_to_free(&self, user_id: Uuid) -> Result<(), QuotaError> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscription) = subscriptions.get_mut(&user_id) {
            subscription.tier = SubscriptionTier::Free;
            subscription.end_date = None;
        }
        Ok(())
    }
}

/// In-memory usage ledger for development and tests
pub struct InMemoryUsageLedger {
    events: Arc<RwLock<HashMap<Uuid, Vec<DateTime<Utc>>>>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryUsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn record(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), QuotaError> {
        let mut events = self.events.write().await;
        events.entry(user_id).or_default().push(at);
        Ok(())
    }

    async fn count_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, QuotaError> {
        let events = self.events.read().await;
        Ok(events
            .get(&user_id)
            .map(|times| times.iter().filter(|t| **t >= from && **t < to).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn enforcer(
        policy: QuotaPolicy,
    ) -> (
        QuotaEnforcer,
        Arc<InMemorySubscriptionStore>,
        Arc<InMemoryUsageLedger>,
    ) {
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let enforcer = QuotaEnforcer::new(subscriptions.clone(), ledger.clone(), policy);
        (enforcer, subscriptions, ledger)
    }

    #[tokio::test]
    async fn test_free_user_under_limit_is_allowed() {
        let (enforcer, _, ledger) = enforcer(QuotaPolicy::MonthlyLimit(50));
        let user = Uuid::new_v4();

        ledger.record(user, Utc::now()).await.unwrap();
        ledger.record(user, Utc::now()).await.unwrap();

        let decision = enforcer.authorize(user, SubscriptionTier::Free).await;
        assert!(decision.allowed);
        assert_eq!(decision.used, 2);
        assert_eq!(decision.remaining, QuotaRemaining::Limited(48));
        assert!(decision.reset_at.unwrap_or(0) > Utc::now().timestamp() as u64);
        assert!(!decision.subscription_expired);
    }

    #[tokio::test]
    async fn test_free_user_at_limit_is_blocked() {
        let (enforcer, _, ledger) = enforcer(QuotaPolicy::MonthlyLimit(3));
        let user = Uuid::new_v4();

        for _ in 0..3 {
            ledger.record(user, Utc::now()).await.unwrap();
        }

        let decision = enforcer.authorize(user, SubscriptionTier::Free).await;
        assert!(!decision.allowed);
        assert_eq!(decision.used, 3);
        assert_eq!(decision.remaining, QuotaRemaining::Limited(0));
    }

    #[tokio::test]
    async fn test_last_months_usage_does_not_count() {
        let (enforcer, _, ledger) = enforcer(QuotaPolicy::MonthlyLimit(3));
        let user = Uuid::new_v4();

        let last_month = Utc::now() - Duration::days(40);
        for _ in 0..3 {
            ledger.record(user, last_month).await.unwrap();
        }
        ledger.record(user, Utc::now()).await.unwrap();

        let decision = enforcer.authorize(user, SubscriptionTier::Free).await;
        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
    }

    #[tokio::test]
    async fn test_daily_policy_ignores_yesterdays_usage() {
        let (enforcer, _, ledger) = enforcer(QuotaPolicy::DailyLimit(3));
        let user = Uuid::new_v4();

        let yesterday = Utc::now() - Duration::days(1);
        for _ in 0..3 {
            ledger.record(user, yesterday).await.unwrap();
        }

        let decision = enforcer.authorize(user, SubscriptionTier::Free).await;
        assert!(decision.allowed);
        assert_eq!(decision.used, 0);
        assert_eq!(decision.remaining, QuotaRemaining::Limited(3));
    }

    #[tokio::test]
    async fn test_daily_policy_blocks_at_todays_limit() {
        let (enforcer, _, ledger) = enforcer(QuotaPolicy::DailyLimit(3));
        let user = Uuid::new_v4();

        for _ in 0..3 {
            ledger.record(user, Utc::now()).await.unwrap();
        }

        let decision = enforcer.authorize(user, SubscriptionTier::Free).await;
        assert!(!decision.allowed);
        assert_eq!(decision.used, 3);
        assert_eq!(decision.remaining, QuotaRemaining::Limited(0));

        // The bucket rolls over at the next UTC midnight, not at month end
        let reset = decision.reset_at.unwrap();
        let now = Utc::now().timestamp() as u64;
        assert!(reset > now);
        assert!(reset <= now + 24 * 60 * 60);
    }

    #[tokio::test]
    async fn test_paid_tiers_are_unlimited() {
        let (enforcer, subscriptions, ledger) = enforcer(QuotaPolicy::MonthlyLimit(1));
        let user = Uuid::new_v4();

        subscriptions
            .upsert(Subscription {
                user_id: user,
                tier: SubscriptionTier::Pro,
                end_date: Some(Utc::now() + Duration::days(30)),
            })
            .await;

        for _ in 0..10 {
            ledger.record(user, Utc::now()).await.unwrap();
        }

        let decision = enforcer.authorize(user, SubscriptionTier::Pro).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, QuotaRemaining::Unlimited);
        assert!(decision.reset_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_paid_subscription_downgrades_to_free() {
        let (enforcer, subscriptions, _) = enforcer(QuotaPolicy::MonthlyLimit(50));
        let user = Uuid::new_v4();

        subscriptions
            .upsert(Subscription {
                user_id: user,
                tier: SubscriptionTier::Pro,
                end_date: Some(Utc::now() - Duration::days(1)),
            })
            .await;

        let decision = enforcer.authorize(user, SubscriptionTier::Pro).await;
        assert!(decision.allowed);
        assert!(decision.subscription_expired);
        assert_eq!(decision.tier, SubscriptionTier::Free);
        assert_eq!(decision.remaining, QuotaRemaining::Limited(50));

        // The record itself is now free
        let stored = subscriptions.find(user).await.unwrap().unwrap();
        assert_eq!(stored.tier, SubscriptionTier::Free);
        assert!(stored.end_date.is_none());
    }

    #[tokio::test]
    async fn test_expired_subscription_counts_against_free_limit() {
        let (enforcer, subscriptions, ledger) = enforcer(QuotaPolicy::MonthlyLimit(2));
        let user = Uuid::new_v4();

        subscriptions
            .upsert(Subscription {
                user_id: user,
                tier: SubscriptionTier::Team,
                end_date: Some(Utc::now() - Duration::hours(1)),
            })
            .await;

        for _ in 0..2 {
            ledger.record(user, Utc::now()).await.unwrap();
        }

        let decision = enforcer.authorize(user, SubscriptionTier::Team).await;
        assert!(!decision.allowed);
        assert!(decision.subscription_expired);
        assert_eq!(decision.tier, SubscriptionTier::Free);
    }

    #[tokio::test]
    async fn test_record_wins_over_declared_tier() {
        let (enforcer, subscriptions, ledger) = enforcer(QuotaPolicy::MonthlyLimit(1));
        let user = Uuid::new_v4();

        subscriptions
            .upsert(Subscription {
                user_id: user,
                tier: SubscriptionTier::Free,
                end_date: None,
            })
            .await;
        ledger.record(user, Utc::now()).await.unwrap();

        // Declaring pro does not buy an unlimited allowance
        let decision = enforcer.authorize(user, SubscriptionTier::Pro).await;
        assert!(!decision.allowed);
        assert_eq!(decision.tier, SubscriptionTier::Free);
    }

    #[tokio::test]
    async fn test_user_without_record_uses_declared_tier() {
        let (enforcer, _, _) = enforcer(QuotaPolicy::MonthlyLimit(50));
        let user = Uuid::new_v4();

        let decision = enforcer.authorize(user, SubscriptionTier::Pro).await;
        assert!(decision.allowed);
        assert_eq!(decision.tier, SubscriptionTier::Pro);
        assert_eq!(decision.remaining, QuotaRemaining::Unlimited);
    }

    struct FailingLedger;

    #[async_trait]
    impl UsageLedger for FailingLedger {
        async fn record(&self, _user_id: Uuid, _at: DateTime<Utc>) -> Result<(), QuotaError> {
            Err(QuotaError("ledger is down".to_string()))
        }
        async fn count_between(
            &self,
            _user_id: Uuid,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<u64, QuotaError> {
            Err(QuotaError("ledger is down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ledger_outage_fails_open() {
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let enforcer = QuotaEnforcer::new(
            subscriptions,
            Arc::new(FailingLedger),
            QuotaPolicy::MonthlyLimit(50),
        );

        let decision = enforcer
            .authorize(Uuid::new_v4(), SubscriptionTier::Free)
            .await;
        assert!(decision.allowed);
    }

    #[test]
    fn test_remaining_serialization() {
        assert_eq!(
            serde_json::to_string(&QuotaRemaining::Limited(5)).unwrap(),
            "5"
        );
        assert_eq!(
            serde_json::to_string(&QuotaRemaining::Unlimited).unwrap(),
            "\"unlimited\""
        );
    }

    #[test]
    fn test_month_bounds_cover_december() {
        let december = Utc
            .with_ymd_and_hms(2024, 12, 15, 12, 0, 0)
            .single()
            .unwrap();
        let (from, to) = month_bounds(december);
        assert_eq!(from.month(), 12);
        assert_eq!(to.year(), 2025);
        assert_eq!(to.month(), 1);
    }

    #[test]
    fn test_day_bounds_run_midnight_to_midnight() {
        let afternoon = Utc
            .with_ymd_and_hms(2024, 6, 15, 13, 45, 12)
            .single()
            .unwrap();
        let (from, to) = day_bounds(afternoon);
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).single().unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).single().unwrap());
    }

    #[test]
    fn test_day_bounds_cross_month_end() {
        let late = Utc
            .with_ymd_and_hms(2024, 1, 31, 23, 59, 59)
            .single()
            .unwrap();
        let (from, to) = day_bounds(late);
        assert_eq!(from.day(), 31);
        assert_eq!(to.month(), 2);
        assert_eq!(to.day(), 1);
    }

    #[test]
    fn test_day_bounds_cross_december() {
        let new_years_eve = Utc
            .with_ymd_and_hms(2024, 12, 31, 8, 0, 0)
            .single()
            .unwrap();
        let (from, to) = day_bounds(new_years_eve);
        assert_eq!(from.year(), 2024);
        assert_eq!(to.year(), 2025);
        assert_eq!(to.month(), 1);
        assert_eq!(to.day(), 1);
    }

    #[test]
    fn test_tier_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&SubscriptionTier::Pro).unwrap(),
            "\"pro\""
        );
        let tier: SubscriptionTier = serde_json::from_str("\"team\"").unwrap();
        assert_eq!(tier, SubscriptionTier::Team);
    }
}
