//! In-process counters exposed on the metrics endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::RwLock;

/// How an admission decision went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    RateLimited,
    QuotaExceeded,
    DemoRejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionMetrics {
    pub total_requests: u64,
    pub admitted: u64,
    pub rate_limited: u64,
    pub quota_exceeded: u64,
    pub demo_rejected: u64,
    pub since: u64,
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            admitted: 0,
            rate_limited: 0,
            quota_exceeded: 0,
            demo_rejected: 0,
            since: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Attempt counters for one cascade stage.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub admission: AdmissionMetrics,
    pub providers: HashMap<String, ProviderMetrics>,
}

#[derive(Debug, Clone)]
pub struct MetricsCollector {
    admission: Arc<RwLock<AdmissionMetrics>>,
    providers: Arc<RwLock<HashMap<String, ProviderMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            admission: Arc::new(RwLock::new(AdmissionMetrics::default())),
            providers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record_admission(&self, outcome: AdmissionOutcome) {
        let mut admission = self.admission.write().await;
        admission.total_requests += 1;
        match outcome {
            AdmissionOutcome::Admitted => admission.admitted += 1,
            AdmissionOutcome::RateLimited => admission.rate_limited += 1,
            AdmissionOutcome::QuotaExceeded => admission.quota_exceeded += 1,
            AdmissionOutcome::DemoRejected => admission.demo_rejected += 1,
        }
    }

    pub async fn record_provider(&self, provider: &str, succeeded: bool) {
        let mut providers = self.providers.write().await;
        let entry = providers.entry(provider.to_string()).or_default();
        entry.attempts += 1;
        if succeeded {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admission: self.admission.read().await.clone(),
            providers: self.providers.read().await.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admission_outcomes_are_tallied() {
        let collector = MetricsCollector::new();
        collector.record_admission(AdmissionOutcome::Admitted).await;
        collector.record_admission(AdmissionOutcome::Admitted).await;
        collector
            .record_admission(AdmissionOutcome::RateLimited)
            .await;
        collector
            .record_admission(AdmissionOutcome::QuotaExceeded)
            .await;

        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.admission.total_requests, 4);
        assert_eq!(snapshot.admission.admitted, 2);
        assert_eq!(snapshot.admission.rate_limited, 1);
        assert_eq!(snapshot.admission.quota_exceeded, 1);
        assert_eq!(snapshot.admission.demo_rejected, 0);
    }

    #[tokio::test]
    async fn test_provider_counters_split_by_name() {
        let collector = MetricsCollector::new();
        collector.record_provider("openai", false).await;
        collector.record_provider("gemini", true).await;
        collector.record_provider("gemini", true).await;

        let snapshot = collector.snapshot().await;
        let openai = &snapshot.providers["openai"];
        assert_eq!(openai.attempts, 1);
        assert_eq!(openai.failures, 1);

        let gemini = &snapshot.providers["gemini"];
        assert_eq!(gemini.attempts, 2);
        assert_eq!(gemini.successes, 2);
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let collector = MetricsCollector::new();
        let clone = collector.clone();
        clone.record_admission(AdmissionOutcome::DemoRejected).await;

        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.admission.demo_rejected, 1);
    }
}
