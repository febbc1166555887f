//! Tier-aware provider failover.
//!
//! Each tier maps to an ordered chain of remote steps; a step that
//! errors or returns an unusable payload is logged and the next one is
//! tried. The in-process pattern analyzer terminates every chain, so
//! analysis as a whole cannot fail.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analysis::{AnalysisResult, AnalyzeRequest, ModelPayload};
use crate::language::{detect_language, Language};
use crate::metrics::MetricsCollector;
use crate::prompt::{PromptBuilder, PromptParts};
use crate::providers::mock::MOCK_PROVIDER;
use crate::providers::{
    parse_model_json, MockAnalyzer, ProviderClients, ProviderError, ProviderKind,
};
use crate::quota::SubscriptionTier;

/// One remote attempt in a tier's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderStep {
    pub kind: ProviderKind,
    pub model: &'static str,
    pub max_tokens: u32,
}

const FREE_STEPS: &[ProviderStep] = &[
    ProviderStep {
        kind: ProviderKind::Gemini,
        model: "gemini-1.5-flash",
        max_tokens: 1024,
    },
    ProviderStep {
        kind: ProviderKind::OpenAi,
        model: "gpt-4o-mini",
        max_tokens: 1024,
    },
];

const PRO_STEPS: &[ProviderStep] = &[
    ProviderStep {
        kind: ProviderKind::OpenAi,
        model: "gpt-4o",
        max_tokens: 2048,
    },
    ProviderStep {
        kind: ProviderKind::Anthropic,
        model: "claude-3-5-sonnet-20241022",
        max_tokens: 2048,
    },
    ProviderStep {
        kind: ProviderKind::Gemini,
        model: "gemini-1.5-pro",
        max_tokens: 2048,
    },
];

const TEAM_STEPS: &[ProviderStep] = &[
    ProviderStep {
        kind: ProviderKind::Anthropic,
        model: "claude-3-opus-20240229",
        max_tokens: 4096,
    },
    ProviderStep {
        kind: ProviderKind::OpenAi,
        model: "gpt-4o",
        max_tokens: 4096,
    },
    ProviderStep {
        kind: ProviderKind::Gemini,
        model: "gemini-1.5-pro",
        max_tokens: 4096,
    },
];

/// The ordered remote steps for one tier. The pattern analyzer is the
/// implicit terminal stage and never appears in the list.
#[derive(Debug, Clone)]
pub struct ProviderChain {
    steps: &'static [ProviderStep],
}

impl ProviderChain {
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        let steps = match tier {
            SubscriptionTier::Free => FREE_STEPS,
            SubscriptionTier::Pro => PRO_STEPS,
            SubscriptionTier::Team => TEAM_STEPS,
        };
        Self { steps }
    }

    pub fn steps(&self) -> &[ProviderStep] {
        self.steps
    }
}

pub struct ProviderCascade {
    clients: ProviderClients,
    mock: MockAnalyzer,
    metrics: Arc<MetricsCollector>,
}

impl ProviderCascade {
    pub fn new(clients: ProviderClients, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            clients,
            mock: MockAnalyzer::new(),
            metrics,
        }
    }

    /// Run the tier's chain until one stage produces a usable analysis.
    ///
    /// Steps run strictly in order, one at a time. A step gets exactly
    /// one attempt; failover is the retry strategy.
    pub async fn analyze(
        &self,
        tier: SubscriptionTier,
        request: &AnalyzeRequest,
    ) -> AnalysisResult {
        let language = resolve_language(request);
        let prompt = PromptBuilder::build(request, tier, language);
        let fallback_category = self.mock.category_for(&request.error_message);
        let extra_tags: Vec<String> = language
            .map(|lang| vec![lang.as_str().to_string()])
            .unwrap_or_default();

        for step in ProviderChain::for_tier(tier).steps() {
            if !self.clients.is_configured(step.kind) {
                debug!(provider = step.kind.as_str(), "skipping unconfigured provider");
                continue;
            }

            match self.try_step(step, &prompt).await {
                Ok(result) => {
                    self.metrics
                        .record_provider(step.kind.as_str(), true)
                        .await;
                    info!(
                        provider = step.kind.as_str(),
                        model = step.model,
                        "analysis complete"
                    );
                    return result.into_result(
                        step.kind.as_str(),
                        step.model,
                        fallback_category,
                        &extra_tags,
                    );
                }
                Err(error) => {
                    self.metrics
                        .record_provider(step.kind.as_str(), false)
                        .await;
                    warn!(
                        provider = step.kind.as_str(),
                        model = step.model,
                        %error,
                        "cascade step failed, advancing to next"
                    );
                }
            }
        }

        self.metrics.record_provider(MOCK_PROVIDER, true).await;
        info!("all remote steps exhausted, answering from pattern table");
        self.mock.analyze(request, language)
    }

    async fn try_step(
        &self,
        step: &ProviderStep,
        prompt: &PromptParts,
    ) -> Result<ModelPayload, ProviderError> {
        let raw = self
            .clients
            .complete(step.kind, prompt, step.model, step.max_tokens)
            .await?;
        parse_model_json(&raw)
    }
}

/// Declared language wins; otherwise fall back to keyword detection over
/// the error text and snippet.
fn resolve_language(request: &AnalyzeRequest) -> Option<Language> {
    request
        .language
        .as_deref()
        .and_then(Language::from_name)
        .or_else(|| detect_language(&request.error_message, request.code_snippet.as_deref()))
}
