//! Tier-based response shaping.
//!
//! Pure transformation of a finished analysis into the payload a caller
//! is entitled to see. Free callers lose the solution detail fields and
//! gain an upgrade prompt; pro callers lose only the team extras; team
//! callers see the result untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::{AnalysisResult, Complexity, ErrorCategory};
use crate::quota::SubscriptionTier;

const UPGRADE_URL: &str = "https://errwarden.dev/pricing";

/// Per-tier wire shape. Untagged, so each variant serializes as a plain
/// object with exactly the keys that tier is allowed.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FilteredResult {
    Free(FreeAnalysis),
    Pro(ProAnalysis),
    Team(AnalysisResult),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeAnalysis {
    pub explanation: String,
    pub category: ErrorCategory,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub complexity: Complexity,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub upgrade: UpgradePrompt,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProAnalysis {
    pub explanation: String,
    pub solution: String,
    pub code_example: Option<String>,
    pub category: ErrorCategory,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub prevention_tips: Vec<String>,
    pub complexity: Complexity,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePrompt {
    pub message: String,
    pub upgrade_url: String,
}

impl UpgradePrompt {
    fn for_free_tier() -> Self {
        Self {
            message: "Upgrade to Pro for full solutions, corrected code examples and \
                      prevention tips."
                .to_string(),
            upgrade_url: UPGRADE_URL.to_string(),
        }
    }
}

pub struct TierResponseFilter;

impl TierResponseFilter {
    pub fn filter(result: AnalysisResult, tier: SubscriptionTier) -> FilteredResult {
        match tier {
            SubscriptionTier::Free => FilteredResult::Free(FreeAnalysis {
                explanation: result.explanation,
                category: result.category,
                tags: result.tags,
                confidence: result.confidence,
                complexity: result.complexity,
                provider: result.provider,
                model: result.model,
                timestamp: result.timestamp,
                upgrade: UpgradePrompt::for_free_tier(),
            }),
            SubscriptionTier::Pro => FilteredResult::Pro(ProAnalysis {
                explanation: result.explanation,
                solution: result.solution,
                code_example: result.code_example,
                category: result.category,
                tags: result.tags,
                confidence: result.confidence,
                prevention_tips: result.prevention_tips,
                complexity: result.complexity,
                provider: result.provider,
                model: result.model,
                timestamp: result.timestamp,
            }),
            SubscriptionTier::Team => FilteredResult::Team(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_result() -> AnalysisResult {
        AnalysisResult {
            explanation: "x was undefined".to_string(),
            solution: "guard the access".to_string(),
            code_example: Some("if (x) { use(x); }".to_string()),
            category: ErrorCategory::TypeError,
            tags: vec!["javascript".to_string()],
            confidence: 0.92,
            domain_knowledge: Some("V8 reports property reads on undefined".to_string()),
            prevention_tips: vec!["validate inputs".to_string()],
            complexity: Complexity::Beginner,
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_free_tier_strips_detail_and_adds_upgrade() {
        let filtered = TierResponseFilter::filter(full_result(), SubscriptionTier::Free);
        let json = serde_json::to_value(&filtered).unwrap();
        let object = json.as_object().unwrap();

        assert!(!object.contains_key("solution"));
        assert!(!object.contains_key("codeExample"));
        assert!(!object.contains_key("preventionTips"));
        assert!(!object.contains_key("domainKnowledge"));
        assert_eq!(json["explanation"], "x was undefined");
        assert_eq!(json["upgrade"]["upgradeUrl"], UPGRADE_URL);
    }

    #[test]
    fn test_pro_tier_keeps_detail_but_not_team_extras() {
        let filtered = TierResponseFilter::filter(full_result(), SubscriptionTier::Pro);
        let json = serde_json::to_value(&filtered).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(json["codeExample"], "if (x) { use(x); }");
        assert_eq!(json["preventionTips"][0], "validate inputs");
        assert!(!object.contains_key("domainKnowledge"));
        assert!(!object.contains_key("upgrade"));
    }

    #[test]
    fn test_team_tier_passes_everything_through() {
        let result = full_result();
        let expected = serde_json::to_value(&result).unwrap();

        let filtered = TierResponseFilter::filter(result, SubscriptionTier::Team);
        let json = serde_json::to_value(&filtered).unwrap();

        assert_eq!(json, expected);
        assert_eq!(json["domainKnowledge"], "V8 reports property reads on undefined");
    }

    #[test]
    fn test_team_tier_preserves_null_keys() {
        let mut result = full_result();
        result.code_example = None;
        result.domain_knowledge = None;

        let filtered = TierResponseFilter::filter(result, SubscriptionTier::Team);
        let json = serde_json::to_value(&filtered).unwrap();
        let object = json.as_object().unwrap();

        assert!(object.contains_key("codeExample"));
        assert!(json["codeExample"].is_null());
    }
}
