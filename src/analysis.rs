//! Request and result types for error analysis.
//!
//! The wire format is camelCase JSON. [`AnalysisResult`] is the canonical
//! shape every cascade stage must produce; provider-specific payloads are
//! adapted into it, never passed through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::quota::SubscriptionTier;

/// An inbound analysis request, shared by the authenticated and demo routes
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Tier the client claims; the subscription record overrides it
    #[serde(default)]
    pub tier: Option<SubscriptionTier>,
    #[validate(length(min = 1, max = 20000))]
    pub error_message: String,
    /// Programming language the client claims the error is from
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    #[validate(length(max = 50000))]
    pub code_snippet: Option<String>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub conversation_history: Vec<ConversationTurn>,
    /// Scraped documentation passed along by the client, if any
    #[serde(default)]
    pub documentation_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Error classification shared by the mock classifier and model payloads.
/// Unknown values fall back to `Runtime` instead of failing the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TypeError,
    ReferenceError,
    SyntaxError,
    IndexError,
    KeyError,
    AttributeError,
    NullReference,
    DivisionByZero,
    ImportError,
    StackOverflow,
    OutOfMemory,
    Timeout,
    Network,
    Permission,
    #[serde(other)]
    Runtime,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::ReferenceError => "reference_error",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::IndexError => "index_error",
            ErrorCategory::KeyError => "key_error",
            ErrorCategory::AttributeError => "attribute_error",
            ErrorCategory::NullReference => "null_reference",
            ErrorCategory::DivisionByZero => "division_by_zero",
            ErrorCategory::ImportError => "import_error",
            ErrorCategory::StackOverflow => "stack_overflow",
            ErrorCategory::OutOfMemory => "out_of_memory",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Runtime => "runtime",
        }
    }
}

/// How much background the reader is assumed to have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Beginner,
    Intermediate,
    Advanced,
}

/// Canonical analysis shape produced by every cascade stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub explanation: String,
    pub solution: String,
    pub code_example: Option<String>,
    pub category: ErrorCategory,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub domain_knowledge: Option<String>,
    pub prevention_tips: Vec<String>,
    pub complexity: Complexity,
    /// Which cascade stage produced this result
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

/// The JSON object models are instructed to return.
///
/// Everything except the explanation is optional; a payload without an
/// explanation is malformed and fails the cascade step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPayload {
    pub explanation: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub code_example: Option<String>,
    #[serde(default)]
    pub category: Option<ErrorCategory>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub domain_knowledge: Option<String>,
    #[serde(default)]
    pub prevention_tips: Vec<String>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
}

impl ModelPayload {
    /// Normalize into the canonical result, filling gaps with heuristics
    /// derived from the raw error text
    pub fn into_result(
        self,
        provider: &str,
        model: &str,
        fallback_category: ErrorCategory,
        extra_tags: &[String],
    ) -> AnalysisResult {
        let mut tags = self.tags;
        for tag in extra_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        AnalysisResult {
            explanation: self.explanation,
            solution: self.solution,
            code_example: self.code_example,
            category: self.category.unwrap_or(fallback_category),
            tags,
            confidence: self.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
            domain_knowledge: self.domain_knowledge,
            prevention_tips: self.prevention_tips,
            complexity: self.complexity.unwrap_or(Complexity::Intermediate),
            provider: provider.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
        }
    }
}
