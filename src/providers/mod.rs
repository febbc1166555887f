//! Upstream model providers.
//!
//! Each client speaks one vendor's wire format and returns the raw
//! completion text. JSON extraction lives here so every provider is held
//! to the same payload contract.

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use mock::MockAnalyzer;
pub use openai::OpenAiClient;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::ModelPayload;
use crate::config::ProvidersConfig;
use crate::prompt::PromptParts;

/// Sampling temperature for every analysis request. Low on purpose, the
/// output is parsed as JSON.
pub(crate) const TEMPERATURE: f32 = 0.3;

/// Remote vendors the cascade can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single provider call failed. The cascade logs these and moves on;
/// callers never see them directly.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion: {0}")]
    MalformedResponse(String),

    #[error("provider returned an empty completion")]
    EmptyCompletion,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Request(format!("connection failed: {}", err))
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}

/// One HTTP client per configured vendor, sharing a connection pool.
pub struct ProviderClients {
    openai: Option<OpenAiClient>,
    gemini: Option<GeminiClient>,
    anthropic: Option<AnthropicClient>,
}

impl ProviderClients {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let http = build_http_client(config.request_timeout);

        Self {
            openai: config.openai_api_key.as_ref().map(|key| {
                OpenAiClient::new(http.clone(), key.clone(), config.openai_base_url.clone())
            }),
            gemini: config.gemini_api_key.as_ref().map(|key| {
                GeminiClient::new(http.clone(), key.clone(), config.gemini_base_url.clone())
            }),
            anthropic: config.anthropic_api_key.as_ref().map(|key| {
                AnthropicClient::new(http.clone(), key.clone(), config.anthropic_base_url.clone())
            }),
        }
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::OpenAi => self.openai.is_some(),
            ProviderKind::Gemini => self.gemini.is_some(),
            ProviderKind::Anthropic => self.anthropic.is_some(),
        }
    }

    /// Run one completion against a vendor and return the raw text.
    pub async fn complete(
        &self,
        kind: ProviderKind,
        prompt: &PromptParts,
        model: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        match kind {
            ProviderKind::OpenAi => match &self.openai {
                Some(client) => client.complete(prompt, model, max_tokens).await,
                None => Err(ProviderError::NotConfigured("openai")),
            },
            ProviderKind::Gemini => match &self.gemini {
                Some(client) => client.complete(prompt, model, max_tokens).await,
                None => Err(ProviderError::NotConfigured("gemini")),
            },
            ProviderKind::Anthropic => match &self.anthropic {
                Some(client) => client.complete(prompt, model, max_tokens).await,
                None => Err(ProviderError::NotConfigured("anthropic")),
            },
        }
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Extract the analysis payload from a raw model completion.
///
/// Models are told to reply with bare JSON but routinely wrap it in
/// markdown fences or lead with prose. Tried in order:
/// 1. the full trimmed text as JSON
/// 2. a ```json fenced block
/// 3. any fenced block
/// 4. the first JSON object found anywhere in the text
pub fn parse_model_json(raw: &str) -> Result<ModelPayload, ProviderError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }

    if let Ok(payload) = serde_json::from_str::<ModelPayload>(trimmed) {
        return Ok(payload);
    }

    if let Some(block) = extract_fenced_block(trimmed, Some("json")) {
        if let Ok(payload) = serde_json::from_str::<ModelPayload>(&block) {
            return Ok(payload);
        }
    }

    if let Some(block) = extract_fenced_block(trimmed, None) {
        if let Ok(payload) = serde_json::from_str::<ModelPayload>(&block) {
            return Ok(payload);
        }
    }

    if let Some(candidate) = extract_first_json_value(trimmed) {
        if let Ok(payload) = serde_json::from_str::<ModelPayload>(&candidate) {
            return Ok(payload);
        }
    }

    Err(ProviderError::MalformedResponse(
        "no analysis object found in completion".to_string(),
    ))
}

/// Find the first parseable JSON value starting at a `{` or `[`.
///
/// `serde_json::Deserializer` reports how many bytes the value consumed,
/// which trims any trailing prose the model appended.
fn extract_first_json_value(content: &str) -> Option<String> {
    for (idx, ch) in content.char_indices() {
        if ch == '{' || ch == '[' {
            let candidate = &content[idx..];
            let mut stream =
                serde_json::Deserializer::from_str(candidate).into_iter::<serde_json::Value>();
            if let Some(Ok(_)) = stream.next() {
                let end = stream.byte_offset();
                if end > 0 && end <= candidate.len() {
                    return Some(candidate[..end].to_string());
                }
            }
        }
    }
    None
}

fn extract_fenced_block(content: &str, language: Option<&str>) -> Option<String> {
    let fence = "```";
    let mut search = content;

    loop {
        let start = search.find(fence)?;
        let after_start = &search[start + fence.len()..];

        let (lang_tag, rest) = match after_start.find('\n') {
            Some(line_end) => (after_start[..line_end].trim(), &after_start[line_end + 1..]),
            None => return None,
        };

        if let Some(expected) = language {
            if !lang_tag.eq_ignore_ascii_case(expected) {
                search = after_start;
                continue;
            }
        }

        let end = rest.find(fence)?;
        return Some(rest[..end].trim().to_string());
    }
}

/// Keep upstream error bodies short enough for log lines.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut cut = MAX;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &body[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_json() {
        let raw = r#"{"explanation": "x is undefined", "solution": "guard it"}"#;
        let payload = parse_model_json(raw).unwrap();
        assert_eq!(payload.explanation, "x is undefined");
        assert_eq!(payload.solution, "guard it");
    }

    #[test]
    fn test_parse_json_fence() {
        let raw = "Here is the analysis:\n```json\n{\"explanation\": \"null deref\"}\n```\n";
        let payload = parse_model_json(raw).unwrap();
        assert_eq!(payload.explanation, "null deref");
    }

    #[test]
    fn test_parse_untagged_fence() {
        let raw = "```\n{\"explanation\": \"bad import\"}\n```";
        let payload = parse_model_json(raw).unwrap();
        assert_eq!(payload.explanation, "bad import");
    }

    #[test]
    fn test_parse_embedded_object_with_trailing_prose() {
        let raw = "Sure! {\"explanation\": \"off by one\"} Hope that helps.";
        let payload = parse_model_json(raw).unwrap();
        assert_eq!(payload.explanation, "off by one");
    }

    #[test]
    fn test_skips_non_json_fence_before_json_fence() {
        let raw = "```python\nprint(x)\n```\n```json\n{\"explanation\": \"name not defined\"}\n```";
        let payload = parse_model_json(raw).unwrap();
        assert_eq!(payload.explanation, "name not defined");
    }

    #[test]
    fn test_missing_explanation_is_malformed() {
        let raw = r#"{"solution": "restart it"}"#;
        assert!(matches!(
            parse_model_json(raw),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_empty_completion() {
        assert!(matches!(
            parse_model_json("   \n"),
            Err(ProviderError::EmptyCompletion)
        ));
    }

    #[test]
    fn test_prose_only_is_malformed() {
        assert!(matches!(
            parse_model_json("I could not analyze this error."),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(400);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 304);
    }

    #[test]
    fn test_provider_kind_display() {
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
        assert_eq!(ProviderKind::Anthropic.as_str(), "anthropic");
    }

    #[test]
    fn test_unconfigured_clients() {
        let clients = ProviderClients::from_config(&ProvidersConfig::default());
        assert!(!clients.is_configured(ProviderKind::OpenAi));
        assert!(!clients.is_configured(ProviderKind::Gemini));
        assert!(!clients.is_configured(ProviderKind::Anthropic));
    }
}
