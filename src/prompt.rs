//! Prompt assembly for the analysis cascade.
//!
//! Every provider receives the same system/user pair; only the tier changes
//! the format instructions. The system prompt pins the JSON shape so the
//! response parser has a fighting chance with every model.

use crate::analysis::{AnalyzeRequest, TurnRole};
use crate::language::{detect_script, Language, Script};
use crate::quota::SubscriptionTier;

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert debugging assistant. You explain programming errors accurately and suggest working fixes.

Respond with a single JSON object and nothing else, using exactly these keys:
{
    "explanation": "What went wrong and why, in plain language.",
    "solution": "How to fix it, as concrete steps.",
    "codeExample": "A corrected code snippet, or null.",
    "category": "One of: type_error, reference_error, syntax_error, index_error, key_error, attribute_error, null_reference, division_by_zero, import_error, stack_overflow, out_of_memory, timeout, network, permission, runtime.",
    "tags": ["short", "lowercase", "keywords"],
    "confidence": 0.0,
    "domainKnowledge": "Deeper background about the framework or runtime involved, or null.",
    "preventionTips": ["How to avoid this class of error in the future."],
    "complexity": "One of: beginner, intermediate, advanced."
}

Set confidence between 0 and 1 based on how certain you are of the diagnosis. Do not wrap the JSON in markdown fences."#;

pub const FREE_FORMAT_INSTRUCTIONS: &str = r#"Keep the explanation to two or three sentences and the solution brief. Leave domainKnowledge null."#;

pub const PRO_FORMAT_INSTRUCTIONS: &str = r#"Give a thorough explanation, a step-by-step solution and a corrected code example. Include prevention tips. Leave domainKnowledge null."#;

pub const TEAM_FORMAT_INSTRUCTIONS: &str = r#"Give a thorough explanation, a step-by-step solution and a corrected code example. Include prevention tips and fill domainKnowledge with deeper background on the runtime or framework involved."#;

pub const NON_LATIN_NOTE: &str = r#"The user writes in a non-English language. Write the explanation, solution and prevention tips in the user's language; keep code and category values in English."#;

/// System/user pair handed to a provider
#[derive(Debug, Clone)]
pub struct PromptParts {
    pub system: String,
    pub user: String,
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(
        request: &AnalyzeRequest,
        tier: SubscriptionTier,
        language: Option<Language>,
    ) -> PromptParts {
        let mut system = String::from(ANALYSIS_SYSTEM_PROMPT);
        system.push_str("\n\n");
        system.push_str(match tier {
            SubscriptionTier::Free => FREE_FORMAT_INSTRUCTIONS,
            SubscriptionTier::Pro => PRO_FORMAT_INSTRUCTIONS,
            SubscriptionTier::Team => TEAM_FORMAT_INSTRUCTIONS,
        });

        if detect_script(&request.error_message) != Script::Latin {
            system.push_str("\n\n");
            system.push_str(NON_LATIN_NOTE);
        }

        let mut user = String::from("Error:\n");
        user.push_str(&request.error_message);

        if let Some(language) = language {
            user.push_str("\n\nLanguage: ");
            user.push_str(language.as_str());
        }

        if let Some(code) = request
            .code_snippet
            .as_deref()
            .filter(|code| !code.trim().is_empty())
        {
            user.push_str("\n\nCode:\n```\n");
            user.push_str(code);
            user.push_str("\n```");
        }

        if !request.conversation_history.is_empty() {
            user.push_str("\n\nConversation so far:");
            for turn in &request.conversation_history {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                };
                user.push('\n');
                user.push_str(role);
                user.push_str(": ");
                user.push_str(&turn.content);
            }
        }

        if let Some(docs) = request
            .documentation_context
            .as_deref()
            .filter(|docs| !docs.trim().is_empty())
        {
            user.push_str("\n\nDocumentation context:\n");
            user.push_str(docs);
        }

        PromptParts { system, user }
    }
}
