use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Provider wire-protocol family. Determines which normalizer state machine
/// interprets the raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Anthropic,
    OpenAi,
    Gemini,
    DeepSeek,
    Bedrock,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Gemini => "gemini",
            ProviderFamily::DeepSeek => "deepseek",
            ProviderFamily::Bedrock => "bedrock",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a model exposes its reasoning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThinkingKind {
    /// No reasoning channel at all.
    None,
    /// Streams native thinking blocks (Anthropic extended thinking,
    /// DeepSeek reasoning_content).
    Native,
    /// Streams summarized thoughts (Gemini `thought` parts).
    Summary,
    /// Accepts a reasoning-effort knob but hides the stream
    /// (OpenAI o-family: token counts only).
    ReasoningEffort,
}

/// Reasoning capability sub-record.
///
/// Dictates three downstream behaviors: whether the request carries a
/// thinking-budget field, whether a `thinking_start` is surfaced on the
/// first reasoning delta, and whether hidden reasoning (token counts
/// without a stream) is tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThinkingSupport {
    pub kind: ThinkingKind,
    /// Upper bound for the thinking budget. Zero when `kind` is `None`.
    pub max_budget_tokens: u32,
    /// Budget used when the request does not override it.
    pub default_budget_tokens: u32,
}

impl ThinkingSupport {
    pub fn none() -> Self {
        Self {
            kind: ThinkingKind::None,
            max_budget_tokens: 0,
            default_budget_tokens: 0,
        }
    }

    /// Whether the provider request should carry a reasoning-budget field.
    pub fn wants_budget(&self) -> bool {
        matches!(self.kind, ThinkingKind::Native | ThinkingKind::ReasoningEffort)
            && self.max_budget_tokens > 0
    }

    /// Whether reasoning arrives as a visible stream.
    pub fn streams(&self) -> bool {
        matches!(self.kind, ThinkingKind::Native | ThinkingKind::Summary)
    }

    /// Whether the model reports reasoning tokens without streaming content.
    pub fn hidden(&self) -> bool {
        self.kind == ThinkingKind::ReasoningEffort
    }
}

/// Capabilities of one model. Keyed by model id in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    /// Canonical model id this record describes.
    pub model_id: String,
    pub family: ProviderFamily,
    pub max_context_tokens: u32,
    pub max_output_tokens: u32,
    pub supports_tools: bool,
    /// Tool-call accuracy score in [0, 1].
    pub tool_accuracy: f32,
    pub thinking: ThinkingSupport,
    /// USD per 1K input tokens.
    pub input_cost_per_1k: f64,
    /// USD per 1K output tokens.
    pub output_cost_per_1k: f64,
}

impl ModelCapabilities {
    /// Conservative defaults for unknown models: 8K context, 4K output,
    /// no tools, no thinking, zero cost.
    pub fn conservative(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            family: ProviderFamily::OpenAi,
            max_context_tokens: 8_192,
            max_output_tokens: 4_096,
            supports_tools: false,
            tool_accuracy: 0.0,
            thinking: ThinkingSupport::none(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }

    /// Enforce the capability invariants:
    /// `max_context_tokens >= max_output_tokens > 0` and
    /// thinking budget <= `max_output_tokens`.
    pub fn validate(&self) -> Result<()> {
        if self.max_output_tokens == 0 {
            return Err(Error::Validation(format!(
                "{}: max_output_tokens must be > 0",
                self.model_id
            )));
        }
        if self.max_context_tokens < self.max_output_tokens {
            return Err(Error::Validation(format!(
                "{}: max_context_tokens ({}) < max_output_tokens ({})",
                self.model_id, self.max_context_tokens, self.max_output_tokens
            )));
        }
        if self.thinking.max_budget_tokens > self.max_output_tokens {
            return Err(Error::Validation(format!(
                "{}: thinking budget ({}) exceeds max_output_tokens ({})",
                self.model_id, self.thinking.max_budget_tokens, self.max_output_tokens
            )));
        }
        if !(0.0..=1.0).contains(&self.tool_accuracy) {
            return Err(Error::Validation(format!(
                "{}: tool_accuracy must be in [0, 1]",
                self.model_id
            )));
        }
        Ok(())
    }

    /// Estimated cost in USD for a token tally.
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ModelCapabilities {
        ModelCapabilities {
            model_id: "test-model".into(),
            family: ProviderFamily::Anthropic,
            max_context_tokens: 200_000,
            max_output_tokens: 8_192,
            supports_tools: true,
            tool_accuracy: 0.9,
            thinking: ThinkingSupport {
                kind: ThinkingKind::Native,
                max_budget_tokens: 8_000,
                default_budget_tokens: 2_000,
            },
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
        }
    }

    #[test]
    fn valid_capabilities_pass() {
        caps().validate().unwrap();
    }

    #[test]
    fn zero_output_tokens_rejected() {
        let mut c = caps();
        c.max_output_tokens = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn context_smaller_than_output_rejected() {
        let mut c = caps();
        c.max_context_tokens = 4_096;
        assert!(c.validate().is_err());
    }

    #[test]
    fn thinking_budget_above_output_rejected() {
        let mut c = caps();
        c.thinking.max_budget_tokens = 10_000;
        assert!(c.validate().is_err());
    }

    #[test]
    fn conservative_defaults_are_valid() {
        let c = ModelCapabilities::conservative("mystery-model");
        c.validate().unwrap();
        assert_eq!(c.max_context_tokens, 8_192);
        assert_eq!(c.max_output_tokens, 4_096);
        assert!(!c.supports_tools);
        assert_eq!(c.thinking.kind, ThinkingKind::None);
        assert_eq!(c.cost_usd(1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn cost_is_per_thousand_tokens() {
        let c = caps();
        let cost = c.cost_usd(10_000, 2_000);
        assert!((cost - (0.03 + 0.03)).abs() < 1e-9);
    }

    #[test]
    fn reasoning_effort_is_hidden_and_budgeted() {
        let t = ThinkingSupport {
            kind: ThinkingKind::ReasoningEffort,
            max_budget_tokens: 4_000,
            default_budget_tokens: 1_000,
        };
        assert!(t.wants_budget());
        assert!(t.hidden());
        assert!(!t.streams());
    }
}
