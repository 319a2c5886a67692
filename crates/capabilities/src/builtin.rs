//! Built-in capability pattern table.
//!
//! The table is ordered most specific first: an engineer adding a new
//! model must place its pattern before any strict prefix of it. The
//! ordering test in `registry.rs` enforces that no earlier pattern
//! matches a later pattern's canonical id.

use ah_domain::capability::{
    ModelCapabilities, ProviderFamily, ThinkingKind, ThinkingSupport,
};

fn caps(
    canonical: &str,
    family: ProviderFamily,
    context: u32,
    output: u32,
    tools: bool,
    accuracy: f32,
    thinking: ThinkingSupport,
    in_cost: f64,
    out_cost: f64,
) -> ModelCapabilities {
    ModelCapabilities {
        model_id: canonical.to_string(),
        family,
        max_context_tokens: context,
        max_output_tokens: output,
        supports_tools: tools,
        tool_accuracy: accuracy,
        thinking,
        input_cost_per_1k: in_cost,
        output_cost_per_1k: out_cost,
    }
}

fn native(max: u32, default: u32) -> ThinkingSupport {
    ThinkingSupport {
        kind: ThinkingKind::Native,
        max_budget_tokens: max,
        default_budget_tokens: default,
    }
}

fn summary(max: u32, default: u32) -> ThinkingSupport {
    ThinkingSupport {
        kind: ThinkingKind::Summary,
        max_budget_tokens: max,
        default_budget_tokens: default,
    }
}

fn effort(max: u32, default: u32) -> ThinkingSupport {
    ThinkingSupport {
        kind: ThinkingKind::ReasoningEffort,
        max_budget_tokens: max,
        default_budget_tokens: default,
    }
}

/// The ordered pattern table: `(pattern, capabilities)`.
///
/// A model id matches a row when the lowercased id contains the pattern.
/// Bedrock-prefixed ids come first so `anthropic.claude-*` never falls
/// into the native Anthropic rows.
pub(crate) fn pattern_table() -> Vec<(&'static str, ModelCapabilities)> {
    use ProviderFamily::*;
    vec![
        // ── Bedrock passthrough ids ────────────────────────────────
        (
            "anthropic.claude",
            caps(
                "anthropic.claude-sonnet-4-20250514-v1:0",
                Bedrock,
                200_000,
                8_192,
                true,
                0.92,
                native(8_000, 2_048),
                0.003,
                0.015,
            ),
        ),
        // ── Anthropic ──────────────────────────────────────────────
        (
            "claude-3-5-haiku",
            caps(
                "claude-3-5-haiku-20241022",
                Anthropic,
                200_000,
                8_192,
                true,
                0.85,
                ThinkingSupport::none(),
                0.0008,
                0.004,
            ),
        ),
        (
            "claude-opus-4",
            caps(
                "claude-opus-4-20250514",
                Anthropic,
                200_000,
                32_000,
                true,
                0.97,
                native(31_999, 4_096),
                0.015,
                0.075,
            ),
        ),
        (
            "claude-sonnet-4",
            caps(
                "claude-sonnet-4-20250514",
                Anthropic,
                200_000,
                16_384,
                true,
                0.95,
                native(16_000, 2_048),
                0.003,
                0.015,
            ),
        ),
        (
            "claude",
            caps(
                "claude-3-7-sonnet-20250219",
                Anthropic,
                200_000,
                8_192,
                true,
                0.93,
                native(8_000, 2_048),
                0.003,
                0.015,
            ),
        ),
        // ── OpenAI reasoning family (hidden stream) ────────────────
        (
            "o4-mini",
            caps(
                "o4-mini-2025-04-16",
                OpenAi,
                200_000,
                100_000,
                true,
                0.9,
                effort(65_536, 8_192),
                0.0011,
                0.0044,
            ),
        ),
        (
            "o3-mini",
            caps(
                "o3-mini-2025-01-31",
                OpenAi,
                200_000,
                100_000,
                true,
                0.88,
                effort(65_536, 8_192),
                0.0011,
                0.0044,
            ),
        ),
        (
            "o3",
            caps(
                "o3-2025-04-16",
                OpenAi,
                200_000,
                100_000,
                true,
                0.93,
                effort(65_536, 8_192),
                0.01,
                0.04,
            ),
        ),
        (
            "o1",
            caps(
                "o1-2024-12-17",
                OpenAi,
                200_000,
                100_000,
                true,
                0.9,
                effort(65_536, 8_192),
                0.015,
                0.06,
            ),
        ),
        // ── OpenAI GPT family ──────────────────────────────────────
        (
            "gpt-4o-mini",
            caps(
                "gpt-4o-mini-2024-07-18",
                OpenAi,
                128_000,
                16_384,
                true,
                0.84,
                ThinkingSupport::none(),
                0.00015,
                0.0006,
            ),
        ),
        (
            "gpt-4o",
            caps(
                "gpt-4o-2024-08-06",
                OpenAi,
                128_000,
                16_384,
                true,
                0.9,
                ThinkingSupport::none(),
                0.0025,
                0.01,
            ),
        ),
        (
            "gpt-4",
            caps(
                "gpt-4-turbo-2024-04-09",
                OpenAi,
                128_000,
                4_096,
                true,
                0.87,
                ThinkingSupport::none(),
                0.01,
                0.03,
            ),
        ),
        // ── Gemini ─────────────────────────────────────────────────
        (
            "gemini-2.5-flash",
            caps(
                "gemini-2.5-flash",
                Gemini,
                1_048_576,
                65_536,
                true,
                0.86,
                summary(24_576, 2_048),
                0.0003,
                0.0025,
            ),
        ),
        (
            "gemini-2.5-pro",
            caps(
                "gemini-2.5-pro",
                Gemini,
                1_048_576,
                65_536,
                true,
                0.92,
                summary(32_768, 4_096),
                0.00125,
                0.01,
            ),
        ),
        (
            "gemini",
            caps(
                "gemini-1.5-pro-002",
                Gemini,
                2_097_152,
                8_192,
                true,
                0.85,
                ThinkingSupport::none(),
                0.00125,
                0.005,
            ),
        ),
        // ── DeepSeek / local tag-based models ──────────────────────
        (
            "deepseek-reasoner",
            caps(
                "deepseek-reasoner",
                DeepSeek,
                65_536,
                32_768,
                false,
                0.0,
                native(32_768, 4_096),
                0.00055,
                0.00219,
            ),
        ),
        (
            "deepseek-r1",
            caps(
                "deepseek-r1:70b",
                DeepSeek,
                65_536,
                32_768,
                false,
                0.0,
                native(32_768, 4_096),
                0.0,
                0.0,
            ),
        ),
        (
            "deepseek",
            caps(
                "deepseek-chat",
                DeepSeek,
                65_536,
                8_192,
                true,
                0.8,
                ThinkingSupport::none(),
                0.00027,
                0.0011,
            ),
        ),
    ]
}
