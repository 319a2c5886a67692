//! Runtime configuration knobs for the orchestration core.
//!
//! Deserialized from the gateway's TOML config; every field has a serde
//! default so a partial config file is always valid.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::capability::ProviderFamily;

/// Gating of the prompt router's semantic-search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticRoutingMode {
    /// Semantic routing must succeed; failures surface as
    /// `PROMPT_ROUTING_FAILED` and never fall through.
    Required,
    /// Semantic routing is attempted; failures and timeouts fall through
    /// to assignment/default resolution.
    #[default]
    Enabled,
    /// Semantic routing is skipped entirely.
    Disabled,
}

/// Runtime options recognized by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RuntimeOptions {
    pub semantic_routing: SemanticRoutingMode,
    /// Per-tool-call deadline.
    pub tool_timeout_ms: u64,
    /// Whole-request deadline.
    pub request_timeout_ms: u64,
    /// Deadline for the router's semantic search step.
    pub semantic_search_timeout_ms: u64,
    /// Maximum nesting of multi-model handoffs within one request.
    pub max_handoff_depth: u32,
    /// Bounded buffer size per fanout subscriber.
    pub fanout_buffer: usize,
    /// When true the SSE subscriber is lossless: the producer awaits
    /// buffer space instead of coalescing.
    pub sse_lossless: bool,
    /// Per-family overrides of the capability default thinking budget.
    pub thinking_budget_default: HashMap<ProviderFamily, u32>,
    /// Handoff role name -> model id.
    pub handoff_models: HashMap<String, String>,
    /// Grace period between cancel and force-close of the provider stream.
    pub abort_grace_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            semantic_routing: SemanticRoutingMode::default(),
            tool_timeout_ms: default_tool_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            semantic_search_timeout_ms: default_semantic_search_timeout_ms(),
            max_handoff_depth: default_max_handoff_depth(),
            fanout_buffer: default_fanout_buffer(),
            sse_lossless: true,
            thinking_budget_default: HashMap::new(),
            handoff_models: HashMap::new(),
            abort_grace_ms: default_abort_grace_ms(),
        }
    }
}

fn default_tool_timeout_ms() -> u64 {
    60_000
}
fn default_request_timeout_ms() -> u64 {
    600_000
}
fn default_semantic_search_timeout_ms() -> u64 {
    5_000
}
fn default_max_handoff_depth() -> u32 {
    4
}
fn default_fanout_buffer() -> usize {
    256
}
fn default_abort_grace_ms() -> u64 {
    500
}

impl RuntimeOptions {
    /// Effective thinking budget for a family, preferring the configured
    /// override and falling back to the capability default.
    pub fn thinking_budget(&self, family: ProviderFamily, capability_default: u32) -> u32 {
        self.thinking_budget_default
            .get(&family)
            .copied()
            .unwrap_or(capability_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let opts = RuntimeOptions::default();
        assert_eq!(opts.semantic_routing, SemanticRoutingMode::Enabled);
        assert_eq!(opts.tool_timeout_ms, 60_000);
        assert_eq!(opts.request_timeout_ms, 600_000);
        assert_eq!(opts.max_handoff_depth, 4);
        assert_eq!(opts.fanout_buffer, 256);
        assert!(opts.sse_lossless);
        assert_eq!(opts.abort_grace_ms, 500);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let opts: RuntimeOptions = toml::from_str(
            r#"
            semantic_routing = "required"
            tool_timeout_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(opts.semantic_routing, SemanticRoutingMode::Required);
        assert_eq!(opts.tool_timeout_ms, 5_000);
        assert_eq!(opts.fanout_buffer, 256);
    }

    #[test]
    fn thinking_budget_prefers_override() {
        let mut opts = RuntimeOptions::default();
        opts.thinking_budget_default
            .insert(ProviderFamily::Anthropic, 9_000);
        assert_eq!(opts.thinking_budget(ProviderFamily::Anthropic, 2_000), 9_000);
        assert_eq!(opts.thinking_budget(ProviderFamily::Gemini, 2_000), 2_000);
    }
}
