//! Capability resolution.
//!
//! Lookup never fails: unknown models get conservative defaults. The
//! resolution order is (1) case-insensitive exact cache hit, (2)
//! case-insensitive substring match against cached ids, (3) the ordered
//! pattern table, (4) conservative default.

use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;

use ah_domain::capability::ModelCapabilities;
use ah_domain::error::Result;

use crate::builtin::pattern_table;

/// Persistence seam for administrative capability overrides.
///
/// The platform wires a relational-backed implementation; local mode
/// runs without one.
pub trait CapabilityStore: Send + Sync {
    fn persist(&self, caps: &ModelCapabilities) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CapabilityRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-mostly registry of model capabilities.
///
/// The cache is seeded at startup from the built-in pattern table's
/// canonical entries; [`CapabilityRegistry::register`] is the single
/// write path (administrative override).
pub struct CapabilityRegistry {
    /// Lowercased model id -> capabilities.
    cache: RwLock<HashMap<String, ModelCapabilities>>,
    patterns: Vec<(&'static str, ModelCapabilities)>,
    store: Option<Arc<dyn CapabilityStore>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        let patterns = pattern_table();
        let mut cache = HashMap::new();
        for (_, caps) in &patterns {
            cache.insert(caps.model_id.to_lowercase(), caps.clone());
        }
        tracing::info!(models = cache.len(), "capability registry seeded");
        Self {
            cache: RwLock::new(cache),
            patterns,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CapabilityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve capabilities for a model id. Never fails.
    pub fn lookup(&self, model_id: &str) -> ModelCapabilities {
        let needle = model_id.to_lowercase();

        {
            let cache = self.cache.read();

            // 1. Exact hit.
            if let Some(caps) = cache.get(&needle) {
                return caps.clone();
            }

            // 2. Substring match against cached ids; the longest cached id
            //    contained in the query wins (so a dated release id still
            //    resolves to its canonical record).
            let mut best: Option<&ModelCapabilities> = None;
            let mut best_len = 0usize;
            for (key, caps) in cache.iter() {
                if needle.contains(key.as_str()) && key.len() > best_len {
                    best = Some(caps);
                    best_len = key.len();
                }
            }
            if let Some(caps) = best {
                return caps.clone();
            }
        }

        // 3. Ordered pattern table, most specific first.
        for (pattern, caps) in &self.patterns {
            if needle.contains(pattern) {
                let mut resolved = caps.clone();
                resolved.model_id = model_id.to_string();
                return resolved;
            }
        }

        // 4. Conservative default.
        tracing::debug!(model = model_id, "unknown model, conservative capabilities");
        ModelCapabilities::conservative(model_id)
    }

    /// Administrative upsert. Validates the record, persists it when a
    /// store is wired, and makes it visible to subsequent lookups.
    pub fn register(&self, caps: ModelCapabilities) -> Result<()> {
        caps.validate()?;
        if let Some(store) = &self.store {
            store.persist(&caps)?;
        }
        let key = caps.model_id.to_lowercase();
        tracing::info!(model = %caps.model_id, "capability override registered");
        self.cache.write().insert(key, caps);
        Ok(())
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::capability::{ProviderFamily, ThinkingKind};
    use parking_lot::Mutex;

    #[test]
    fn exact_hit_is_case_insensitive() {
        let reg = CapabilityRegistry::new();
        let caps = reg.lookup("Claude-Sonnet-4-20250514");
        assert_eq!(caps.family, ProviderFamily::Anthropic);
        assert_eq!(caps.model_id, "claude-sonnet-4-20250514");
    }

    #[test]
    fn pattern_match_preserves_requested_id() {
        let reg = CapabilityRegistry::new();
        let caps = reg.lookup("gpt-4o-mini-preview-2099");
        assert_eq!(caps.model_id, "gpt-4o-mini-preview-2099");
        assert_eq!(caps.family, ProviderFamily::OpenAi);
        // The mini record, not the full gpt-4o record.
        assert!(caps.input_cost_per_1k < 0.001);
    }

    #[test]
    fn unknown_model_gets_conservative_defaults() {
        let reg = CapabilityRegistry::new();
        let caps = reg.lookup("totally-novel-llm");
        assert_eq!(caps.max_context_tokens, 8_192);
        assert_eq!(caps.max_output_tokens, 4_096);
        assert!(!caps.supports_tools);
        assert_eq!(caps.thinking.kind, ThinkingKind::None);
    }

    #[test]
    fn bedrock_prefixed_id_resolves_to_bedrock_family() {
        let reg = CapabilityRegistry::new();
        let caps = reg.lookup("us.anthropic.claude-sonnet-4-20250514-v1:0");
        assert_eq!(caps.family, ProviderFamily::Bedrock);
    }

    #[test]
    fn o_family_reports_hidden_reasoning() {
        let reg = CapabilityRegistry::new();
        let caps = reg.lookup("o3-mini");
        assert!(caps.thinking.hidden());
        assert!(caps.thinking.wants_budget());
    }

    /// The contract of the human-maintained pattern table: no earlier
    /// pattern may match a later pattern's canonical id, otherwise the
    /// later row is unreachable.
    #[test]
    fn no_earlier_pattern_shadows_a_later_canonical_id() {
        let table = crate::builtin::pattern_table();
        for (i, (earlier, _)) in table.iter().enumerate() {
            for (later, caps) in table.iter().skip(i + 1) {
                assert!(
                    !caps.model_id.to_lowercase().contains(earlier),
                    "pattern {earlier:?} shadows {later:?} (canonical id {})",
                    caps.model_id
                );
            }
        }
    }

    #[test]
    fn register_rejects_invalid_capabilities() {
        let reg = CapabilityRegistry::new();
        let mut caps = ModelCapabilities::conservative("bad-model");
        caps.max_output_tokens = 0;
        assert!(reg.register(caps).is_err());
    }

    #[test]
    fn register_overrides_lookup() {
        let reg = CapabilityRegistry::new();
        let mut caps = ModelCapabilities::conservative("local-llm");
        caps.supports_tools = true;
        caps.tool_accuracy = 0.5;
        reg.register(caps).unwrap();

        let resolved = reg.lookup("LOCAL-LLM");
        assert!(resolved.supports_tools);
    }

    struct RecordingStore(Mutex<Vec<String>>);

    impl CapabilityStore for RecordingStore {
        fn persist(&self, caps: &ModelCapabilities) -> Result<()> {
            self.0.lock().push(caps.model_id.clone());
            Ok(())
        }
    }

    #[test]
    fn register_persists_when_store_is_wired() {
        let store = Arc::new(RecordingStore(Mutex::new(Vec::new())));
        let reg = CapabilityRegistry::new().with_store(store.clone());
        reg.register(ModelCapabilities::conservative("persisted-model"))
            .unwrap();
        assert_eq!(store.0.lock().as_slice(), ["persisted-model"]);
    }

    #[test]
    fn substring_match_prefers_longest_cached_id() {
        let reg = CapabilityRegistry::new();
        // Dated Anthropic release resolves via substring to the canonical
        // sonnet record rather than the generic claude row.
        let caps = reg.lookup("claude-sonnet-4-20250514-extra-suffix");
        assert_eq!(caps.model_id, "claude-sonnet-4-20250514");
    }
}
