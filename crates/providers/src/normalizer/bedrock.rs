//! Bedrock stream normalization.
//!
//! Bedrock fronts several model families. Payloads that carry an
//! Anthropic-style `type` field are passthroughs and delegate to the
//! Anthropic machine; otherwise the converse-stream shape applies:
//! `delta.thinking` / `delta.reasoning` is reasoning, `delta.text` is
//! content, and a top-level `usage` object carries the tally.

use ah_activity::ActivitySession;
use ah_domain::error::Result;
use ah_domain::event::{ActivityEvent, StopReason, ThinkingMode};
use serde_json::Value;

use super::{anthropic, count, tally};

pub(super) fn handle(raw: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    // Anthropic passthrough.
    if raw.get("type").and_then(|v| v.as_str()).is_some() {
        return anthropic::handle(raw, session);
    }

    let mut events = Vec::new();

    if let Some(delta) = raw.get("delta") {
        let thinking = delta
            .get("thinking")
            .or_else(|| delta.get("reasoning"))
            .and_then(|v| v.as_str());
        if let Some(text) = thinking {
            if !text.is_empty() {
                if !session.thinking_open() {
                    events.push(session.open_thinking(ThinkingMode::Extended)?);
                }
                events.push(session.append_thinking(text)?);
            }
        }
        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.extend(session.append_content(text)?);
            }
        }
    }

    if let Some(stop) = raw.get("stopReason").and_then(|v| v.as_str()) {
        session.provider_stop = Some(match stop {
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        });
    }

    if let Some(usage) = raw.get("usage") {
        let input = count(usage, "inputTokens");
        let output = count(usage, "outputTokens");
        if input > 0 || output > 0 {
            events.push(session.record_usage(tally(input, output, 0)));
        }
    }

    Ok(events)
}
