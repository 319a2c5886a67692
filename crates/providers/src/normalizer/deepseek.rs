//! DeepSeek / Ollama stream normalization (chat-completions wire).
//!
//! Reasoning arrives over two channels: an explicit `reasoning_content`
//! delta field, and `<think>...</think>` tags embedded in ordinary
//! content. The tag parser is a two-state machine that splits each chunk
//! at tag boundaries and routes the pieces; a tag split across chunks is
//! carried over to the next one.

use ah_activity::ActivitySession;
use ah_domain::error::Result;
use ah_domain::event::{ActivityEvent, StopReason, ThinkingMode};
use serde_json::Value;

use super::{count, tally};

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

pub(super) fn handle(raw: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();

    let choice = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    if let Some(choice) = choice {
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        // Channel (a): explicit reasoning_content field.
        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                if !session.thinking_open() {
                    events.push(session.open_thinking(ThinkingMode::ChainOfThought)?);
                }
                events.push(session.append_thinking(text)?);
            }
        }

        // Channel (b): ordinary content, possibly carrying think tags.
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.extend(split_think_chunks(text, session)?);
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tool_calls {
                events.extend(handle_tool_delta(tc, session)?);
            }
        }

        if let Some(finish) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            session.provider_stop = Some(match finish {
                "length" => StopReason::MaxTokens,
                "tool_calls" => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            });
            // Chat-completions never sends an explicit per-call done:
            // close anything still assembling.
            for call_id in session.open_tool_ids() {
                let (event, _call) = session.complete_tool(&call_id)?;
                events.push(event);
            }
        }
    }

    if let Some(usage) = raw.get("usage") {
        let input = count(usage, "prompt_tokens");
        let output = count(usage, "completion_tokens");
        let reasoning = usage
            .get("completion_tokens_details")
            .map(|d| count(d, "reasoning_tokens"))
            .unwrap_or(0);
        if input > 0 || output > 0 {
            events.push(session.record_usage(tally(input, output, reasoning)));
        }
    }

    Ok(events)
}

// ── Think-tag parser ───────────────────────────────────────────────

/// Route one content chunk through the two-state tag parser.
fn split_think_chunks(chunk: &str, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();
    let mut text = std::mem::take(&mut session.think_tag_carry);
    text.push_str(chunk);
    let mut rest = text.as_str();

    loop {
        if session.inside_think_tag {
            match rest.find(CLOSE_TAG) {
                Some(pos) => {
                    if pos > 0 {
                        events.push(session.append_thinking(&rest[..pos])?);
                    }
                    events.extend(session.close_thinking(None));
                    session.inside_think_tag = false;
                    rest = &rest[pos + CLOSE_TAG.len()..];
                }
                None => {
                    let (emit, carry) = split_partial_tag(rest, CLOSE_TAG);
                    if !emit.is_empty() {
                        events.push(session.append_thinking(emit)?);
                    }
                    session.think_tag_carry = carry.to_string();
                    break;
                }
            }
        } else {
            match rest.find(OPEN_TAG) {
                Some(pos) => {
                    if pos > 0 {
                        events.extend(session.append_content(&rest[..pos])?);
                    }
                    if !session.thinking_open() {
                        events.push(session.open_thinking(ThinkingMode::ChainOfThought)?);
                    }
                    session.inside_think_tag = true;
                    rest = &rest[pos + OPEN_TAG.len()..];
                }
                None => {
                    let (emit, carry) = split_partial_tag(rest, OPEN_TAG);
                    if !emit.is_empty() {
                        events.extend(session.append_content(emit)?);
                    }
                    session.think_tag_carry = carry.to_string();
                    break;
                }
            }
        }
        if rest.is_empty() {
            session.think_tag_carry.clear();
            break;
        }
    }

    Ok(events)
}

/// Split off a trailing proper prefix of `tag` so a tag broken across
/// chunks is held back instead of being emitted as content.
fn split_partial_tag<'a>(text: &'a str, tag: &str) -> (&'a str, &'a str) {
    for k in (1..tag.len()).rev() {
        if text.ends_with(&tag[..k]) {
            let cut = text.len() - k;
            return (&text[..cut], &text[cut..]);
        }
    }
    (text, "")
}

// ── Tool-call deltas (chat-completions shape) ──────────────────────

fn handle_tool_delta(tc: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();
    let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
    let index_key = format!("idx_{index}");

    if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
        let name = tc
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        session.item_call_ids.insert(index_key.clone(), id.to_string());
        events.extend(session.open_tool(id.to_string(), name)?);
    }

    if let Some(args) = tc
        .get("function")
        .and_then(|f| f.get("arguments"))
        .and_then(|v| v.as_str())
    {
        if !args.is_empty() {
            if let Some(call_id) = session.item_call_ids.get(&index_key).cloned() {
                events.push(session.append_tool_json(&call_id, args)?);
            }
        }
    }

    Ok(events)
}
