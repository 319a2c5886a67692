//! Gemini stream normalization (`candidates[0].content.parts[]`).
//!
//! Each part is classified: `thought=true` text parts are summarized
//! thinking, `functionCall` parts open/continue/complete a tool call,
//! and plain text is assistant content (which implicitly closes an open
//! thought). `usageMetadata.thoughtsTokenCount` feeds the reasoning
//! tally.

use ah_activity::ActivitySession;
use ah_domain::error::Result;
use ah_domain::event::{ActivityEvent, StopReason, ThinkingMode};
use serde_json::Value;

use super::{count, tally};

pub(super) fn handle(raw: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();

    let candidate = raw
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    if let Some(candidate) = candidate {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                events.extend(handle_part(part, session)?);
            }
        }

        if let Some(finish) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            events.extend(finish_candidate(finish, raw, session)?);
        }
    }

    Ok(events)
}

fn handle_part(part: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();

    let is_thought = part
        .get("thought")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
        if text.is_empty() {
            return Ok(events);
        }
        if is_thought {
            if !session.thinking_open() {
                events.push(session.open_thinking(ThinkingMode::Summary)?);
            }
            events.push(session.append_thinking(text)?);
        } else {
            // Plain text implicitly closes an open thought.
            events.extend(session.append_content(text)?);
        }
        return Ok(events);
    }

    if let Some(fc) = part.get("functionCall") {
        events.extend(handle_function_call(fc, session)?);
    }

    Ok(events)
}

fn handle_function_call(fc: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();
    let name = fc
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    // Open on first sight. Gemini streams at most one call at a time.
    let call_id = match session.gemini_open_call.clone() {
        Some(id) => id,
        None => {
            let id = fc
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
            events.extend(session.open_tool(id.clone(), name.clone())?);
            session.gemini_open_call = Some(id.clone());
            id
        }
    };

    // Streaming argument fragments: one tool_delta per element, the
    // jsonPath preserved inside the delta payload.
    if let Some(partials) = fc.get("partialArgs").and_then(|v| v.as_array()) {
        for element in partials {
            events.push(session.append_tool_json(&call_id, &element.to_string())?);
        }
    }

    let will_continue = fc
        .get("willContinue")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !will_continue {
        if let Some(args) = fc.get("args") {
            // The complete argument object arrives whole; it supersedes
            // any partial fragments.
            session.set_tool_arguments(&call_id, args)?;
            let (event, _call) = session.complete_tool(&call_id)?;
            events.push(event);
            session.gemini_open_call = None;
        }
    }

    Ok(events)
}

fn finish_candidate(
    finish: &str,
    raw: &Value,
    session: &mut ActivitySession,
) -> Result<Vec<ActivityEvent>> {
    let mut events = Vec::new();

    session.provider_stop = Some(match finish {
        "MAX_TOKENS" => StopReason::MaxTokens,
        _ if session.tool_order().is_empty() => StopReason::EndTurn,
        _ => StopReason::ToolUse,
    });

    if let Some(usage) = raw.get("usageMetadata") {
        let input = count(usage, "promptTokenCount");
        let output = count(usage, "candidatesTokenCount");
        let reasoning = count(usage, "thoughtsTokenCount");
        if input > 0 || output > 0 || reasoning > 0 {
            events.push(session.record_usage(tally(input, output, reasoning)));
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::capability::ProviderFamily;
    use serde_json::json;

    fn session() -> ActivitySession {
        ActivitySession::new("s1", "m1", "gemini-2.5-pro", ProviderFamily::Gemini)
    }

    fn feed(session: &mut ActivitySession, raw: Value) -> Vec<ActivityEvent> {
        handle(&raw, session).unwrap()
    }

    #[test]
    fn thought_parts_open_summary_thinking() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[
                {"thought":true,"text":"Considering the question"}]}}]}),
        );
        assert_eq!(events[0].event_name(), "thinking_start");
        match &events[0] {
            ActivityEvent::ThinkingStart { mode, .. } => {
                assert_eq!(*mode, ThinkingMode::Summary)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(events[1].event_name(), "thinking_delta");
    }

    #[test]
    fn plain_text_closes_open_thought() {
        let mut s = session();
        feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"thought":true,"text":"hmm"}]}}]}),
        );
        let events = feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"text":"The answer is 4."}]}}]}),
        );
        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(names, ["thinking_complete", "content_delta"]);
    }

    #[test]
    fn streamed_function_call_completes_on_final_args() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"functionCall":{
                "name":"search",
                "partialArgs":[{"jsonPath":"$.q","value":"ru"}],
                "willContinue":true}}]}}]}),
        );
        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(names, ["tool_start", "tool_delta"]);

        let events = feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"functionCall":{
                "name":"search",
                "args":{"q":"rust"}}}]}}]}),
        );
        match &events[0] {
            ActivityEvent::ToolComplete { arguments, .. } => {
                assert_eq!(arguments["q"], "rust")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(s.gemini_open_call.is_none());
    }

    #[test]
    fn whole_function_call_in_one_chunk() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"functionCall":{
                "name":"weather","args":{"city":"Oslo"}}}]}}]}),
        );
        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(names, ["tool_start", "tool_complete"]);
    }

    #[test]
    fn usage_metadata_carries_thought_tokens() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"text":"done"}]},
                "finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":12,"candidatesTokenCount":7,
                    "thoughtsTokenCount":30}}),
        );
        let last = events.last().unwrap();
        match last {
            ActivityEvent::MetricsUpdate { tokens, .. } => {
                assert_eq!(tokens.input, 12);
                assert_eq!(tokens.output, 7);
                assert_eq!(tokens.reasoning, 30);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.provider_stop, Some(StopReason::EndTurn));
    }

    #[test]
    fn finish_with_tools_maps_to_tool_use() {
        let mut s = session();
        feed(
            &mut s,
            json!({"candidates":[{"content":{"parts":[{"functionCall":{
                "name":"search","args":{"q":"x"}}}]},"finishReason":"STOP"}]}),
        );
        assert_eq!(s.provider_stop, Some(StopReason::ToolUse));
    }

    #[test]
    fn empty_chunk_is_ignored() {
        let mut s = session();
        assert!(feed(&mut s, json!({"candidates":[{}]})).is_empty());
        assert!(feed(&mut s, json!({})).is_empty());
    }
}
