//! OpenAI Responses stream normalization (`response.*` events).
//!
//! Function-call arguments stream as JSON fragments keyed by item id.
//! The o-family reports reasoning token counts without ever streaming
//! reasoning content; when the final usage shows reasoning tokens and no
//! thinking was emitted this turn, a hidden `thinking_complete` is
//! synthesized so the metrics survive.

use ah_activity::ActivitySession;
use ah_domain::error::{Error, Result};
use ah_domain::event::{ActivityEvent, StopReason};
use serde_json::Value;

use super::{count, tally};

pub(super) fn handle(raw: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let event_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "response.output_item.added" => {
            let item = raw.get("item").unwrap_or(&Value::Null);
            let item_type = item.get("type").and_then(|v| v.as_str()).unwrap_or("");
            if item_type != "function_call" {
                return Ok(Vec::new());
            }
            let item_id = item
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let call_id = item
                .get("call_id")
                .and_then(|v| v.as_str())
                .unwrap_or(&item_id)
                .to_string();
            let name = item
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            session.item_call_ids.insert(item_id, call_id.clone());
            session.open_tool(call_id, name)
        }

        "response.function_call_arguments.delta" => {
            let call_id = call_for_item(raw, session)?;
            let delta = raw.get("delta").and_then(|v| v.as_str()).unwrap_or("");
            if delta.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![session.append_tool_json(&call_id, delta)?])
        }

        "response.function_call_arguments.done" => {
            let call_id = call_for_item(raw, session)?;
            let (event, _call) = session.complete_tool(&call_id)?;
            Ok(vec![event])
        }

        "response.output_text.delta" => {
            let text = raw.get("delta").and_then(|v| v.as_str()).unwrap_or("");
            if text.is_empty() {
                return Ok(Vec::new());
            }
            session.append_content(text)
        }

        "response.completed" | "response.incomplete" => {
            let mut events = Vec::new();
            let response = raw.get("response").unwrap_or(&Value::Null);

            if event_type == "response.incomplete" {
                session.provider_stop = Some(StopReason::MaxTokens);
            } else if session.provider_stop.is_none() {
                session.provider_stop = Some(StopReason::EndTurn);
            }

            if let Some(usage) = response.get("usage") {
                let input = count(usage, "input_tokens");
                let output = count(usage, "output_tokens");
                let reasoning = usage
                    .get("output_tokens_details")
                    .map(|d| count(d, "reasoning_tokens"))
                    .unwrap_or(0);

                // Hidden reasoning: tokens were spent but nothing streamed.
                if reasoning > 0 && !session.had_thinking() {
                    events.push(session.hidden_thinking(reasoning));
                    events.push(session.record_usage(tally(input, output, 0)));
                } else {
                    events.push(session.record_usage(tally(input, output, reasoning)));
                }
            }
            Ok(events)
        }

        "response.failed" => {
            let message = raw
                .get("response")
                .and_then(|r| r.get("error"))
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("response failed");
            Err(Error::Provider {
                provider: "openai".into(),
                message: message.to_string(),
            })
        }

        // created, in_progress, output_item.done, content_part.*: no
        // canonical counterpart.
        _ => Ok(Vec::new()),
    }
}

fn call_for_item(raw: &Value, session: &ActivitySession) -> Result<String> {
    let item_id = raw.get("item_id").and_then(|v| v.as_str()).unwrap_or("");
    session
        .item_call_ids
        .get(item_id)
        .cloned()
        .ok_or_else(|| Error::Provider {
            provider: "openai".into(),
            message: format!("arguments event for unknown item {item_id}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::capability::ProviderFamily;
    use serde_json::json;

    fn session() -> ActivitySession {
        ActivitySession::new("s1", "m1", "o3-mini", ProviderFamily::OpenAi)
    }

    fn feed(session: &mut ActivitySession, raw: Value) -> Vec<ActivityEvent> {
        handle(&raw, session).unwrap()
    }

    /// Hidden reasoning: content streams, usage later reveals 500
    /// reasoning tokens that were never surfaced.
    #[test]
    fn hidden_reasoning_synthesizes_thinking_complete() {
        let mut s = session();
        let mut events = Vec::new();

        events.extend(feed(
            &mut s,
            json!({"type":"response.output_text.delta","delta":"Answer: 42."}),
        ));
        events.extend(feed(
            &mut s,
            json!({"type":"response.completed","response":{"usage":{
                "input_tokens":20,"output_tokens":3,
                "output_tokens_details":{"reasoning_tokens":500}}}}),
        ));

        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            ["content_delta", "thinking_complete", "metrics_update"]
        );
        match &events[1] {
            ActivityEvent::ThinkingComplete {
                was_hidden,
                token_count,
                content,
                ..
            } => {
                assert!(*was_hidden);
                assert_eq!(*token_count, 500);
                assert!(content.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[2] {
            ActivityEvent::MetricsUpdate { tokens, .. } => {
                assert_eq!(tokens.input, 20);
                assert_eq!(tokens.output, 3);
                assert_eq!(tokens.reasoning, 500);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(s.had_thinking());
    }

    #[test]
    fn function_call_arguments_stream_by_item_id() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"type":"response.output_item.added","item":{
                "type":"function_call","id":"item_1","call_id":"call_1","name":"search"}}),
        );
        assert_eq!(events[0].event_name(), "tool_start");

        feed(
            &mut s,
            json!({"type":"response.function_call_arguments.delta","item_id":"item_1","delta":"{\"q\":"}),
        );
        feed(
            &mut s,
            json!({"type":"response.function_call_arguments.delta","item_id":"item_1","delta":"\"rust\"}"}),
        );
        let events = feed(
            &mut s,
            json!({"type":"response.function_call_arguments.done","item_id":"item_1"}),
        );
        match &events[0] {
            ActivityEvent::ToolComplete {
                arguments,
                arguments_raw,
                ..
            } => {
                assert_eq!(arguments["q"], "rust");
                assert_eq!(arguments_raw, "{\"q\":\"rust\"}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unparseable_arguments_complete_with_empty_object() {
        let mut s = session();
        feed(
            &mut s,
            json!({"type":"response.output_item.added","item":{
                "type":"function_call","id":"item_1","call_id":"c1","name":"search"}}),
        );
        feed(
            &mut s,
            json!({"type":"response.function_call_arguments.delta","item_id":"item_1","delta":"{oops"}),
        );
        let events = feed(
            &mut s,
            json!({"type":"response.function_call_arguments.done","item_id":"item_1"}),
        );
        match &events[0] {
            ActivityEvent::ToolComplete { arguments, .. } => {
                assert_eq!(*arguments, json!({}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_function_items_are_ignored() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"type":"response.output_item.added","item":{"type":"message","id":"m1"}}),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn visible_reasoning_is_not_resynthesized() {
        let mut s = session();
        // A prior hidden record exists; the usage reasoning count goes
        // into the tally instead of a second synthetic complete.
        s.hidden_thinking(100);
        let events = feed(
            &mut s,
            json!({"type":"response.completed","response":{"usage":{
                "input_tokens":1,"output_tokens":1,
                "output_tokens_details":{"reasoning_tokens":100}}}}),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "metrics_update");
    }

    #[test]
    fn incomplete_response_maps_to_max_tokens() {
        let mut s = session();
        feed(
            &mut s,
            json!({"type":"response.incomplete","response":{"usage":{
                "input_tokens":5,"output_tokens":5}}}),
        );
        assert_eq!(s.provider_stop, Some(StopReason::MaxTokens));
    }

    #[test]
    fn failed_response_is_a_provider_error() {
        let mut s = session();
        let err = handle(
            &json!({"type":"response.failed","response":{"error":{"message":"rate limited"}}}),
            &mut s,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
